mod client;
mod config;
mod error;

pub use client::HttpJamApi;
pub use config::HttpApiConfig;
pub use error::{HttpApiError, HttpResult};
