/// HTTP client for the jam REST API.
#[cfg(feature = "http-api")]
pub mod http;
/// Remote API abstraction.
pub mod jam_api;
/// Per-device vote ledger persisted as JSON.
pub mod ledger;
/// In-process API backend holding everything in memory.
pub mod loopback;
/// Domain model definitions.
pub mod models;
/// Transport-agnostic remote errors.
pub mod remote;
