use std::time::Duration;

use super::error::{HttpApiError, HttpResult};

/// Runtime configuration describing how to reach the jam REST API.
#[derive(Debug, Clone)]
pub struct HttpApiConfig {
    /// Base URL including the `/api` prefix.
    pub base_url: String,
    /// Per-request timeout; `None` waits forever.
    pub timeout: Option<Duration>,
}

impl HttpApiConfig {
    /// Configuration for an explicit base URL without a client-level timeout.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: None,
        }
    }

    /// Apply a per-request timeout at the HTTP client level.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build a configuration by reading `JAM_API_URL`.
    pub fn from_env() -> HttpResult<Self> {
        let base_url = std::env::var("JAM_API_URL").map_err(|_| HttpApiError::MissingEnvVar {
            var: "JAM_API_URL",
        })?;
        Ok(Self::new(base_url))
    }
}
