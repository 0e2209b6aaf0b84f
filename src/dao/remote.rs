use std::error::Error;
use thiserror::Error;

/// Result alias for remote API operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Error raised by remote API adapters regardless of the underlying transport.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The server refused the request as invalid.
    #[error("request rejected: {message}")]
    Invalid { message: String },
    /// The addressed resource does not exist.
    #[error("not found: {message}")]
    NotFound { message: String },
    /// The server could not be reached or answered with something unusable.
    #[error("remote unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl RemoteError {
    /// Construct an unavailable error from any transport failure.
    pub fn unavailable(message: impl Into<String>, source: impl Error + Send + Sync + 'static) -> Self {
        RemoteError::Unavailable {
            message: message.into(),
            source: Box::new(source),
        }
    }

    /// Construct a rejection carrying the server's message.
    pub fn invalid(message: impl Into<String>) -> Self {
        RemoteError::Invalid {
            message: message.into(),
        }
    }

    /// Construct a not-found error carrying the server's message.
    pub fn not_found(message: impl Into<String>) -> Self {
        RemoteError::NotFound {
            message: message.into(),
        }
    }
}
