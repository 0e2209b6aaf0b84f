use thiserror::Error;
use validator::ValidationErrors;

use crate::{dao::remote::RemoteError, state::InvalidTransition};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Input rejected locally or by the server.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Remote API could not be reached or answered unusably.
    #[error("remote unavailable")]
    Unavailable(#[source] RemoteError),
    /// Remote call exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The view was torn down before the operation completed.
    #[error("view is no longer mounted")]
    Unmounted,
}

impl From<RemoteError> for ServiceError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Invalid { message } => ServiceError::InvalidInput(message),
            RemoteError::NotFound { message } => ServiceError::NotFound(message),
            other @ RemoteError::Unavailable { .. } => ServiceError::Unavailable(other),
        }
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {}", err))
    }
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl ServiceError {
    /// Message shown to users; transport details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::InvalidInput(message)
            | ServiceError::NotFound(message)
            | ServiceError::InvalidState(message) => message.clone(),
            ServiceError::Unavailable(source) => source.to_string(),
            ServiceError::Timeout => "the server took too long to answer".into(),
            ServiceError::Unmounted => "the page was closed".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_map_to_service_errors() {
        assert!(matches!(
            ServiceError::from(RemoteError::invalid("bad vote")),
            ServiceError::InvalidInput(message) if message == "bad vote"
        ));
        assert!(matches!(
            ServiceError::from(RemoteError::not_found("Jam not found")),
            ServiceError::NotFound(_)
        ));
        let io = std::io::Error::other("connection reset");
        assert!(matches!(
            ServiceError::from(RemoteError::unavailable("POST /vote", io)),
            ServiceError::Unavailable(_)
        ));
    }

    #[test]
    fn user_message_keeps_server_wording() {
        let err = ServiceError::from(RemoteError::invalid("Song already in jam"));
        assert_eq!(err.user_message(), "Song already in jam");
        assert_eq!(ServiceError::Timeout.to_string(), "operation timed out");
    }
}
