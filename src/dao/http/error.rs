//! Error types of the REST API client.

use reqwest::StatusCode;
use thiserror::Error;

use crate::dao::remote::RemoteError;

/// Convenient result alias returning [`HttpApiError`] failures.
pub type HttpResult<T> = Result<T, HttpApiError>;

/// Failures that can occur while talking to the jam REST API.
#[derive(Debug, Error)]
pub enum HttpApiError {
    /// Required environment variable is missing.
    #[error("missing API environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build API client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// The request could not be sent or the connection dropped.
    #[error("failed to send API request to `{path}`")]
    RequestSend {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// The API answered with a non-success status.
    #[error("unexpected API response status {status} for `{path}`: {message}")]
    RequestStatus {
        path: String,
        status: StatusCode,
        message: String,
    },
    /// Response payload could not be parsed into the expected model.
    #[error("failed to decode API response for `{path}`")]
    DecodeResponse {
        path: String,
        #[source]
        source: reqwest::Error,
    },
}

impl From<HttpApiError> for RemoteError {
    fn from(err: HttpApiError) -> Self {
        match err {
            HttpApiError::RequestStatus {
                status, message, ..
            } if matches!(
                status,
                StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY
            ) =>
            {
                RemoteError::invalid(message)
            }
            HttpApiError::RequestStatus {
                status: StatusCode::NOT_FOUND,
                message,
                ..
            } => RemoteError::not_found(message),
            other => RemoteError::unavailable(other.to_string(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: StatusCode) -> HttpApiError {
        HttpApiError::RequestStatus {
            path: "jams/1/vote".into(),
            status,
            message: "Song not found in jam".into(),
        }
    }

    #[test]
    fn statuses_are_classified() {
        assert!(matches!(
            RemoteError::from(status(StatusCode::BAD_REQUEST)),
            RemoteError::Invalid { message } if message == "Song not found in jam"
        ));
        assert!(matches!(
            RemoteError::from(status(StatusCode::NOT_FOUND)),
            RemoteError::NotFound { .. }
        ));
        assert!(matches!(
            RemoteError::from(status(StatusCode::BAD_GATEWAY)),
            RemoteError::Unavailable { .. }
        ));
    }
}
