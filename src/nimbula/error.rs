//! Error types for the resource protocol client

use super::status::{ApiError, ErrorClass, ErrorKind};
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Fatal status reported by the backend
    #[error("{0}")]
    Api(#[from] ApiError),

    /// The authentication handshake failed
    #[error("authentication failed: {message}")]
    Authentication { status: Option<u16>, message: String },

    /// Connection refused, TLS failure, request timeout, unreadable response
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid JSON in response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no response body available")]
    EmptyBody,

    /// A convergence wait ran past its deadline
    #[error("timed out after {}s waiting for {resource} to {goal}", waited.as_secs())]
    Timeout {
        resource: String,
        goal: String,
        waited: Duration,
    },

    /// A convergence wait ended in a state that can never converge
    #[error("{resource} failed: {reason}")]
    Failed { resource: String, reason: String },

    #[error("wait for {resource} was cancelled")]
    Cancelled { resource: String },

    #[error("invalid resource id: {0}")]
    InvalidId(String),

    /// A caller-supplied argument the backend would reject
    #[error("invalid argument: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The backend answered successfully but not with what we needed
    #[error("unexpected response: {0}")]
    Unexpected(String),
}

impl Error {
    /// Backend error kind, if this is a classified status failure
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Api(err) => Some(err.kind),
            Error::Authentication { status, .. } => status.and_then(ErrorKind::from_status),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api(err) => Some(err.status),
            Error::Authentication { status, .. } => *status,
            _ => None,
        }
    }

    /// True for caller misuse, session loss and infrastructure failures
    pub fn is_internal(&self) -> bool {
        match self {
            Error::Api(err) => err.class() == ErrorClass::Internal,
            Error::Authentication { .. }
            | Error::Transport(_)
            | Error::Json(_)
            | Error::EmptyBody
            | Error::InvalidId(_)
            | Error::InvalidInput(_)
            | Error::Config(_) => true,
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display_and_class() {
        let err = Error::from(ApiError {
            kind: ErrorKind::Conflict,
            status: 409,
            message: "already exists".to_string(),
        });
        assert_eq!(err.to_string(), "409: already exists");
        assert_eq!(err.kind(), Some(ErrorKind::Conflict));
        assert!(!err.is_internal());
    }

    #[test]
    fn test_timeout_is_distinct() {
        let err = Error::Timeout {
            resource: "/acct/bob/vm".to_string(),
            goal: "start".to_string(),
            waited: Duration::from_secs(1200),
        };
        assert!(err.is_timeout());
        assert_eq!(err.kind(), None);
        assert!(err.to_string().contains("1200s"));
    }
}
