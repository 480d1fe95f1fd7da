//! Status Classifier
//!
//! Maps backend HTTP status codes (plus an optional JSON error body) to a
//! closed set of error kinds. This is the only place that decides which
//! statuses are fatal.

use serde::Deserialize;
use std::fmt;

/// Kind of failure reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AuthenticationRequired,
    AccessDenied,
    NotFound,
    InvalidMethod,
    InvalidRequest,
    Conflict,
    Gone,
    UnsupportedMediaType,
    BackendFailure,
}

/// Which side is at fault for a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller misuse or session loss (401, 405, 406, 415)
    Internal,
    /// Legitimate operational failure in the cloud (403, 409, 410, 5xx)
    Cloud,
}

impl ErrorKind {
    /// Kind for a status code, `None` for success
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            401 => Some(Self::AuthenticationRequired),
            403 => Some(Self::AccessDenied),
            404 => Some(Self::NotFound),
            405 => Some(Self::InvalidMethod),
            406 => Some(Self::InvalidRequest),
            409 => Some(Self::Conflict),
            410 => Some(Self::Gone),
            415 => Some(Self::UnsupportedMediaType),
            s if s >= 500 => Some(Self::BackendFailure),
            _ => None,
        }
    }

    pub fn class(self) -> ErrorClass {
        match self {
            Self::AuthenticationRequired
            | Self::InvalidMethod
            | Self::InvalidRequest
            | Self::UnsupportedMediaType => ErrorClass::Internal,
            Self::AccessDenied
            | Self::NotFound
            | Self::Conflict
            | Self::Gone
            | Self::BackendFailure => ErrorClass::Cloud,
        }
    }

    /// Message used when the backend does not send one
    pub fn default_message(self) -> &'static str {
        match self {
            Self::AuthenticationRequired => "You must authenticate before making this call",
            Self::AccessDenied => "You do not have access to the requested resource",
            Self::NotFound => "The requested resource does not exist",
            Self::InvalidMethod => "Invalid HTTP method",
            Self::InvalidRequest => "Invalid request for resource",
            Self::Conflict => "A conflict exists with the resource you were accessing",
            Self::Gone => "The resource you are referencing no longer exists",
            Self::UnsupportedMediaType => "Request is not JSON",
            Self::BackendFailure => "Unknown error",
        }
    }
}

/// A fatal status reported by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub status: u16,
    pub message: String,
}

impl ApiError {
    pub fn class(&self) -> ErrorClass {
        self.kind.class()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Result of classifying one response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// 404: a valid "absent" answer, never raised by the classifier
    Absent,
    Fatal(ApiError),
}

impl Outcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Outcome::Fatal(_))
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    reference: Option<String>,
}

/// Extract the backend's own error message, if the body carries one
fn backend_message(body: Option<&str>) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body?).ok()?;
    Some(match parsed.reference {
        Some(reference) => format!("{} [reference={}]", parsed.message, reference),
        None => parsed.message,
    })
}

/// Classify a status code and optional body
pub fn classify(status: u16, body: Option<&str>) -> Outcome {
    match ErrorKind::from_status(status) {
        None => Outcome::Success,
        Some(ErrorKind::NotFound) => Outcome::Absent,
        Some(kind) => Outcome::Fatal(ApiError {
            kind,
            status,
            message: backend_message(body).unwrap_or_else(|| kind.default_message().to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_kinds() {
        let table = [
            (401, ErrorKind::AuthenticationRequired),
            (403, ErrorKind::AccessDenied),
            (405, ErrorKind::InvalidMethod),
            (406, ErrorKind::InvalidRequest),
            (409, ErrorKind::Conflict),
            (410, ErrorKind::Gone),
            (415, ErrorKind::UnsupportedMediaType),
            (500, ErrorKind::BackendFailure),
            (503, ErrorKind::BackendFailure),
        ];
        for (status, kind) in table {
            match classify(status, None) {
                Outcome::Fatal(err) => {
                    assert_eq!(err.kind, kind);
                    assert_eq!(err.status, status);
                    assert_eq!(err.message, kind.default_message());
                }
                other => panic!("{} classified as {:?}", status, other),
            }
        }
    }

    #[test]
    fn test_not_found_is_never_fatal() {
        assert_eq!(classify(404, None), Outcome::Absent);
        assert_eq!(classify(404, Some(r#"{"message":"gone"}"#)), Outcome::Absent);
    }

    #[test]
    fn test_success_statuses() {
        for status in [200, 201, 202, 204, 302, 400, 429] {
            assert_eq!(classify(status, None), Outcome::Success, "status {}", status);
        }
    }

    #[test]
    fn test_body_message_with_reference() {
        let body = r#"{"message": "Shape not found", "reference": "abc-123"}"#;
        let Outcome::Fatal(err) = classify(409, Some(body)) else {
            panic!("expected fatal");
        };
        assert_eq!(err.message, "Shape not found [reference=abc-123]");
        assert_eq!(err.to_string(), "409: Shape not found [reference=abc-123]");
    }

    #[test]
    fn test_unparseable_body_uses_default() {
        let Outcome::Fatal(err) = classify(500, Some("<html>oops</html>")) else {
            panic!("expected fatal");
        };
        assert_eq!(err.message, "Unknown error");
    }

    #[test]
    fn test_error_classes() {
        for status in [401, 405, 406, 415] {
            assert_eq!(ErrorKind::from_status(status).unwrap().class(), ErrorClass::Internal);
        }
        for status in [403, 409, 410, 500, 502] {
            assert_eq!(ErrorKind::from_status(status).unwrap().class(), ErrorClass::Cloud);
        }
    }
}
