//! Error types for the CouchDB client.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CouchError>;

/// Error for invalid HTTP header configuration.
#[derive(Debug, Clone, Error)]
pub enum InvalidHeaderError {
    #[error("invalid header name: {0}")]
    InvalidName(String),
    #[error("invalid header value: {0}")]
    InvalidValue(String),
}

/// Main error type for database operations.
///
/// Every request issued by the client is classified into exactly one of
/// these variants, so callers can branch on `NotFound` or `Conflict`
/// without looking at message text.
#[derive(Debug, Error)]
pub enum CouchError {
    #[error("document not found: {reason}")]
    NotFound { reason: String },

    #[error("document conflict: {reason}")]
    Conflict { reason: String },

    #[error("document not modified")]
    NotModified,

    #[error("server error: {status} - {message}")]
    Server { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("timeout")]
    Timeout,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(String),

    #[error("invalid argument: {0}")]
    Precondition(String),

    #[error(transparent)]
    InvalidHeader(#[from] InvalidHeaderError),
}

impl CouchError {
    /// Build a precondition failure.
    pub(crate) fn precondition(message: impl Into<String>) -> Self {
        CouchError::Precondition(message.into())
    }

    /// HTTP status code if applicable
    pub fn status_code(&self) -> Option<u16> {
        match self {
            CouchError::NotFound { .. } => Some(404),
            CouchError::Conflict { .. } => Some(409),
            CouchError::NotModified => Some(304),
            CouchError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CouchError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, CouchError::Conflict { .. })
    }

    /// Whether the failure was raised locally, before any request was sent.
    pub fn is_precondition(&self) -> bool {
        matches!(self, CouchError::Precondition(_))
    }
}

impl From<reqwest::Error> for CouchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CouchError::Timeout
        } else {
            CouchError::Transport(err)
        }
    }
}

impl From<serde_json::Error> for CouchError {
    fn from(err: serde_json::Error) -> Self {
        CouchError::Json(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let err = CouchError::NotFound {
            reason: "missing".into(),
        };
        assert_eq!(err.status_code(), Some(404));
        assert!(err.is_not_found());

        let err = CouchError::Conflict {
            reason: "Document update conflict.".into(),
        };
        assert_eq!(err.status_code(), Some(409));
        assert!(err.is_conflict());

        let err = CouchError::precondition("id may not be empty");
        assert_eq!(err.status_code(), None);
        assert!(err.is_precondition());
    }

    #[test]
    fn test_display_carries_server_message() {
        let err = CouchError::Server {
            status: 500,
            message: "500 Internal Server Error: {\"error\":\"boom\"}".into(),
        };
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_json_error_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = CouchError::from(parse);
        assert!(matches!(err, CouchError::Json(_)));
    }
}
