use bookgen_core::{FailureKind, LanguageModelError};
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to parse response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),
    #[error("unexpected http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("API response contained no content")]
    EmptyResponse,
}

impl AdapterError {
    /// Whether repeating the same request later may succeed.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AdapterError::Http(err) => {
                if err.is_decode() || err.is_builder() {
                    FailureKind::Permanent
                } else if let Some(status) = err.status() {
                    status_failure_kind(status)
                } else {
                    FailureKind::Transient
                }
            }
            AdapterError::HttpStatus { status, .. } => status_failure_kind(*status),
            AdapterError::Json(_) | AdapterError::InvalidConfig(_) | AdapterError::EmptyResponse => {
                FailureKind::Permanent
            }
        }
    }
}

/// 408, 429 and 5xx are worth retrying; every other status is final.
pub fn status_failure_kind(status: StatusCode) -> FailureKind {
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        FailureKind::Transient
    } else {
        FailureKind::Permanent
    }
}

impl From<AdapterError> for LanguageModelError {
    fn from(err: AdapterError) -> Self {
        LanguageModelError::new(err.failure_kind(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> AdapterError {
        AdapterError::HttpStatus {
            status: StatusCode::from_u16(code).unwrap(),
            body: String::new(),
        }
    }

    #[test]
    fn retryable_statuses_are_transient() {
        for code in [408, 429, 500, 502, 503, 504] {
            assert_eq!(status(code).failure_kind(), FailureKind::Transient, "{code}");
        }
    }

    #[test]
    fn client_errors_are_permanent() {
        for code in [400, 401, 403, 404, 422] {
            assert_eq!(status(code).failure_kind(), FailureKind::Permanent, "{code}");
        }
        assert_eq!(
            AdapterError::EmptyResponse.failure_kind(),
            FailureKind::Permanent
        );
        assert_eq!(
            AdapterError::InvalidConfig("no model".into()).failure_kind(),
            FailureKind::Permanent
        );
    }

    #[test]
    fn conversion_keeps_the_classification() {
        let err: LanguageModelError = status(503).into();
        assert!(err.is_transient());
        assert!(err.to_string().contains("503"));

        let err: LanguageModelError = status(401).into();
        assert!(!err.is_transient());
    }
}
