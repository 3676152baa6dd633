use std::time::Duration;

use engine::EngineError;
use serde::{Deserialize, Serialize};

/// Errors surfaced at the service boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    /// Bad input shape or bounds. Never retried.
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Engine timed out: {0}")]
    EngineTimeout(String),
    #[error("Engine crashed: {0}")]
    EngineCrashed(String),
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),
    /// Unknown or expired job id.
    #[error("Job not found: {0}")]
    JobNotFound(String),
    /// Rejected before reaching the scheduler.
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationError,
    EngineTimeout,
    EngineCrashed,
    EngineUnavailable,
    JobNotFound,
    RateLimited,
}

/// Tagged error payload for the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

fn retry_after_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

impl AnalysisError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::EngineTimeout(_) => ErrorKind::EngineTimeout,
            Self::EngineCrashed(_) => ErrorKind::EngineCrashed,
            Self::EngineUnavailable(_) => ErrorKind::EngineUnavailable,
            Self::JobNotFound(_) => ErrorKind::JobNotFound,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
        }
    }

    /// HTTP status the transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::ValidationError => 400,
            ErrorKind::EngineTimeout | ErrorKind::EngineCrashed => 500,
            ErrorKind::EngineUnavailable => 503,
            ErrorKind::JobNotFound => 404,
            ErrorKind::RateLimited => 429,
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            kind: self.kind(),
            message: self.to_string(),
            retry_after_secs: match self {
                Self::RateLimited { retry_after } => Some(retry_after_secs(*retry_after)),
                _ => None,
            },
        }
    }
}

impl From<EngineError> for AnalysisError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Timeout(_) => Self::EngineTimeout(e.to_string()),
            // a worker that breaks protocol is treated as crashed and replaced
            EngineError::Crashed(_) | EngineError::Protocol(_) => Self::EngineCrashed(e.to_string()),
            EngineError::Unavailable(_) => Self::EngineUnavailable(e.to_string()),
        }
    }
}

impl From<chess::PgnError> for AnalysisError {
    fn from(e: chess::PgnError) -> Self {
        Self::Validation(format!("invalid PGN: {e}"))
    }
}

impl From<chess::FenError> for AnalysisError {
    fn from(e: chess::FenError) -> Self {
        Self::Validation(format!("invalid FEN: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AnalysisError::validation("x").status_code(), 400);
        assert_eq!(AnalysisError::EngineTimeout("x".into()).status_code(), 500);
        assert_eq!(AnalysisError::EngineCrashed("x".into()).status_code(), 500);
        assert_eq!(AnalysisError::EngineUnavailable("x".into()).status_code(), 503);
        assert_eq!(AnalysisError::JobNotFound("x".into()).status_code(), 404);
        let limited = AnalysisError::RateLimited {
            retry_after: Duration::from_secs(1),
        };
        assert_eq!(limited.status_code(), 429);
    }

    #[test]
    fn test_engine_errors_map_to_kinds() {
        let kind = |e: EngineError| AnalysisError::from(e).kind();
        assert_eq!(kind(EngineError::Timeout(Duration::from_secs(6))), ErrorKind::EngineTimeout);
        assert_eq!(kind(EngineError::Crashed("eof".into())), ErrorKind::EngineCrashed);
        assert_eq!(kind(EngineError::Protocol("no readyok".into())), ErrorKind::EngineCrashed);
        assert_eq!(kind(EngineError::Unavailable("down".into())), ErrorKind::EngineUnavailable);
    }

    #[test]
    fn test_rate_limited_response_rounds_up() {
        let e = AnalysisError::RateLimited {
            retry_after: Duration::from_millis(1500),
        };
        let response = e.to_response();
        assert_eq!(response.retry_after_secs, Some(2));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["kind"], "RateLimited");
        assert_eq!(json["retryAfterSecs"], 2);

        let json = serde_json::to_value(AnalysisError::validation("bad").to_response()).unwrap();
        assert_eq!(json["kind"], "ValidationError");
        assert!(json.get("retryAfterSecs").is_none());
    }
}
