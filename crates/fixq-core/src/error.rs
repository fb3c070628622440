use thiserror::Error;

use crate::domain::RequestId;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Store or broker unreachable / operation failed. Retry with backoff.
    #[error("backend unavailable: {0}")]
    Transient(String),

    #[error(
        "retry limit exceeded for request_id={request_id} (retry_count={retry_count}, max={max_retries})"
    )]
    RetryLimitExceeded {
        request_id: RequestId,
        retry_count: u32,
        max_retries: u32,
    },

    /// The external processing routine failed.
    #[error("processing failed: {0}")]
    Processing(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    /// A stored document or broker body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("request not found: {0}")]
    NotFound(RequestId),

    #[error("queue backend is closed")]
    Closed,
}

impl QueueError {
    pub fn transient(message: impl Into<String>) -> Self {
        QueueError::Transient(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        QueueError::Configuration(message.into())
    }

    /// Should the caller back off and try again?
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Transient(_))
    }

    /// Code reported in HTTP bodies for this error.
    pub fn http_code(&self) -> u16 {
        match self {
            QueueError::RetryLimitExceeded { .. } => 429,
            QueueError::NotFound(_) => 404,
            QueueError::Transient(_) => 503,
            QueueError::Processing(_)
            | QueueError::Configuration(_)
            | QueueError::Decode(_)
            | QueueError::Closed => 500,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Decode(err.to_string())
    }
}

#[cfg(feature = "rabbitmq")]
impl From<lapin::Error> for QueueError {
    fn from(err: lapin::Error) -> Self {
        QueueError::Transient(format!("amqp: {err}"))
    }
}

#[cfg(feature = "mongodb")]
impl From<mongodb::error::Error> for QueueError {
    fn from(err: mongodb::error::Error) -> Self {
        QueueError::Transient(format!("mongodb: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_limit_maps_to_429() {
        let err = QueueError::RetryLimitExceeded {
            request_id: RequestId::from("job-1"),
            retry_count: 3,
            max_retries: 3,
        };
        assert_eq!(err.http_code(), 429);
        assert!(!err.is_transient());
        assert!(err.to_string().contains("job-1"));
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(QueueError::transient("connection refused").is_transient());
        assert!(!QueueError::config("bad vendor").is_transient());
        assert!(!QueueError::Closed.is_transient());
    }
}
