//! The external processing routine.
//!
//! A processor takes a request id and returns a JSON payload. The worker
//! treats `{"status": "success", ...}` as success and everything else,
//! including an `Err`, as failure.

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::RequestId;
use crate::error::QueueResult;

#[async_trait]
pub trait RequestProcessor: Send + Sync {
    async fn process(&self, request_id: &RequestId) -> QueueResult<Value>;
}

/// Adapts an async closure into a `RequestProcessor`.
///
/// ```ignore
/// let processor = FnProcessor::new(|id: RequestId| async move {
///     Ok(json!({"status": "success", "fixed": id.as_str()}))
/// });
/// ```
pub struct FnProcessor<F> {
    f: F,
}

impl<F> FnProcessor<F> {
    pub fn new<Fut>(f: F) -> Self
    where
        F: Fn(RequestId) -> Fut + Send + Sync,
        Fut: Future<Output = QueueResult<Value>> + Send + 'static,
    {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> RequestProcessor for FnProcessor<F>
where
    F: Fn(RequestId) -> Fut + Send + Sync,
    Fut: Future<Output = QueueResult<Value>> + Send + 'static,
{
    async fn process(&self, request_id: &RequestId) -> QueueResult<Value> {
        (self.f)(request_id.clone()).await
    }
}

/// Did the routine report success?
pub fn is_success(response: &Value) -> bool {
    response.get("status").and_then(Value::as_str) == Some("success")
}
