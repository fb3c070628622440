//! Read side: what clients poll.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::domain::{RequestId, RequestStatus, StatusEvent, Topics};
use crate::error::QueueResult;
use crate::ports::QueueBackend;

/// Latest known state of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub retry_count: u32,
    /// Seconds since the epoch, with microsecond fraction.
    pub last_updated: f64,
    pub response: Value,
}

impl From<StatusEvent> for StatusView {
    fn from(event: StatusEvent) -> Self {
        Self {
            request_id: event.request_id,
            status: event.status,
            retry_count: event.retry_count,
            last_updated: epoch_seconds(event.timestamp),
            response: event.response.unwrap_or_else(|| json!({})),
        }
    }
}

/// A request still waiting for a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingView {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub timestamp: f64,
}

impl From<StatusEvent> for PendingView {
    fn from(event: StatusEvent) -> Self {
        Self {
            request_id: event.request_id,
            status: event.status,
            timestamp: epoch_seconds(event.timestamp),
        }
    }
}

fn epoch_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}

/// Looked up by `StatusService::check`. Any answer, including none, means
/// the backend responded.
const HEALTH_CHECK_ID: &str = "__fixq_health__";

pub struct StatusService {
    backend: Arc<dyn QueueBackend>,
    topics: Topics,
}

impl StatusService {
    pub fn new(backend: Arc<dyn QueueBackend>, topics: Topics) -> Self {
        Self { backend, topics }
    }

    pub async fn request_status(&self, request_id: &RequestId) -> QueueResult<Option<StatusView>> {
        Ok(self
            .backend
            .latest_event(&self.topics.statuses, request_id)
            .await?
            .map(StatusView::from))
    }

    /// One cheap read against the backend. Errors when the store or broker
    /// cannot be reached or the backend has been closed.
    pub async fn check(&self) -> QueueResult<()> {
        self.backend
            .latest_event(&self.topics.statuses, &RequestId::from(HEALTH_CHECK_ID))
            .await
            .map(|_| ())
    }

    /// Unclaimed requests, oldest first.
    pub async fn pending(&self) -> QueueResult<Vec<PendingView>> {
        let events = self.backend.pending(&self.topics.requests).await?;
        Ok(events.into_iter().map(PendingView::from).collect())
    }
}
