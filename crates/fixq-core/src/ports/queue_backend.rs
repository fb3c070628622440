//! QueueBackend port: the seam between the lifecycle/worker and storage.
//!
//! Implementations:
//! - `queue::DocumentStoreQueue` (conditional find-and-update + polling)
//! - `queue::BrokerQueue` (durable queue, ack-after-claim)

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{ClaimedJob, NewEvent, RequestId, RequestStatus, StatusEvent};
use crate::error::QueueResult;
use crate::queue::BackendKind;

#[async_trait]
pub trait QueueBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Append an event to `topic`. Never waits for a consumer.
    async fn publish(&self, topic: &str, event: NewEvent) -> QueueResult<RequestId>;

    /// Atomically take the oldest queued event on `topic` and move it to
    /// `processing`. `Ok(None)` when nothing was queued within `timeout`.
    ///
    /// At most one caller receives any given event.
    async fn claim_next(&self, topic: &str, timeout: Duration) -> QueueResult<Option<ClaimedJob>>;

    /// Event with the greatest timestamp for `(topic, request_id)`.
    async fn latest_event(
        &self,
        topic: &str,
        request_id: &RequestId,
    ) -> QueueResult<Option<StatusEvent>>;

    async fn latest_status(
        &self,
        topic: &str,
        request_id: &RequestId,
    ) -> QueueResult<Option<RequestStatus>> {
        Ok(self
            .latest_event(topic, request_id)
            .await?
            .map(|event| event.status))
    }

    /// Events on `topic` still waiting to be claimed, oldest first.
    async fn pending(&self, topic: &str) -> QueueResult<Vec<StatusEvent>>;

    /// Release connections. Idempotent; later operations fail with
    /// `QueueError::Closed`.
    async fn close(&self) -> QueueResult<()>;
}
