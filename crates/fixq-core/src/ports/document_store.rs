//! DocumentStore port: one collection of event documents per topic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{RequestId, RequestStatus, StatusEvent};
use crate::error::QueueResult;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Append one document to the event's topic collection.
    async fn insert(&self, event: StatusEvent) -> QueueResult<()>;

    /// Conditional find-and-update in a single indivisible step: match the
    /// oldest `queued` document of `topic`, set `status = processing` and
    /// `processing_start = claimed_at`, and return the document as it was
    /// before the update.
    async fn claim_oldest_queued(
        &self,
        topic: &str,
        claimed_at: DateTime<Utc>,
    ) -> QueueResult<Option<StatusEvent>>;

    async fn find_latest(
        &self,
        topic: &str,
        request_id: &RequestId,
    ) -> QueueResult<Option<StatusEvent>>;

    /// All documents of `topic` with `status`, ascending by timestamp.
    async fn find_by_status(
        &self,
        topic: &str,
        status: RequestStatus,
    ) -> QueueResult<Vec<StatusEvent>>;

    async fn close(&self) -> QueueResult<()>;
}
