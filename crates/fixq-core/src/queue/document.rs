//! Document-store backed queue.
//!
//! `claim_next` is one conditional find-and-update per attempt, repeated every
//! `poll_interval` until the deadline. The poll never sleeps past the deadline,
//! so an empty topic answers `None` after `timeout` and no later than one
//! interval beyond it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use super::BackendKind;
use crate::domain::{ClaimedJob, EventId, NewEvent, RequestId, RequestStatus, StatusEvent};
use crate::error::{QueueError, QueueResult};
use crate::ports::{DocumentStore, MonotonicStamp, QueueBackend};

/// Default interval between claim attempts on an empty topic.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct DocumentStoreQueue<S> {
    store: S,
    kind: BackendKind,
    stamp: MonotonicStamp,
    poll_interval: Duration,
    closed: AtomicBool,
}

impl<S: DocumentStore> DocumentStoreQueue<S> {
    pub fn new(store: S, kind: BackendKind) -> Self {
        Self {
            store,
            kind,
            stamp: MonotonicStamp::system(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_stamp(mut self, stamp: MonotonicStamp) -> Self {
        self.stamp = stamp;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn ensure_open(&self) -> QueueResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl<S: DocumentStore> QueueBackend for DocumentStoreQueue<S> {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn publish(&self, topic: &str, event: NewEvent) -> QueueResult<RequestId> {
        self.ensure_open()?;
        let timestamp = self.stamp.next();
        let event_id = EventId::generate(timestamp.timestamp_millis().max(0) as u64);
        let request_id = event.request_id.clone();
        let status = event.status;

        self.store
            .insert(StatusEvent::record(event_id, topic, event, timestamp))
            .await?;
        debug!(topic, request_id = %request_id, %status, event_id = %event_id, "event published");
        Ok(request_id)
    }

    async fn claim_next(&self, topic: &str, timeout: Duration) -> QueueResult<Option<ClaimedJob>> {
        self.ensure_open()?;
        let deadline = Instant::now() + timeout;
        loop {
            let claimed_at = self.stamp.now();
            if let Some(before) = self.store.claim_oldest_queued(topic, claimed_at).await? {
                debug!(topic, request_id = %before.request_id, "claimed");
                return Ok(Some(ClaimedJob::claim(before, claimed_at)));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn latest_event(
        &self,
        topic: &str,
        request_id: &RequestId,
    ) -> QueueResult<Option<StatusEvent>> {
        self.ensure_open()?;
        self.store.find_latest(topic, request_id).await
    }

    async fn pending(&self, topic: &str) -> QueueResult<Vec<StatusEvent>> {
        self.ensure_open()?;
        self.store.find_by_status(topic, RequestStatus::Queued).await
    }

    async fn close(&self) -> QueueResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(backend = %self.kind, "closing queue backend");
        self.store.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryDocumentStore;

    fn queue() -> DocumentStoreQueue<InMemoryDocumentStore> {
        DocumentStoreQueue::new(InMemoryDocumentStore::new(), BackendKind::Memory)
    }

    #[tokio::test]
    async fn publish_then_latest_status_is_queued() {
        let queue = queue();
        let id = queue
            .publish("request_queue", NewEvent::queued("job-1", 0))
            .await
            .unwrap();

        assert_eq!(id.as_str(), "job-1");
        assert_eq!(
            queue.latest_status("request_queue", &id).await.unwrap(),
            Some(RequestStatus::Queued)
        );
        assert_eq!(queue.latest_status("status_queue", &id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn claim_sets_processing_and_leaves_it_out_of_pending() {
        let queue = queue();
        queue.publish("q", NewEvent::queued("job-1", 0)).await.unwrap();
        queue.publish("q", NewEvent::queued("job-2", 0)).await.unwrap();

        let job = queue.claim_next("q", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(job.request_id().as_str(), "job-1");
        assert!(job.processing_start().is_some());

        let pending = queue.pending("q").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].request_id.as_str(), "job-2");
        assert_eq!(
            queue.latest_status("q", job.request_id()).await.unwrap(),
            Some(RequestStatus::Processing)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn claim_picks_up_event_published_while_polling() {
        let queue = std::sync::Arc::new(queue());
        let claimer = tokio::spawn({
            let queue = queue.clone();
            async move { queue.claim_next("q", Duration::from_secs(5)).await }
        });

        tokio::time::sleep(Duration::from_millis(1200)).await;
        queue.publish("q", NewEvent::queued("late", 0)).await.unwrap();

        let job = claimer.await.unwrap().unwrap().unwrap();
        assert_eq!(job.request_id().as_str(), "late");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_final() {
        let queue = queue();
        queue.close().await.unwrap();
        queue.close().await.unwrap();
        assert!(matches!(
            queue.publish("q", NewEvent::queued("job-1", 0)).await,
            Err(QueueError::Closed)
        ));
        assert!(matches!(
            queue.claim_next("q", Duration::ZERO).await,
            Err(QueueError::Closed)
        ));
    }
}
