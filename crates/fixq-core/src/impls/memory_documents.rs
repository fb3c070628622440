//! In-memory document store.
//!
//! Backs the `memory` vendor and the test suite. One vector of documents per
//! topic, all topics behind a single async mutex: holding the lock across
//! select-and-transition is what makes `claim_oldest_queued` indivisible.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{RequestId, RequestStatus, StatusEvent};
use crate::error::{QueueError, QueueResult};
use crate::ports::DocumentStore;

#[derive(Default)]
struct Collections {
    /// Documents per topic, in insertion order.
    topics: HashMap<String, Vec<StatusEvent>>,
}

impl Collections {
    fn topic(&self, topic: &str) -> &[StatusEvent] {
        self.topics.get(topic).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Index of the oldest queued document. Equal timestamps go to the
    /// earlier insertion.
    fn oldest_queued(&self, topic: &str) -> Option<usize> {
        let mut oldest: Option<(usize, DateTime<Utc>)> = None;
        for (idx, doc) in self.topic(topic).iter().enumerate() {
            if doc.status != RequestStatus::Queued {
                continue;
            }
            match oldest {
                Some((_, ts)) if ts <= doc.timestamp => {}
                _ => oldest = Some((idx, doc.timestamp)),
            }
        }
        oldest.map(|(idx, _)| idx)
    }
}

#[derive(Default)]
pub struct InMemoryDocumentStore {
    collections: Mutex<Collections>,
    closed: AtomicBool,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents stored under `topic`.
    pub async fn len(&self, topic: &str) -> usize {
        self.collections.lock().await.topic(topic).len()
    }

    pub async fn is_empty(&self, topic: &str) -> bool {
        self.len(topic).await == 0
    }

    /// Every document of `topic` for `request_id`, in insertion order.
    pub async fn history(&self, topic: &str, request_id: &RequestId) -> Vec<StatusEvent> {
        self.collections
            .lock()
            .await
            .topic(topic)
            .iter()
            .filter(|doc| &doc.request_id == request_id)
            .cloned()
            .collect()
    }

    fn ensure_open(&self) -> QueueResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn insert(&self, event: StatusEvent) -> QueueResult<()> {
        self.ensure_open()?;
        let mut collections = self.collections.lock().await;
        collections
            .topics
            .entry(event.topic.clone())
            .or_default()
            .push(event);
        Ok(())
    }

    async fn claim_oldest_queued(
        &self,
        topic: &str,
        claimed_at: DateTime<Utc>,
    ) -> QueueResult<Option<StatusEvent>> {
        self.ensure_open()?;
        let mut collections = self.collections.lock().await;
        let Some(idx) = collections.oldest_queued(topic) else {
            return Ok(None);
        };
        let Some(doc) = collections
            .topics
            .get_mut(topic)
            .and_then(|docs| docs.get_mut(idx))
        else {
            return Ok(None);
        };

        let before = doc.clone();
        doc.status = RequestStatus::Processing;
        doc.processing_start = Some(claimed_at);
        Ok(Some(before))
    }

    async fn find_latest(
        &self,
        topic: &str,
        request_id: &RequestId,
    ) -> QueueResult<Option<StatusEvent>> {
        self.ensure_open()?;
        let collections = self.collections.lock().await;
        let mut latest: Option<&StatusEvent> = None;
        for doc in collections.topic(topic) {
            if &doc.request_id != request_id {
                continue;
            }
            match latest {
                Some(current) if !doc.supersedes(current) => {}
                _ => latest = Some(doc),
            }
        }
        Ok(latest.cloned())
    }

    async fn find_by_status(
        &self,
        topic: &str,
        status: RequestStatus,
    ) -> QueueResult<Vec<StatusEvent>> {
        self.ensure_open()?;
        let collections = self.collections.lock().await;
        let mut docs: Vec<StatusEvent> = collections
            .topic(topic)
            .iter()
            .filter(|doc| doc.status == status)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        docs.sort_by_key(|doc| doc.timestamp);
        Ok(docs)
    }

    async fn close(&self) -> QueueResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventId, NewEvent};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn doc(topic: &str, event: NewEvent, ts: DateTime<Utc>) -> StatusEvent {
        StatusEvent::record(EventId::generate(0), topic, event, ts)
    }

    #[tokio::test]
    async fn claim_returns_pre_update_document_and_transitions_it() {
        let store = InMemoryDocumentStore::new();
        store
            .insert(doc("q", NewEvent::queued("job-1", 0), at(1)))
            .await
            .unwrap();

        let before = store.claim_oldest_queued("q", at(2)).await.unwrap().unwrap();
        assert_eq!(before.status, RequestStatus::Queued);
        assert_eq!(before.processing_start, None);

        let stored = store.history("q", &RequestId::from("job-1")).await;
        assert_eq!(stored[0].status, RequestStatus::Processing);
        assert_eq!(stored[0].processing_start, Some(at(2)));

        assert!(store.claim_oldest_queued("q", at(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claims_oldest_timestamp_first_and_breaks_ties_by_insertion() {
        let store = InMemoryDocumentStore::new();
        store.insert(doc("q", NewEvent::queued("late", 0), at(9))).await.unwrap();
        store.insert(doc("q", NewEvent::queued("tie-a", 0), at(5))).await.unwrap();
        store.insert(doc("q", NewEvent::queued("tie-b", 0), at(5))).await.unwrap();

        let mut order = Vec::new();
        while let Some(doc) = store.claim_oldest_queued("q", at(10)).await.unwrap() {
            order.push(doc.request_id.to_string());
        }
        assert_eq!(order, ["tie-a", "tie-b", "late"]);
    }

    #[tokio::test]
    async fn topics_do_not_interact() {
        let store = InMemoryDocumentStore::new();
        store.insert(doc("a", NewEvent::queued("job-1", 0), at(1))).await.unwrap();

        assert!(store.claim_oldest_queued("b", at(2)).await.unwrap().is_none());
        assert!(
            store
                .find_latest("b", &RequestId::from("job-1"))
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(store.len("a").await, 1);
        assert!(store.is_empty("b").await);
    }

    #[tokio::test]
    async fn latest_is_greatest_timestamp_then_last_write() {
        let store = InMemoryDocumentStore::new();
        let id = RequestId::from("job-1");
        store.insert(doc("s", NewEvent::queued("job-1", 0), at(1))).await.unwrap();
        store.insert(doc("s", NewEvent::processing("job-1", 0), at(3))).await.unwrap();
        // Written later with an older timestamp: not the latest.
        store.insert(doc("s", NewEvent::queued("job-1", 0), at(2))).await.unwrap();

        let latest = store.find_latest("s", &id).await.unwrap().unwrap();
        assert_eq!(latest.status, RequestStatus::Processing);

        store
            .insert(doc("s", NewEvent::failed("job-1", 0, serde_json::json!({})), at(3)))
            .await
            .unwrap();
        let latest = store.find_latest("s", &id).await.unwrap().unwrap();
        assert_eq!(latest.status, RequestStatus::Failed);
    }

    #[tokio::test]
    async fn operations_after_close_fail() {
        let store = InMemoryDocumentStore::new();
        store.close().await.unwrap();
        store.close().await.unwrap();

        let err = store
            .insert(doc("q", NewEvent::queued("job-1", 0), at(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Closed));
    }
}
