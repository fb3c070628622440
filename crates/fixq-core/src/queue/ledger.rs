//! Process-local status ledger for the broker backend.
//!
//! A broker can deliver messages but cannot answer "what is the latest event
//! for this request?". `BrokerQueue` records every event it publishes or
//! claims here and answers `latest_event` / `pending` from it. The ledger only
//! knows what this process has seen.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::domain::{RequestId, RequestStatus, StatusEvent};

#[derive(Default)]
pub struct StatusLedger {
    /// Events per topic, in insertion order.
    topics: Mutex<HashMap<String, Vec<StatusEvent>>>,
}

impl StatusLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<StatusEvent>>> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, event: StatusEvent) {
        self.lock()
            .entry(event.topic.clone())
            .or_default()
            .push(event);
    }

    /// Move the oldest queued entry of `request_id` on `topic` to
    /// `processing` and return it as it was before.
    ///
    /// Deliveries published by another process have no entry; `unseen`
    /// builds one, which is recorded as already claimed.
    pub fn claim(
        &self,
        topic: &str,
        request_id: &RequestId,
        claimed_at: DateTime<Utc>,
        unseen: impl FnOnce() -> StatusEvent,
    ) -> StatusEvent {
        let mut topics = self.lock();
        let entries = topics.entry(topic.to_string()).or_default();

        let oldest = entries
            .iter_mut()
            .filter(|e| &e.request_id == request_id && e.status == RequestStatus::Queued)
            .min_by_key(|e| e.timestamp);
        if let Some(entry) = oldest {
            let before = entry.clone();
            entry.status = RequestStatus::Processing;
            entry.processing_start = Some(claimed_at);
            return before;
        }

        let before = unseen();
        let mut claimed = before.clone();
        claimed.status = RequestStatus::Processing;
        claimed.processing_start = Some(claimed_at);
        entries.push(claimed);
        before
    }

    pub fn latest(&self, topic: &str, request_id: &RequestId) -> Option<StatusEvent> {
        let topics = self.lock();
        let mut latest: Option<&StatusEvent> = None;
        for event in topics.get(topic).into_iter().flatten() {
            if &event.request_id != request_id {
                continue;
            }
            match latest {
                Some(current) if !event.supersedes(current) => {}
                _ => latest = Some(event),
            }
        }
        latest.cloned()
    }

    /// Queued entries of `topic`, oldest first.
    pub fn queued(&self, topic: &str) -> Vec<StatusEvent> {
        let topics = self.lock();
        let mut queued: Vec<StatusEvent> = topics
            .get(topic)
            .into_iter()
            .flatten()
            .filter(|e| e.status == RequestStatus::Queued)
            .cloned()
            .collect();
        queued.sort_by_key(|e| e.timestamp);
        queued
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

    fn event(topic: &str, new: NewEvent, ts: DateTime<Utc>) -> StatusEvent {
        StatusEvent::record(EventId::generate(0), topic, new, ts)
    }

    #[test]
    fn claim_marks_oldest_queued_entry() {
        let ledger = StatusLedger::new();
        ledger.record(event("q", NewEvent::queued("job-1", 0), at(2)));
        ledger.record(event("q", NewEvent::queued("job-1", 1), at(1)));

        let before = ledger.claim("q", &RequestId::from("job-1"), at(3), || {
            unreachable!("entry exists")
        });
        assert_eq!(before.retry_count, 1);
        assert_eq!(before.status, RequestStatus::Queued);

        let queued = ledger.queued("q");
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].retry_count, 0);
    }

    #[test]
    fn claim_of_unseen_delivery_is_recorded_as_processing() {
        let ledger = StatusLedger::new();
        let id = RequestId::from("remote");

        let before = ledger.claim("q", &id, at(5), || {
            event("q", NewEvent::queued("remote", 0), at(4))
        });
        assert_eq!(before.status, RequestStatus::Queued);

        let latest = ledger.latest("q", &id).unwrap();
        assert_eq!(latest.status, RequestStatus::Processing);
        assert_eq!(latest.processing_start, Some(at(5)));
        assert!(ledger.queued("q").is_empty());
    }

    #[test]
    fn latest_prefers_timestamp_then_insertion() {
        let ledger = StatusLedger::new();
        let id = RequestId::from("job-1");
        ledger.record(event("s", NewEvent::queued("job-1", 0), at(1)));
        ledger.record(event("s", NewEvent::processing("job-1", 0), at(2)));
        ledger.record(event(
            "s",
            NewEvent::completed("job-1", 0, serde_json::json!({})),
            at(2),
        ));

        assert_eq!(ledger.latest("s", &id).unwrap().status, RequestStatus::Completed);
        assert!(ledger.latest("other", &id).is_none());
    }
}
