//! Status events: the unit of record on every topic.
//!
//! Events are append-only. The "current" status of a request on a topic is the
//! event with the greatest `timestamp` for that `(topic, request_id)` pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{EventId, RequestId, RequestStatus};
use crate::error::{QueueError, QueueResult};

/// Payload handed to `QueueBackend::publish`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub request_id: RequestId,

    #[serde(default = "default_status")]
    pub status: RequestStatus,

    #[serde(default)]
    pub retry_count: u32,

    /// Result of the processing routine. Only set on terminal events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

fn default_status() -> RequestStatus {
    RequestStatus::Queued
}

impl NewEvent {
    pub fn queued(request_id: impl Into<RequestId>, retry_count: u32) -> Self {
        Self {
            request_id: request_id.into(),
            status: RequestStatus::Queued,
            retry_count,
            response: None,
        }
    }

    pub fn processing(request_id: impl Into<RequestId>, retry_count: u32) -> Self {
        Self {
            request_id: request_id.into(),
            status: RequestStatus::Processing,
            retry_count,
            response: None,
        }
    }

    pub fn completed(request_id: impl Into<RequestId>, retry_count: u32, response: Value) -> Self {
        Self {
            request_id: request_id.into(),
            status: RequestStatus::Completed,
            retry_count,
            response: Some(response),
        }
    }

    pub fn failed(request_id: impl Into<RequestId>, retry_count: u32, response: Value) -> Self {
        Self {
            request_id: request_id.into(),
            status: RequestStatus::Failed,
            retry_count,
            response: Some(response),
        }
    }
}

/// A stored event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub event_id: EventId,
    pub topic: String,
    pub request_id: RequestId,
    pub status: RequestStatus,

    #[serde(with = "chrono::serde::ts_microseconds")]
    pub timestamp: DateTime<Utc>,

    pub retry_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,

    #[serde(default, with = "chrono::serde::ts_microseconds_option")]
    pub processing_start: Option<DateTime<Utc>>,
}

impl StatusEvent {
    pub fn record(
        event_id: EventId,
        topic: impl Into<String>,
        event: NewEvent,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id,
            topic: topic.into(),
            request_id: event.request_id,
            status: event.status,
            timestamp,
            retry_count: event.retry_count,
            response: event.response,
            processing_start: None,
        }
    }

    /// Does `self` supersede `other` as the latest event?
    ///
    /// Equal timestamps resolve to the later write, so callers must feed
    /// events in insertion order.
    pub fn supersedes(&self, other: &StatusEvent) -> bool {
        self.timestamp >= other.timestamp
    }
}

/// A job returned by a successful claim.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    event: StatusEvent,
    redelivered: bool,
}

impl ClaimedJob {
    /// Transition a queued event to `processing`, stamped with the claim time.
    pub fn claim(mut event: StatusEvent, claimed_at: DateTime<Utc>) -> Self {
        event.status = RequestStatus::Processing;
        event.processing_start = Some(claimed_at);
        Self {
            event,
            redelivered: false,
        }
    }

    /// Mark a job that the broker delivered more than once.
    pub fn with_redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    pub fn request_id(&self) -> &RequestId {
        &self.event.request_id
    }

    pub fn retry_count(&self) -> u32 {
        self.event.retry_count
    }

    pub fn processing_start(&self) -> Option<DateTime<Utc>> {
        self.event.processing_start
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn event(&self) -> &StatusEvent {
        &self.event
    }

    pub fn into_event(self) -> StatusEvent {
        self.event
    }
}

/// Serialize a publish payload for the broker.
pub fn encode_body(event: &NewEvent) -> QueueResult<Vec<u8>> {
    Ok(serde_json::to_vec(event)?)
}

/// Decode a broker message body.
///
/// - JSON object: a full `NewEvent` (missing `status` is `queued`, missing
///   `retry_count` is 0).
/// - JSON string, other JSON scalars, or plain text: a queued event whose
///   request id is the text itself.
/// - Empty body or invalid UTF-8: `QueueError::Decode`.
pub fn decode_body(body: &[u8]) -> QueueResult<NewEvent> {
    let text = std::str::from_utf8(body)
        .map_err(|e| QueueError::Decode(format!("body is not UTF-8: {e}")))?
        .trim();
    if text.is_empty() {
        return Err(QueueError::Decode("empty message body".to_string()));
    }

    match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => Ok(serde_json::from_value(value)?),
        Ok(Value::String(request_id)) if !request_id.is_empty() => {
            Ok(NewEvent::queued(request_id, 0))
        }
        Ok(Value::String(_)) => Err(QueueError::Decode("empty request id".to_string())),
        Ok(_) | Err(_) => Ok(NewEvent::queued(text, 0)),
    }
}
