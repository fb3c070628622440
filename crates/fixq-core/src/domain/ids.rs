//! Identifiers.
//!
//! `RequestId` is supplied by clients and carried verbatim. Everything the
//! queue mints itself (event ids, consumer tags) is a ULID wrapped in
//! `Id<T>`, where `T` is a zero-sized marker: the ids sort by creation time
//! and cannot be mixed up at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Opaque request identifier supplied by the client.
///
/// Not unique across the event log: every lifecycle transition of one
/// request produces another event with the same `RequestId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Marker trait for ULID-backed ids. Provides the display prefix.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// Mint an id whose time component is `timestamp_ms`.
    pub fn generate(timestamp_ms: u64) -> Self {
        Self::from_ulid(Ulid::from_parts(timestamp_ms, rand::random()))
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Event {}

impl IdMarker for Event {
    fn prefix() -> &'static str {
        "evt-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Consumer {}

impl IdMarker for Consumer {
    fn prefix() -> &'static str {
        "consumer-"
    }
}

/// Identifier of one stored event / broker message.
pub type EventId = Id<Event>;

/// Tag of a streaming broker consumer.
pub type ConsumerTag = Id<Consumer>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_serializes_as_plain_string() {
        let id = RequestId::from("job-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"job-42\"");
        let back: RequestId = serde_json::from_str("\"job-42\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn ulid_ids_carry_their_prefix() {
        let event = EventId::generate(1_700_000_000_000);
        let consumer = ConsumerTag::from_ulid(Ulid::new());

        assert!(event.to_string().starts_with("evt-"));
        assert!(consumer.to_string().starts_with("consumer-"));
        // let _: EventId = consumer; // <- does not compile
    }

    #[test]
    fn generated_ids_sort_by_timestamp() {
        let earlier = EventId::generate(1_000);
        let later = EventId::generate(2_000);
        assert!(earlier < later);
        assert_eq!(earlier.as_ulid().timestamp_ms(), 1_000);
    }

    #[test]
    fn marker_does_not_add_size() {
        assert_eq!(std::mem::size_of::<EventId>(), std::mem::size_of::<Ulid>());
    }
}
