//! Domain model: identifiers, request status, events, topic names.

pub mod event;
pub mod ids;
pub mod status;
pub mod topics;

pub use event::{ClaimedJob, NewEvent, StatusEvent, decode_body, encode_body};
pub use ids::{ConsumerTag, EventId, Id, IdMarker, RequestId};
pub use status::RequestStatus;
pub use topics::{REQUEST_QUEUE, STATUS_QUEUE, Topics};
