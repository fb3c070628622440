//! Ports: the traits the core depends on.
//!
//! Each trait hides one external system (document store, message broker,
//! processing routine, error sink, clock). Implementations live in `impls`
//! and `queue`.

pub mod broker;
pub mod clock;
pub mod document_store;
pub mod error_log;
pub mod processor;
pub mod queue_backend;

pub use self::broker::{BrokerChannel, Delivery, DeliveryStream};
pub use self::clock::{Clock, FixedClock, MonotonicStamp, SystemClock};
pub use self::document_store::DocumentStore;
pub use self::error_log::{CollectingErrorLog, ErrorLog, TracingErrorLog, log_safe};
pub use self::processor::{FnProcessor, RequestProcessor, is_success};
pub use self::queue_backend::QueueBackend;
