//! Queue backends.
//!
//! - `DocumentStoreQueue`: conditional find-and-update as the claim, polling
//!   as the wait.
//! - `BrokerQueue`: durable persistent queue, ack-after-claim, streaming mode.
//! - `QueueFactory`: picks one from configuration.

mod broker;
mod document;
mod factory;
mod ledger;

pub use broker::{BrokerQueue, EventHandler, MAX_CONSECUTIVE_STREAM_ERRORS};
pub use document::{DEFAULT_POLL_INTERVAL, DocumentStoreQueue};
pub use factory::{BackendKind, QueueFactory};
pub use ledger::StatusLedger;
