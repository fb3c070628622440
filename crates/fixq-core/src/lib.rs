//! fixq-core
//!
//! Job queue for asynchronous "fix this code" requests.
//!
//! # Modules
//! - **domain**: request ids, statuses, status events, topic names
//! - **ports**: traits for the queue backend, document store, broker,
//!   processing routine, error log and clock
//! - **impls**: in-memory, MongoDB and RabbitMQ implementations of the ports
//! - **queue**: the two `QueueBackend`s and the factory that picks one
//! - **app**: request lifecycle with bounded retries, worker loop, status queries
//! - **config**, **error**, **observability**: ambient plumbing

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;

pub use error::{QueueError, QueueResult};
