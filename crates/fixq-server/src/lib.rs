//! fixq-server
//!
//! HTTP surface over the fixq job queue, plus the adapter that calls the
//! external repair routine over HTTP.

pub mod processor;
pub mod routes;

pub use processor::HttpProcessor;
pub use routes::{AppState, router};
