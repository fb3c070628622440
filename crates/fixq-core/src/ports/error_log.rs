//! ErrorLog port: best-effort error reporting.
//!
//! Reporting an error must never create a new one for the caller, so every
//! call site goes through `log_safe`.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;

use crate::error::{QueueError, QueueResult};

pub trait ErrorLog: Send + Sync {
    /// Record that `function` failed with `error`.
    fn log_error(&self, function: &str, error: &QueueError) -> QueueResult<()>;
}

/// Emits one `tracing` error event per report.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorLog;

impl ErrorLog for TracingErrorLog {
    fn log_error(&self, function: &str, error: &QueueError) -> QueueResult<()> {
        tracing::error!(
            function,
            error = %error,
            transient = error.is_transient(),
            "operation failed"
        );
        Ok(())
    }
}

/// Keeps reports in memory. Used by tests and local tooling.
#[derive(Debug, Default)]
pub struct CollectingErrorLog {
    entries: Mutex<Vec<(String, String)>>,
}

impl CollectingErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(function, error message)` pairs in report order.
    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl ErrorLog for CollectingErrorLog {
    fn log_error(&self, function: &str, error: &QueueError) -> QueueResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| QueueError::Processing("error log poisoned".to_string()))?;
        entries.push((function.to_string(), error.to_string()));
        Ok(())
    }
}

/// Report `error`, swallowing any failure (or panic) of the logger itself.
pub fn log_safe(log: &dyn ErrorLog, function: &str, error: &QueueError) {
    match catch_unwind(AssertUnwindSafe(|| log.log_error(function, error))) {
        Ok(Ok(())) => {}
        Ok(Err(log_err)) => {
            tracing::warn!(function, error = %error, log_error = %log_err, "error logger failed");
        }
        Err(_) => {
            tracing::warn!(function, error = %error, "error logger panicked");
        }
    }
}
