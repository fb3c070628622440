//! Application layer: ports wired into the request lifecycle.
//!
//! - `RequestLifecycle`: submit/retry admission and the retry bound
//! - `WorkerLoop`: claim → process → record
//! - `StatusService`: status and pending queries

pub mod lifecycle;
pub mod status;
pub mod worker_loop;

pub use self::lifecycle::{Admission, MAX_RETRIES, RequestLifecycle};
pub use self::status::{PendingView, StatusService, StatusView};
pub use self::worker_loop::{Tick, WorkerHandle, WorkerLoop, WorkerStats};
