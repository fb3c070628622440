//! Topic names shared by the lifecycle, the worker loop and the HTTP surface.

use serde::{Deserialize, Serialize};

/// Work to be claimed by a worker.
pub const REQUEST_QUEUE: &str = "request_queue";

/// Append-only audit trail of every status transition.
pub const STATUS_QUEUE: &str = "status_queue";

/// The pair of topics one deployment works on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topics {
    #[serde(default = "default_requests")]
    pub requests: String,
    #[serde(default = "default_statuses")]
    pub statuses: String,
}

fn default_requests() -> String {
    REQUEST_QUEUE.to_string()
}

fn default_statuses() -> String {
    STATUS_QUEUE.to_string()
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            statuses: default_statuses(),
        }
    }
}
