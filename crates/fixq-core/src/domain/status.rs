//! Request lifecycle state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Status of one request.
///
/// State transitions:
/// - Queued -> Processing -> Completed
/// - Queued -> Processing -> Failed
/// - Failed -> Queued (retry, bounded by `MAX_RETRIES`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Waiting to be claimed.
    Queued,

    /// Claimed by a worker.
    Processing,

    /// The processing routine reported success.
    Completed,

    /// The processing routine failed or reported a non-success payload.
    Failed,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Queued => "queued",
            RequestStatus::Processing => "processing",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }

    /// Queued or processing: an attempt is in flight.
    pub fn is_active(self) -> bool {
        matches!(self, RequestStatus::Queued | RequestStatus::Processing)
    }

    /// Completed or failed.
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }

    /// Is `self -> next` an edge of the lifecycle?
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Queued, Processing) | (Processing, Completed) | (Processing, Failed) | (Failed, Queued)
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Ok(RequestStatus::Queued),
            "processing" => Ok(RequestStatus::Processing),
            "completed" => Ok(RequestStatus::Completed),
            "failed" => Ok(RequestStatus::Failed),
            other => Err(QueueError::Decode(format!("unknown status: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::claim(RequestStatus::Queued, RequestStatus::Processing, true)]
    #[case::complete(RequestStatus::Processing, RequestStatus::Completed, true)]
    #[case::fail(RequestStatus::Processing, RequestStatus::Failed, true)]
    #[case::retry(RequestStatus::Failed, RequestStatus::Queued, true)]
    #[case::skip_processing(RequestStatus::Queued, RequestStatus::Completed, false)]
    #[case::reopen_completed(RequestStatus::Completed, RequestStatus::Queued, false)]
    #[case::double_claim(RequestStatus::Processing, RequestStatus::Processing, false)]
    fn lifecycle_edges(
        #[case] from: RequestStatus,
        #[case] to: RequestStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn serializes_lowercase() {
        let s = serde_json::to_string(&RequestStatus::Processing).unwrap();
        assert_eq!(s, "\"processing\"");
        assert_eq!("Completed".parse::<RequestStatus>().unwrap(), RequestStatus::Completed);
        assert!("done".parse::<RequestStatus>().is_err());
    }

    #[test]
    fn active_and_terminal_are_disjoint() {
        for status in [
            RequestStatus::Queued,
            RequestStatus::Processing,
            RequestStatus::Completed,
            RequestStatus::Failed,
        ] {
            assert_ne!(status.is_active(), status.is_terminal());
        }
    }
}
