//! Request lifecycle and bounded retry policy.
//!
//! The latest event on the status topic decides what a new submit or retry
//! may do:
//!
//! | latest            | outcome                                  |
//! |-------------------|------------------------------------------|
//! | none (submit)     | admitted, `retry_count = 0`              |
//! | none (retry)      | `NotFound`                               |
//! | queued/processing | `InProgress`, nothing written            |
//! | completed         | `AlreadyCompleted`, nothing written      |
//! | failed            | admitted with `retry_count + 1` while it stays below `MAX_RETRIES`, else `RetryLimitExceeded` |
//!
//! Reading the latest event and publishing the new one happen under a
//! per-request lock, so concurrent submits for one id admit exactly once
//! within a process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::domain::{NewEvent, RequestId, RequestStatus, StatusEvent, Topics};
use crate::error::{QueueError, QueueResult};
use crate::ports::QueueBackend;

/// Attempts per request, counting the first one.
pub const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// A new `queued` event was written to both topics.
    Admitted {
        request_id: RequestId,
        retry_count: u32,
    },
    AlreadyCompleted {
        request_id: RequestId,
        retry_count: u32,
    },
    InProgress {
        request_id: RequestId,
        status: RequestStatus,
        retry_count: u32,
    },
}

impl Admission {
    pub fn request_id(&self) -> &RequestId {
        match self {
            Admission::Admitted { request_id, .. }
            | Admission::AlreadyCompleted { request_id, .. }
            | Admission::InProgress { request_id, .. } => request_id,
        }
    }

    pub fn retry_count(&self) -> u32 {
        match self {
            Admission::Admitted { retry_count, .. }
            | Admission::AlreadyCompleted { retry_count, .. }
            | Admission::InProgress { retry_count, .. } => *retry_count,
        }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

type LockTable = HashMap<RequestId, Arc<AsyncMutex<()>>>;

/// One async lock per request id with an admission in flight.
#[derive(Default)]
struct AdmissionLocks {
    table: Mutex<LockTable>,
}

impl AdmissionLocks {
    fn table(&self) -> MutexGuard<'_, LockTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn acquire(&self, request_id: &RequestId) -> AdmissionGuard<'_> {
        let lock = Arc::clone(self.table().entry(request_id.clone()).or_default());
        let held = lock.lock_owned().await;
        AdmissionGuard {
            locks: self,
            request_id: request_id.clone(),
            held: Some(held),
        }
    }

    fn len(&self) -> usize {
        self.table().len()
    }
}

struct AdmissionGuard<'a> {
    locks: &'a AdmissionLocks,
    request_id: RequestId,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        self.held.take();
        let mut table = self.locks.table();
        // Only the table's own reference left: nobody is waiting.
        if table
            .get(&self.request_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            table.remove(&self.request_id);
        }
    }
}

pub struct RequestLifecycle {
    backend: Arc<dyn QueueBackend>,
    topics: Topics,
    max_retries: u32,
    locks: AdmissionLocks,
}

impl RequestLifecycle {
    pub fn new(backend: Arc<dyn QueueBackend>, topics: Topics) -> Self {
        Self {
            backend,
            topics,
            max_retries: MAX_RETRIES,
            locks: AdmissionLocks::default(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// First enqueue of a request. A request with history is treated like
    /// a retry.
    pub async fn submit(&self, request_id: &RequestId) -> QueueResult<Admission> {
        let _admission = self.locks.acquire(request_id).await;
        match self.latest(request_id).await? {
            None => self.admit(request_id, 0).await,
            Some(latest) => self.decide(latest).await,
        }
    }

    /// New attempt for a request that already has a status.
    pub async fn retry(&self, request_id: &RequestId) -> QueueResult<Admission> {
        let _admission = self.locks.acquire(request_id).await;
        match self.latest(request_id).await? {
            None => Err(QueueError::NotFound(request_id.clone())),
            Some(latest) => self.decide(latest).await,
        }
    }

    async fn latest(&self, request_id: &RequestId) -> QueueResult<Option<StatusEvent>> {
        self.backend
            .latest_event(&self.topics.statuses, request_id)
            .await
    }

    async fn decide(&self, latest: StatusEvent) -> QueueResult<Admission> {
        let StatusEvent {
            request_id,
            status,
            retry_count,
            ..
        } = latest;

        match status {
            RequestStatus::Completed => Ok(Admission::AlreadyCompleted {
                request_id,
                retry_count,
            }),
            RequestStatus::Queued | RequestStatus::Processing => Ok(Admission::InProgress {
                request_id,
                status,
                retry_count,
            }),
            RequestStatus::Failed => {
                let next = retry_count.saturating_add(1);
                if next < self.max_retries {
                    self.admit(&request_id, next).await
                } else {
                    warn!(request_id = %request_id, retry_count, "retry limit exceeded");
                    Err(QueueError::RetryLimitExceeded {
                        request_id,
                        retry_count,
                        max_retries: self.max_retries,
                    })
                }
            }
        }
    }

    async fn admit(&self, request_id: &RequestId, retry_count: u32) -> QueueResult<Admission> {
        self.backend
            .publish(
                &self.topics.requests,
                NewEvent::queued(request_id.clone(), retry_count),
            )
            .await?;
        self.backend
            .publish(
                &self.topics.statuses,
                NewEvent::queued(request_id.clone(), retry_count),
            )
            .await?;
        info!(request_id = %request_id, retry_count, "request queued");

        Ok(Admission::Admitted {
            request_id: request_id.clone(),
            retry_count,
        })
    }
}
