//! Worker loop: claim, process, record.
//!
//! One iteration:
//! 1. claim the oldest job on the request topic (bounded by the claim timeout)
//! 2. append `processing` to the status topic
//! 3. run the processing routine in its own task, so a panic is a failure too
//! 4. append `completed` or `failed` with the job's `retry_count`
//!
//! Empty claims sleep `idle_backoff`, errors sleep `error_backoff`. Nothing a
//! single job does stops the loop; only `WorkerHandle` shutdown does.
//!
//! Once a job is claimed its outcome is the only thing that moves it out of
//! `processing`, so a transient failure writing the outcome is retried every
//! `error_backoff` until it lands or shutdown is requested.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::domain::{ClaimedJob, NewEvent, RequestId, RequestStatus, Topics};
use crate::error::{QueueError, QueueResult};
use crate::ports::{
    ErrorLog, QueueBackend, RequestProcessor, TracingErrorLog, is_success, log_safe,
};

/// Outcome of one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    Processed {
        request_id: RequestId,
        status: RequestStatus,
    },
    /// Nothing was queued within the claim timeout.
    Idle,
    /// Claiming or recording failed. Already logged.
    Errored,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub failed: u64,
    pub idle: u64,
    pub errored: u64,
}

impl WorkerStats {
    fn record(&mut self, tick: &Tick) {
        match tick {
            Tick::Processed {
                status: RequestStatus::Completed,
                ..
            } => self.completed += 1,
            Tick::Processed { .. } => self.failed += 1,
            Tick::Idle => self.idle += 1,
            Tick::Errored => self.errored += 1,
        }
    }
}

pub struct WorkerLoop {
    backend: Arc<dyn QueueBackend>,
    processor: Arc<dyn RequestProcessor>,
    error_log: Arc<dyn ErrorLog>,
    topics: Topics,
    config: WorkerConfig,
}

impl WorkerLoop {
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        processor: Arc<dyn RequestProcessor>,
        topics: Topics,
        config: WorkerConfig,
    ) -> Self {
        Self {
            backend,
            processor,
            error_log: Arc::new(TracingErrorLog),
            topics,
            config,
        }
    }

    pub fn with_error_log(mut self, error_log: Arc<dyn ErrorLog>) -> Self {
        self.error_log = error_log;
        self
    }

    /// One claim/process/record iteration. Never returns an error: failures
    /// are reported to the error log and surface as `Tick::Errored`.
    pub async fn run_once(&self) -> Tick {
        let (_never, shutdown) = watch::channel(false);
        self.step(shutdown).await
    }

    async fn step(&self, shutdown: watch::Receiver<bool>) -> Tick {
        let claimed = self
            .backend
            .claim_next(&self.topics.requests, self.config.claim_timeout())
            .await;

        let job = match claimed {
            Ok(Some(job)) => job,
            Ok(None) => return Tick::Idle,
            Err(e) => {
                log_safe(self.error_log.as_ref(), "claim_next", &e);
                return Tick::Errored;
            }
        };

        match self.process(job, shutdown).await {
            Ok(tick) => tick,
            Err(e) => {
                log_safe(self.error_log.as_ref(), "worker_loop", &e);
                Tick::Errored
            }
        }
    }

    async fn process(
        &self,
        job: ClaimedJob,
        shutdown: watch::Receiver<bool>,
    ) -> QueueResult<Tick> {
        let request_id = job.request_id().clone();
        let retry_count = job.retry_count();
        info!(
            request_id = %request_id,
            retry_count,
            redelivered = job.redelivered(),
            "processing request"
        );

        // The job is already ours; a missing audit entry must not strand it.
        if let Err(e) = self
            .backend
            .publish(
                &self.topics.statuses,
                NewEvent::processing(request_id.clone(), retry_count),
            )
            .await
        {
            log_safe(self.error_log.as_ref(), "publish_processing", &e);
        }

        let event = match self.execute(&request_id).await {
            Ok(response) if is_success(&response) => {
                NewEvent::completed(request_id.clone(), retry_count, response)
            }
            Ok(response) => NewEvent::failed(request_id.clone(), retry_count, response),
            Err(e) => {
                log_safe(self.error_log.as_ref(), "process_request", &e);
                NewEvent::failed(request_id.clone(), retry_count, error_payload(&e))
            }
        };
        let status = event.status;

        self.publish_outcome(event, shutdown).await?;
        info!(request_id = %request_id, %status, retry_count, "request finished");
        Ok(Tick::Processed { request_id, status })
    }

    async fn publish_outcome(
        &self,
        event: NewEvent,
        mut shutdown: watch::Receiver<bool>,
    ) -> QueueResult<()> {
        loop {
            let err = match self
                .backend
                .publish(&self.topics.statuses, event.clone())
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) if e.is_transient() && !*shutdown.borrow() => e,
                Err(e) => return Err(e),
            };
            log_safe(self.error_log.as_ref(), "publish_outcome", &err);
            warn!(
                request_id = %event.request_id,
                status = %event.status,
                backoff = ?self.config.error_backoff(),
                "outcome not recorded; retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.config.error_backoff()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Err(err);
                    }
                }
            }
        }
    }

    async fn execute(&self, request_id: &RequestId) -> QueueResult<Value> {
        let processor = Arc::clone(&self.processor);
        let request_id = request_id.clone();
        let task = tokio::spawn(async move { processor.process(&request_id).await });
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(QueueError::Processing(
                "processing routine panicked".to_string(),
            )),
            Err(e) => Err(QueueError::Processing(format!("processing task aborted: {e}"))),
        }
    }

    /// Loop until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Claims and processing are never interrupted; shutdown is observed
    /// between iterations, during backoff sleeps and while an outcome write
    /// is being retried.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerStats {
        info!(
            request_topic = %self.topics.requests,
            status_topic = %self.topics.statuses,
            backend = %self.backend.kind(),
            "worker started"
        );
        let mut stats = WorkerStats::default();
        loop {
            if *shutdown.borrow() {
                break;
            }

            let tick = self.step(shutdown.clone()).await;
            stats.record(&tick);
            let pause = match tick {
                Tick::Processed { .. } => continue,
                Tick::Idle => self.config.idle_backoff(),
                Tick::Errored => self.config.error_backoff(),
            };
            debug!(?pause, "worker backing off");

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(?stats, "worker stopped");
        stats
    }

    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move { self.run(shutdown_rx).await });
        WorkerHandle { shutdown_tx, join }
    }
}

fn error_payload(error: &QueueError) -> Value {
    json!({ "status": "error", "message": error.to_string() })
}

/// Handle to a spawned worker loop.
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<WorkerStats>,
}

impl WorkerHandle {
    /// Stop taking new jobs. The job in flight, if any, still finishes.
    pub fn request_shutdown(&self) {
        // ignore send error: the worker may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) -> WorkerStats {
        self.request_shutdown();
        match self.join.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "worker task ended abnormally");
                WorkerStats::default()
            }
        }
    }
}
