//! Broker backed queue.
//!
//! - `publish` declares the durable queue and publishes a persistent JSON body.
//! - `claim_next` polls `get` until the deadline. A delivery is recorded as
//!   `processing` first and acknowledged after (ack-after-claim): a crash in
//!   between leaves the message unacked and the broker redelivers it.
//! - `consume` is the streaming mode. A failing handler is logged and the
//!   delivery is still acknowledged so the stream keeps moving. Stream errors
//!   back off for `poll_interval`; `MAX_CONSECUTIVE_STREAM_ERRORS` in a row
//!   end the consumer.
//!
//! Status queries are served from the process-local `StatusLedger`. The status
//! topic has no consumer, so its events go to the ledger only and never reach
//! the broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{BackendKind, DEFAULT_POLL_INTERVAL, StatusLedger};
use crate::domain::{
    ClaimedJob, ConsumerTag, EventId, NewEvent, RequestId, STATUS_QUEUE, StatusEvent,
    decode_body, encode_body,
};
use crate::error::{QueueError, QueueResult};
use crate::ports::{BrokerChannel, Delivery, MonotonicStamp, QueueBackend};

/// Callback for streaming consumption.
pub type EventHandler =
    Arc<dyn Fn(ClaimedJob) -> BoxFuture<'static, QueueResult<()>> + Send + Sync>;

/// Stream errors in a row after which `consume` gives up.
pub const MAX_CONSECUTIVE_STREAM_ERRORS: u32 = 5;

pub struct BrokerQueue<B> {
    broker: B,
    ledger: StatusLedger,
    stamp: MonotonicStamp,
    poll_interval: Duration,
    status_topic: String,
    closed: AtomicBool,
}

impl<B: BrokerChannel> BrokerQueue<B> {
    pub fn new(broker: B) -> Self {
        Self {
            broker,
            ledger: StatusLedger::new(),
            stamp: MonotonicStamp::system(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            status_topic: STATUS_QUEUE.to_string(),
            closed: AtomicBool::new(false),
        }
    }

    /// Topic whose events are kept in the ledger instead of the broker.
    pub fn with_status_topic(mut self, topic: impl Into<String>) -> Self {
        self.status_topic = topic.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_stamp(mut self, stamp: MonotonicStamp) -> Self {
        self.stamp = stamp;
        self
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    fn ensure_open(&self) -> QueueResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    fn stamped(&self, topic: &str, event: NewEvent) -> StatusEvent {
        let timestamp = self.stamp.next();
        let event_id = EventId::generate(timestamp.timestamp_millis().max(0) as u64);
        StatusEvent::record(event_id, topic, event, timestamp)
    }

    /// Decode a delivery and record it as claimed. Undecodable bodies are
    /// rejected without requeue and yield `None`.
    async fn take(&self, topic: &str, delivery: &Delivery) -> QueueResult<Option<ClaimedJob>> {
        let event = match decode_body(&delivery.body) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    topic,
                    delivery_tag = delivery.delivery_tag,
                    error = %e,
                    "undecodable message rejected"
                );
                self.broker.reject(delivery.delivery_tag, false).await?;
                return Ok(None);
            }
        };

        let claimed_at = self.stamp.now();
        let request_id = event.request_id.clone();
        let before = self.ledger.claim(topic, &request_id, claimed_at, || {
            self.stamped(topic, event)
        });
        Ok(Some(
            ClaimedJob::claim(before, claimed_at).with_redelivered(delivery.redelivered),
        ))
    }

    /// Streaming consumption of `topic` until `shutdown` flips to `true`,
    /// the broker ends the stream, or the sender is dropped.
    ///
    /// Returns the number of deliveries handed to `handler`.
    pub async fn consume(
        &self,
        topic: &str,
        handler: EventHandler,
        mut shutdown: watch::Receiver<bool>,
    ) -> QueueResult<u64> {
        self.ensure_open()?;
        self.broker.declare_durable_queue(topic).await?;

        let tag = ConsumerTag::generate(self.stamp.now().timestamp_millis().max(0) as u64);
        let mut stream = self.broker.consume(topic, &tag).await?;
        info!(topic, consumer_tag = %tag, "streaming consumer started");

        let mut handled = 0u64;
        let mut stream_errors = 0u32;
        let mut failure = None;
        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                next = stream.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => {
                    stream_errors = 0;
                    delivery
                }
                Some(Err(e)) => {
                    stream_errors += 1;
                    warn!(topic, error = %e, stream_errors, "consumer stream error");
                    if stream_errors >= MAX_CONSECUTIVE_STREAM_ERRORS {
                        failure = Some(e);
                        break;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                    continue;
                }
                None => break,
            };

            let Some(job) = self.take(topic, &delivery).await? else {
                continue;
            };
            let request_id = job.request_id().clone();
            if let Err(e) = handler(job).await {
                warn!(
                    topic,
                    request_id = %request_id,
                    error = %e,
                    "handler failed; message acknowledged"
                );
            }
            handled += 1;
            self.broker.ack(delivery.delivery_tag).await?;
        }

        if let Err(e) = self.broker.cancel(&tag).await {
            warn!(consumer_tag = %tag, error = %e, "consumer cancel failed");
        }
        info!(topic, consumer_tag = %tag, handled, "streaming consumer stopped");
        match failure {
            Some(e) => Err(e),
            None => Ok(handled),
        }
    }
}

#[async_trait]
impl<B: BrokerChannel> QueueBackend for BrokerQueue<B> {
    fn kind(&self) -> BackendKind {
        BackendKind::RabbitMq
    }

    async fn publish(&self, topic: &str, event: NewEvent) -> QueueResult<RequestId> {
        self.ensure_open()?;
        if topic != self.status_topic {
            self.broker.declare_durable_queue(topic).await?;
            let body = encode_body(&event)?;
            self.broker.publish_persistent(topic, body).await?;
        }

        let request_id = event.request_id.clone();
        let stored = self.stamped(topic, event);
        debug!(topic, request_id = %request_id, status = %stored.status, "event published");
        self.ledger.record(stored);
        Ok(request_id)
    }

    async fn claim_next(&self, topic: &str, timeout: Duration) -> QueueResult<Option<ClaimedJob>> {
        self.ensure_open()?;
        self.broker.declare_durable_queue(topic).await?;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(delivery) = self.broker.get(topic).await? {
                if let Some(job) = self.take(topic, &delivery).await? {
                    self.broker.ack(delivery.delivery_tag).await?;
                    debug!(
                        topic,
                        request_id = %job.request_id(),
                        redelivered = job.redelivered(),
                        "claimed"
                    );
                    return Ok(Some(job));
                }
                continue;
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn latest_event(
        &self,
        topic: &str,
        request_id: &RequestId,
    ) -> QueueResult<Option<StatusEvent>> {
        self.ensure_open()?;
        Ok(self.ledger.latest(topic, request_id))
    }

    async fn pending(&self, topic: &str) -> QueueResult<Vec<StatusEvent>> {
        self.ensure_open()?;
        Ok(self.ledger.queued(topic))
    }

    async fn close(&self) -> QueueResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(backend = %BackendKind::RabbitMq, "closing queue backend");
        self.broker.close().await
    }
}
