//! Broker port: a durable, persistent-delivery queue with explicit acks.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::ConsumerTag;
use crate::error::QueueResult;

/// One message handed out by the broker and not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    /// Set when the broker handed this message out before and never saw an ack.
    pub redelivered: bool,
}

pub type DeliveryStream = BoxStream<'static, QueueResult<Delivery>>;

#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Idempotent.
    async fn declare_durable_queue(&self, queue: &str) -> QueueResult<()>;

    /// Publish to the default exchange with persistent delivery mode.
    async fn publish_persistent(&self, queue: &str, body: Vec<u8>) -> QueueResult<()>;

    /// Non-blocking dequeue. The delivery stays unacked until `ack`/`reject`.
    async fn get(&self, queue: &str) -> QueueResult<Option<Delivery>>;

    async fn ack(&self, delivery_tag: u64) -> QueueResult<()>;

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> QueueResult<()>;

    /// Push-based consumption with explicit acks. The stream ends when the
    /// consumer is cancelled or the channel closes.
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &ConsumerTag,
    ) -> QueueResult<DeliveryStream>;

    async fn cancel(&self, consumer_tag: &ConsumerTag) -> QueueResult<()>;

    async fn close(&self) -> QueueResult<()>;
}
