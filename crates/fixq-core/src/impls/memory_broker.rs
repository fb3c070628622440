//! In-memory broker with durable-queue semantics.
//!
//! Models the parts of an AMQP broker the queue relies on: declared queues,
//! delivery tags, an unacked set, reject with or without requeue, push
//! consumers, and `recover()` to simulate a consumer crash (every unacked
//! delivery goes back to its queue flagged as redelivered).

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{Mutex, mpsc};

use crate::domain::ConsumerTag;
use crate::error::{QueueError, QueueResult};
use crate::ports::{BrokerChannel, Delivery, DeliveryStream};

#[derive(Debug, Clone)]
struct Message {
    body: Vec<u8>,
    redelivered: bool,
}

struct Unacked {
    queue: String,
    message: Message,
}

struct Consumer {
    queue: String,
    tx: mpsc::UnboundedSender<QueueResult<Delivery>>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<Message>>,
    /// Ordered by tag so `recover` requeues in delivery order.
    unacked: BTreeMap<u64, Unacked>,
    consumers: Vec<(ConsumerTag, Consumer)>,
    next_tag: u64,
}

impl BrokerState {
    fn hand_out(&mut self, queue: &str, message: Message) -> Delivery {
        self.next_tag += 1;
        let delivery = Delivery {
            delivery_tag: self.next_tag,
            body: message.body.clone(),
            redelivered: message.redelivered,
        };
        self.unacked.insert(
            self.next_tag,
            Unacked {
                queue: queue.to_string(),
                message,
            },
        );
        delivery
    }

    /// Push ready messages of `queue` to its first live consumer.
    fn dispatch(&mut self, queue: &str) {
        loop {
            let Some(pos) = self.consumers.iter().position(|(_, c)| c.queue == queue) else {
                return;
            };
            let Some(message) = self.queues.get_mut(queue).and_then(VecDeque::pop_front) else {
                return;
            };
            let delivery = self.hand_out(queue, message);
            let tag = delivery.delivery_tag;
            if self.consumers[pos].1.tx.send(Ok(delivery)).is_err() {
                // Receiver dropped: forget the consumer and take the message back.
                self.consumers.remove(pos);
                if let Some(unacked) = self.unacked.remove(&tag) {
                    self.requeue_front(unacked);
                }
            }
        }
    }

    fn requeue_front(&mut self, unacked: Unacked) {
        let Unacked { queue, mut message } = unacked;
        message.redelivered = true;
        self.queues.entry(queue).or_default().push_front(message);
    }
}

#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    closed: AtomicBool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requeue every unacked delivery as if its consumer's connection died.
    pub async fn recover(&self) {
        let mut state = self.state.lock().await;
        let unacked = std::mem::take(&mut state.unacked);
        let mut touched = Vec::new();
        // Reverse so push_front restores delivery order.
        for (_, entry) in unacked.into_iter().rev() {
            if !touched.contains(&entry.queue) {
                touched.push(entry.queue.clone());
            }
            state.requeue_front(entry);
        }
        for queue in touched {
            state.dispatch(&queue);
        }
    }

    /// Messages waiting in `queue` (not handed out).
    pub async fn ready_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    /// Deliveries handed out and not yet acked or rejected.
    pub async fn unacked_count(&self) -> usize {
        self.state.lock().await.unacked.len()
    }

    fn ensure_open(&self) -> QueueResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for InMemoryBroker {
    async fn declare_durable_queue(&self, queue: &str) -> QueueResult<()> {
        self.ensure_open()?;
        self.state
            .lock()
            .await
            .queues
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn publish_persistent(&self, queue: &str, body: Vec<u8>) -> QueueResult<()> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        let Some(ready) = state.queues.get_mut(queue) else {
            // Default exchange drops messages routed to an undeclared queue.
            tracing::warn!(queue, "publish to undeclared queue dropped");
            return Ok(());
        };
        ready.push_back(Message {
            body,
            redelivered: false,
        });
        state.dispatch(queue);
        Ok(())
    }

    async fn get(&self, queue: &str) -> QueueResult<Option<Delivery>> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        let Some(message) = state.queues.get_mut(queue).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        Ok(Some(state.hand_out(queue, message)))
    }

    async fn ack(&self, delivery_tag: u64) -> QueueResult<()> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        state
            .unacked
            .remove(&delivery_tag)
            .map(|_| ())
            .ok_or_else(|| QueueError::transient(format!("unknown delivery tag {delivery_tag}")))
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> QueueResult<()> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        let unacked = state.unacked.remove(&delivery_tag).ok_or_else(|| {
            QueueError::transient(format!("unknown delivery tag {delivery_tag}"))
        })?;
        if requeue {
            let queue = unacked.queue.clone();
            state.requeue_front(unacked);
            state.dispatch(&queue);
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &ConsumerTag,
    ) -> QueueResult<DeliveryStream> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().await;
        if !state.queues.contains_key(queue) {
            return Err(QueueError::transient(format!("queue {queue} not declared")));
        }
        state.consumers.push((
            *consumer_tag,
            Consumer {
                queue: queue.to_string(),
                tx,
            },
        ));
        state.dispatch(queue);

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (delivery, rx))
        });
        Ok(stream.boxed())
    }

    async fn cancel(&self, consumer_tag: &ConsumerTag) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.consumers.retain(|(tag, _)| tag != consumer_tag);
        Ok(())
    }

    async fn close(&self) -> QueueResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the senders ends every consumer stream.
        self.state.lock().await.consumers.clear();
        Ok(())
    }
}
