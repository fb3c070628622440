//! Backend selection.
//!
//! The vendor string from configuration becomes a closed `BackendKind`; an
//! unknown vendor, or one whose cargo feature is not compiled in, is a
//! configuration error at startup.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::DocumentStoreQueue;
use crate::config::AppConfig;
use crate::error::{QueueError, QueueResult};
use crate::impls::InMemoryDocumentStore;
use crate::ports::QueueBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Document store on MongoDB.
    MongoDb,
    /// Durable queues on RabbitMQ.
    RabbitMq,
    /// Document store in process memory. Nothing survives a restart.
    Memory,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::MongoDb => "mongodb",
            BackendKind::RabbitMq => "rabbitmq",
            BackendKind::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mongodb" => Ok(BackendKind::MongoDb),
            "rabbitmq" => Ok(BackendKind::RabbitMq),
            "memory" => Ok(BackendKind::Memory),
            other => Err(QueueError::config(format!("unsupported mq vendor: {other}"))),
        }
    }
}

pub struct QueueFactory;

impl QueueFactory {
    /// Open the backend named by `config.queue.vendor`.
    ///
    /// Called once per process; the returned handle is shared by every
    /// component and closed at shutdown.
    pub async fn open(config: &AppConfig) -> QueueResult<Arc<dyn QueueBackend>> {
        let kind = config.backend_kind()?;
        info!(backend = %kind, "opening queue backend");
        match kind {
            BackendKind::Memory => Ok(Arc::new(
                DocumentStoreQueue::new(InMemoryDocumentStore::new(), BackendKind::Memory)
                    .with_poll_interval(config.worker.poll_interval()),
            )),
            BackendKind::MongoDb => open_mongodb(config).await,
            BackendKind::RabbitMq => open_rabbitmq(config).await,
        }
    }
}

#[cfg(feature = "mongodb")]
async fn open_mongodb(config: &AppConfig) -> QueueResult<Arc<dyn QueueBackend>> {
    let store = crate::impls::MongoDocumentStore::connect(
        &config.mongodb.connection_string,
        &config.mongodb.database,
    )
    .await?;
    Ok(Arc::new(
        DocumentStoreQueue::new(store, BackendKind::MongoDb)
            .with_poll_interval(config.worker.poll_interval()),
    ))
}

#[cfg(not(feature = "mongodb"))]
async fn open_mongodb(_config: &AppConfig) -> QueueResult<Arc<dyn QueueBackend>> {
    Err(QueueError::config("mq vendor mongodb requires the `mongodb` feature"))
}

#[cfg(feature = "rabbitmq")]
async fn open_rabbitmq(config: &AppConfig) -> QueueResult<Arc<dyn QueueBackend>> {
    let broker = crate::impls::AmqpBroker::connect(&config.rabbitmq.amqp_url()).await?;
    Ok(Arc::new(
        super::BrokerQueue::new(broker)
            .with_poll_interval(config.worker.poll_interval())
            .with_status_topic(config.queue.topics.statuses.clone()),
    ))
}

#[cfg(not(feature = "rabbitmq"))]
async fn open_rabbitmq(_config: &AppConfig) -> QueueResult<Arc<dyn QueueBackend>> {
    Err(QueueError::config("mq vendor rabbitmq requires the `rabbitmq` feature"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("mongodb", BackendKind::MongoDb)]
    #[case("RabbitMQ", BackendKind::RabbitMq)]
    #[case(" memory ", BackendKind::Memory)]
    fn parses_known_vendors(#[case] vendor: &str, #[case] expected: BackendKind) {
        assert_eq!(vendor.parse::<BackendKind>().unwrap(), expected);
        assert_eq!(expected.to_string().parse::<BackendKind>().unwrap(), expected);
    }

    #[rstest]
    #[case("kafka")]
    #[case("")]
    #[case("redis")]
    fn unknown_vendor_is_a_configuration_error(#[case] vendor: &str) {
        assert!(matches!(
            vendor.parse::<BackendKind>(),
            Err(QueueError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn opens_memory_backend() {
        let backend = QueueFactory::open(&AppConfig::default()).await.unwrap();
        assert_eq!(backend.kind(), BackendKind::Memory);
        backend.close().await.unwrap();
    }

    #[tokio::test]
    async fn open_fails_fast_on_unknown_vendor() {
        let mut config = AppConfig::default();
        config.queue.vendor = "kafka".to_string();
        assert!(matches!(
            QueueFactory::open(&config).await,
            Err(QueueError::Configuration(_))
        ));
    }

    #[cfg(not(feature = "rabbitmq"))]
    #[tokio::test]
    async fn vendor_without_compiled_feature_is_rejected() {
        let mut config = AppConfig::default();
        config.queue.vendor = "rabbitmq".to_string();
        let err = QueueFactory::open(&config).await.err().unwrap();
        assert!(err.to_string().contains("rabbitmq"));
    }
}
