//! Port implementations.
//!
//! - `InMemoryDocumentStore`, `InMemoryBroker`: development and tests.
//! - `MongoDocumentStore` (feature `mongodb`), `AmqpBroker` (feature
//!   `rabbitmq`): production backends.

pub mod memory_broker;
pub mod memory_documents;

#[cfg(feature = "rabbitmq")]
pub mod amqp_broker;
#[cfg(feature = "mongodb")]
pub mod mongo_documents;

pub use self::memory_broker::InMemoryBroker;
pub use self::memory_documents::InMemoryDocumentStore;

#[cfg(feature = "rabbitmq")]
pub use self::amqp_broker::AmqpBroker;
#[cfg(feature = "mongodb")]
pub use self::mongo_documents::MongoDocumentStore;
