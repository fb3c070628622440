//! MongoDB document store: one collection per topic.
//!
//! The claim is a single `findOneAndUpdate` sorted by `timestamp` ascending
//! that returns the document before the update, so two workers polling the
//! same collection can never take the same document.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::ReturnDocument;
use mongodb::{Client, Collection, Database, IndexModel};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::{RequestId, RequestStatus, StatusEvent};
use crate::error::{QueueError, QueueResult};
use crate::ports::DocumentStore;

pub struct MongoDocumentStore {
    client: Client,
    database: Database,
    /// Collections whose indexes were already created by this process.
    indexed: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl MongoDocumentStore {
    pub async fn connect(connection_string: &str, database: &str) -> QueueResult<Self> {
        info!(database, "connecting to MongoDB");
        let client = Client::with_uri_str(connection_string).await?;
        let database = client.database(database);
        Ok(Self {
            client,
            database,
            indexed: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        })
    }

    async fn collection(&self, topic: &str) -> QueueResult<Collection<StatusEvent>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        let collection = self.database.collection::<StatusEvent>(topic);

        let mut indexed = self.indexed.lock().await;
        if !indexed.contains(topic) {
            for keys in [
                doc! { "status": 1, "timestamp": 1 },
                doc! { "request_id": 1, "timestamp": -1 },
            ] {
                collection
                    .create_index(IndexModel::builder().keys(keys).build())
                    .await?;
            }
            debug!(topic, "indexes ensured");
            indexed.insert(topic.to_string());
        }
        Ok(collection)
    }
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    async fn insert(&self, event: StatusEvent) -> QueueResult<()> {
        let collection = self.collection(&event.topic).await?;
        collection.insert_one(&event).await?;
        Ok(())
    }

    async fn claim_oldest_queued(
        &self,
        topic: &str,
        claimed_at: DateTime<Utc>,
    ) -> QueueResult<Option<StatusEvent>> {
        let collection = self.collection(topic).await?;
        let before = collection
            .find_one_and_update(
                doc! { "status": RequestStatus::Queued.as_str() },
                doc! { "$set": {
                    "status": RequestStatus::Processing.as_str(),
                    "processing_start": claimed_at.timestamp_micros(),
                } },
            )
            .sort(doc! { "timestamp": 1, "_id": 1 })
            .return_document(ReturnDocument::Before)
            .await?;
        Ok(before)
    }

    async fn find_latest(
        &self,
        topic: &str,
        request_id: &RequestId,
    ) -> QueueResult<Option<StatusEvent>> {
        let collection = self.collection(topic).await?;
        let latest = collection
            .find_one(doc! { "request_id": request_id.as_str() })
            .sort(doc! { "timestamp": -1, "_id": -1 })
            .await?;
        Ok(latest)
    }

    async fn find_by_status(
        &self,
        topic: &str,
        status: RequestStatus,
    ) -> QueueResult<Vec<StatusEvent>> {
        let collection = self.collection(topic).await?;
        let cursor = collection
            .find(doc! { "status": status.as_str() })
            .sort(doc! { "timestamp": 1, "_id": 1 })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn close(&self) -> QueueResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("closing MongoDB client");
        self.client.clone().shutdown().await;
        Ok(())
    }
}
