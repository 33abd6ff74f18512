//! MongoDB connection and typed collections
//!
//! Every document embeds [`Metadata`]; reads only see live documents, and
//! deletes of principals are soft so references from requests still resolve
//! to a tombstone rather than dangling.

use std::time::Duration;

use bson::{doc, Document};
use futures_util::StreamExt;
use mongodb::{
    options::{ClientOptions, IndexOptions, UpdateModifications},
    results::UpdateResult,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::db::schemas::Metadata;
use crate::types::{ConciergeError, Result};

/// Unreachable servers fail startup instead of hanging it
const SELECTION_TIMEOUT: Duration = Duration::from_secs(3);

/// Index definitions a schema wants on its collection
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Access to a schema's embedded bookkeeping
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// Bounds every stored schema satisfies
pub trait Schema:
    Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata
{
}

impl<T> Schema for T where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata
{
}

fn db_error(action: &str, err: mongodb::error::Error) -> ConciergeError {
    ConciergeError::Database(format!("{} failed: {}", action, err))
}

/// Restrict a filter to documents that are not soft-deleted
fn live(mut filter: Document) -> Document {
    filter.insert(Metadata::DELETED_FIELD, doc! { "$ne": true });
    filter
}

#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and ping; errors if the server cannot be selected quickly
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| db_error("Parsing MongoDB URI", e))?;
        options.app_name = Some("concierge".to_string());
        options.server_selection_timeout = Some(SELECTION_TIMEOUT);
        options.connect_timeout = Some(SELECTION_TIMEOUT);

        let client = Client::with_options(options).map_err(|e| db_error("MongoDB connect", e))?;
        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| db_error("MongoDB ping", e))?;

        info!(db = db_name, "Connected to MongoDB");
        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Open a typed collection and make sure its indexes exist
    pub async fn collection<T: Schema>(&self, name: &str) -> Result<MongoCollection<T>> {
        let collection = MongoCollection {
            inner: self.client.database(&self.db_name).collection::<T>(name),
            name: name.to_string(),
        };
        collection.ensure_indexes().await?;
        Ok(collection)
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

#[derive(Debug, Clone)]
pub struct MongoCollection<T: Send + Sync> {
    inner: Collection<T>,
    name: String,
}

impl<T: Schema> MongoCollection<T> {
    async fn ensure_indexes(&self) -> Result<()> {
        let models: Vec<IndexModel> = T::into_indices()
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();
        if models.is_empty() {
            return Ok(());
        }
        let count = models.len();
        self.inner
            .create_indexes(models)
            .await
            .map_err(|e| db_error("Creating indexes", e))?;
        debug!(collection = %self.name, count, "Indexes ensured");
        Ok(())
    }

    /// Insert a new document with fresh bookkeeping
    pub async fn insert(&self, mut item: T) -> Result<()> {
        *item.mut_metadata() = Metadata::new();
        self.inner
            .insert_one(item)
            .await
            .map_err(|e| db_error("Insert", e))?;
        Ok(())
    }

    pub async fn find(&self, filter: Document) -> Result<Option<T>> {
        self.inner
            .find_one(live(filter))
            .await
            .map_err(|e| db_error("Find", e))
    }

    /// Every live match; documents that fail to decode are skipped
    pub async fn find_all(&self, filter: Document) -> Result<Vec<T>> {
        let mut cursor = self
            .inner
            .find(live(filter))
            .await
            .map_err(|e| db_error("Find", e))?;

        let mut found = Vec::new();
        while let Some(item) = cursor.next().await {
            match item {
                Ok(doc) => found.push(doc),
                Err(e) => warn!(collection = %self.name, error = %e, "Skipping unreadable document"),
            }
        }
        Ok(found)
    }

    /// Single-document update; the filter is taken as-is so it can carry
    /// compare-and-set preconditions
    pub async fn update(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult> {
        self.inner
            .update_one(filter, update.into())
            .await
            .map_err(|e| db_error("Update", e))
    }

    pub async fn upsert(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult> {
        self.inner
            .update_one(filter, update.into())
            .upsert(true)
            .await
            .map_err(|e| db_error("Upsert", e))
    }

    /// Hard delete of at most one document; returns how many went
    pub async fn delete(&self, filter: Document) -> Result<u64> {
        self.inner
            .delete_one(filter)
            .await
            .map(|r| r.deleted_count)
            .map_err(|e| db_error("Delete", e))
    }

    pub async fn delete_all(&self, filter: Document) -> Result<u64> {
        self.inner
            .delete_many(filter)
            .await
            .map(|r| r.deleted_count)
            .map_err(|e| db_error("Delete", e))
    }

    /// Tombstone one live document
    pub async fn soft_delete(&self, filter: Document) -> Result<UpdateResult> {
        self.update(live(filter), Metadata::tombstone()).await
    }
}
