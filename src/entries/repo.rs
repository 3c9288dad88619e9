use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::model::{Collection, StoredRecord};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("record {id} not found in {collection}")]
    NotFound { collection: Collection, id: String },
}

/// Emitted after every successful write to a user's collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeNotice {
    pub user_id: Uuid,
    pub collection: Collection,
}

/// Per-user key-value store of food, water and settings records.
///
/// Every call names the user explicitly; implementations never read an
/// ambient "current user". Writes to one collection are serialized by the
/// implementation.
#[async_trait]
pub trait EntryRepository: Send + Sync {
    /// All records of a collection, in insertion order.
    async fn fetch_all(
        &self,
        user_id: Uuid,
        collection: Collection,
    ) -> Result<Vec<StoredRecord>, RepoError>;

    /// Stores a new record and returns the id minted for it.
    async fn append(
        &self,
        user_id: Uuid,
        collection: Collection,
        record: Value,
    ) -> Result<String, RepoError>;

    /// Shallow-merges `partial` into the record at `key`, creating it if absent.
    async fn update(
        &self,
        user_id: Uuid,
        collection: Collection,
        key: &str,
        partial: Value,
    ) -> Result<(), RepoError>;

    async fn delete(
        &self,
        user_id: Uuid,
        collection: Collection,
        id: &str,
    ) -> Result<(), RepoError>;

    /// Change notices for every user; consumers filter by user and collection.
    fn changes(&self) -> broadcast::Receiver<ChangeNotice>;
}

/// In-process fan-out of change notices shared by the repository backends.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeNotice>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, user_id: Uuid, collection: Collection) {
        // No receivers is fine: nobody is watching.
        let _ = self.tx.send(ChangeNotice {
            user_id,
            collection,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.tx.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Top-level key merge, the same shape as a realtime-database `update`.
pub fn merge_shallow(target: &mut Value, partial: Value) {
    match (target, partial) {
        (Value::Object(dst), Value::Object(src)) => {
            for (k, v) in src {
                dst.insert(k, v);
            }
        }
        (dst, src) => *dst = src,
    }
}
