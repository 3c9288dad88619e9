use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::model::{Collection, StoredRecord};
use super::repo::{merge_shallow, ChangeFeed, ChangeNotice, EntryRepository, RepoError};

/// Process-local repository. Backs the `memory` storage backend and tests.
#[derive(Default)]
pub struct MemoryRepository {
    data: RwLock<HashMap<(Uuid, Collection), Vec<StoredRecord>>>,
    feed: ChangeFeed,
    offline: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with `Unavailable` until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), RepoError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RepoError::Unavailable("memory repository offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl EntryRepository for MemoryRepository {
    async fn fetch_all(
        &self,
        user_id: Uuid,
        collection: Collection,
    ) -> Result<Vec<StoredRecord>, RepoError> {
        self.ensure_online()?;
        let data = self.data.read().await;
        Ok(data.get(&(user_id, collection)).cloned().unwrap_or_default())
    }

    async fn append(
        &self,
        user_id: Uuid,
        collection: Collection,
        record: Value,
    ) -> Result<String, RepoError> {
        self.ensure_online()?;
        let id = Uuid::new_v4().to_string();
        self.data
            .write()
            .await
            .entry((user_id, collection))
            .or_default()
            .push(StoredRecord::new(id.clone(), record));
        debug!(%user_id, %collection, %id, "record appended");
        self.feed.publish(user_id, collection);
        Ok(id)
    }

    async fn update(
        &self,
        user_id: Uuid,
        collection: Collection,
        key: &str,
        partial: Value,
    ) -> Result<(), RepoError> {
        self.ensure_online()?;
        {
            let mut data = self.data.write().await;
            let records = data.entry((user_id, collection)).or_default();
            match records.iter_mut().find(|r| r.id == key) {
                Some(existing) => merge_shallow(&mut existing.record, partial),
                None => {
                    let mut record = Value::Object(Default::default());
                    merge_shallow(&mut record, partial);
                    records.push(StoredRecord::new(key, record));
                }
            }
        }
        self.feed.publish(user_id, collection);
        Ok(())
    }

    async fn delete(
        &self,
        user_id: Uuid,
        collection: Collection,
        id: &str,
    ) -> Result<(), RepoError> {
        self.ensure_online()?;
        {
            let mut data = self.data.write().await;
            let records = data.entry((user_id, collection)).or_default();
            let before = records.len();
            records.retain(|r| r.id != id);
            if records.len() == before {
                return Err(RepoError::NotFound {
                    collection,
                    id: id.to_string(),
                });
            }
        }
        debug!(%user_id, %collection, %id, "record deleted");
        self.feed.publish(user_id, collection);
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<ChangeNotice> {
        self.feed.subscribe()
    }
}
