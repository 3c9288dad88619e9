use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entries::model::Collection;
use crate::entries::repo::{EntryRepository, RepoError};

pub const DEFAULT_UNDO_WINDOW: Duration = Duration::from_millis(4000);

/// What the caller gets back from a delete: enough to offer "undo".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedRecord {
    pub token: Uuid,
    pub collection: Collection,
    /// The removed record without its old id.
    pub snapshot: Value,
    pub undo_window_ms: u64,
}

struct PendingUndo {
    token: Uuid,
    collection: Collection,
    snapshot: Value,
    deadline: Instant,
}

/// Deletes entries and keeps the last one per user restorable for a short
/// window. One slot per user: a second delete drops the first's undo.
pub struct MutationLedger {
    repo: Arc<dyn EntryRepository>,
    window: Duration,
    pending: Mutex<HashMap<Uuid, PendingUndo>>,
}

impl MutationLedger {
    pub fn new(repo: Arc<dyn EntryRepository>, window: Duration) -> Self {
        Self {
            repo,
            window,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub async fn delete(
        &self,
        user_id: Uuid,
        collection: Collection,
        entry_id: &str,
    ) -> Result<DeletedRecord, RepoError> {
        let records = self.repo.fetch_all(user_id, collection).await?;
        let stored = records
            .into_iter()
            .find(|r| r.id == entry_id)
            .ok_or_else(|| RepoError::NotFound {
                collection,
                id: entry_id.to_string(),
            })?;

        self.repo.delete(user_id, collection, entry_id).await?;

        let mut snapshot = stored.record;
        if let Value::Object(map) = &mut snapshot {
            map.remove("id");
        }

        let token = Uuid::new_v4();
        let mut pending = self.pending.lock().await;
        let now = Instant::now();
        purge_expired(&mut pending, now);
        if pending
            .insert(
                user_id,
                PendingUndo {
                    token,
                    collection,
                    snapshot: snapshot.clone(),
                    deadline: now + self.window,
                },
            )
            .is_some()
        {
            debug!(%user_id, "earlier undo discarded by a newer delete");
        }
        info!(%user_id, %collection, entry_id, "entry deleted");

        Ok(DeletedRecord {
            token,
            collection,
            snapshot,
            undo_window_ms: self.window.as_millis() as u64,
        })
    }

    /// Re-inserts the pending snapshot as a brand-new entry.
    ///
    /// Returns `Ok(None)` when the window has closed or `token` is not the
    /// user's pending undo; neither is an error. Expired slots of every user
    /// are dropped on the way.
    pub async fn restore(&self, user_id: Uuid, token: Uuid) -> Result<Option<String>, RepoError> {
        let undo = {
            let mut pending = self.pending.lock().await;
            purge_expired(&mut pending, Instant::now());
            if !pending.get(&user_id).is_some_and(|p| p.token == token) {
                debug!(%user_id, %token, "no matching undo pending");
                return Ok(None);
            }
            pending.remove(&user_id)
        };
        let Some(undo) = undo else {
            return Ok(None);
        };

        match self
            .repo
            .append(user_id, undo.collection, undo.snapshot.clone())
            .await
        {
            Ok(new_id) => {
                info!(%user_id, collection = %undo.collection, %new_id, "entry restored");
                Ok(Some(new_id))
            }
            Err(e) => {
                warn!(error = %e, %user_id, "restore failed; keeping undo pending");
                self.pending.lock().await.entry(user_id).or_insert(undo);
                Err(e)
            }
        }
    }

    #[cfg(test)]
    async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

fn purge_expired(pending: &mut HashMap<Uuid, PendingUndo>, now: Instant) {
    let before = pending.len();
    pending.retain(|_, p| p.deadline > now);
    let purged = before - pending.len();
    if purged > 0 {
        debug!(purged, "expired undo slots dropped");
    }
}
