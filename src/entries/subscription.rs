use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;
use uuid::Uuid;

use super::model::{Collection, StoredRecord};
use super::repo::{ChangeNotice, EntryRepository, RepoError};

/// Live view of one user's collection.
///
/// Yields the current snapshot first, then a fresh full snapshot after each
/// change. Dropping the subscription cancels it. `next` is cancel-safe: a
/// change seen by a dropped `next` future is still delivered by the next call.
///
/// A failed read is retried on the user's next write to any collection, so a
/// recovered repository is picked up even if this collection stays untouched.
pub struct Subscription {
    repo: Arc<dyn EntryRepository>,
    user_id: Uuid,
    collection: Collection,
    notices: broadcast::Receiver<ChangeNotice>,
    stale: bool,
    failed: bool,
}

impl Subscription {
    pub fn new(repo: Arc<dyn EntryRepository>, user_id: Uuid, collection: Collection) -> Self {
        // Listen before the first fetch so no write slips between them.
        let notices = repo.changes();
        Self {
            repo,
            user_id,
            collection,
            notices,
            stale: true,
            failed: false,
        }
    }

    /// Next snapshot, or `None` once the repository's feed is closed.
    pub async fn next(&mut self) -> Option<Result<Vec<StoredRecord>, RepoError>> {
        while !self.stale {
            match self.notices.recv().await {
                Ok(n)
                    if n.user_id == self.user_id
                        && (self.failed || n.collection == self.collection) =>
                {
                    self.stale = true;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, user_id = %self.user_id, "subscription lagged; refetching");
                    self.stale = true;
                }
                Err(RecvError::Closed) => return None,
            }
        }
        let snapshot = self.repo.fetch_all(self.user_id, self.collection).await;
        self.stale = false;
        self.failed = snapshot.is_err();
        Some(snapshot)
    }
}
