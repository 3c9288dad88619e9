use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::broadcast;
use tracing::error;
use uuid::Uuid;

use super::model::{Collection, StoredRecord};
use super::repo::{ChangeFeed, ChangeNotice, EntryRepository, RepoError};

/// Postgres-backed store: one JSONB row per record, keyed by
/// `(user_id, collection, key)`. `seq` keeps insertion order.
#[derive(Clone)]
pub struct PgEntryRepository {
    db: PgPool,
    feed: ChangeFeed,
}

impl PgEntryRepository {
    pub fn new(db: PgPool) -> Self {
        Self {
            db,
            feed: ChangeFeed::default(),
        }
    }
}

fn unavailable(op: &'static str) -> impl FnOnce(sqlx::Error) -> RepoError {
    move |e| {
        error!(error = %e, op, "entry repository query failed");
        RepoError::Unavailable(format!("{op}: {e}"))
    }
}

#[async_trait]
impl EntryRepository for PgEntryRepository {
    async fn fetch_all(
        &self,
        user_id: Uuid,
        collection: Collection,
    ) -> Result<Vec<StoredRecord>, RepoError> {
        let rows = sqlx::query_as::<_, (String, Value)>(
            r#"
            SELECT key, record
              FROM entries
             WHERE user_id = $1 AND collection = $2
             ORDER BY seq ASC
            "#,
        )
        .bind(user_id)
        .bind(collection.as_str())
        .fetch_all(&self.db)
        .await
        .map_err(unavailable("fetch_all"))?;

        Ok(rows
            .into_iter()
            .map(|(key, record)| StoredRecord::new(key, record))
            .collect())
    }

    async fn append(
        &self,
        user_id: Uuid,
        collection: Collection,
        record: Value,
    ) -> Result<String, RepoError> {
        let key = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO entries (user_id, collection, key, record)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user_id)
        .bind(collection.as_str())
        .bind(&key)
        .bind(record)
        .execute(&self.db)
        .await
        .map_err(unavailable("append"))?;

        self.feed.publish(user_id, collection);
        Ok(key)
    }

    async fn update(
        &self,
        user_id: Uuid,
        collection: Collection,
        key: &str,
        partial: Value,
    ) -> Result<(), RepoError> {
        // jsonb `||` is a top-level merge, matching `merge_shallow`.
        sqlx::query(
            r#"
            INSERT INTO entries (user_id, collection, key, record)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, collection, key)
            DO UPDATE SET record = entries.record || EXCLUDED.record
            "#,
        )
        .bind(user_id)
        .bind(collection.as_str())
        .bind(key)
        .bind(partial)
        .execute(&self.db)
        .await
        .map_err(unavailable("update"))?;

        self.feed.publish(user_id, collection);
        Ok(())
    }

    async fn delete(
        &self,
        user_id: Uuid,
        collection: Collection,
        id: &str,
    ) -> Result<(), RepoError> {
        let res = sqlx::query(
            r#"
            DELETE FROM entries
             WHERE user_id = $1 AND collection = $2 AND key = $3
            "#,
        )
        .bind(user_id)
        .bind(collection.as_str())
        .bind(id)
        .execute(&self.db)
        .await
        .map_err(unavailable("delete"))?;

        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound {
                collection,
                id: id.to_string(),
            });
        }
        self.feed.publish(user_id, collection);
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<ChangeNotice> {
        self.feed.subscribe()
    }
}
