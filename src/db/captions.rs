//! Caption documents and failure records.

use crate::error::{DatabaseError, ErrorKind, PersistError};
use crate::store::DocumentStore;
use crate::types::{CaptionRecord, PostId, bucket_of};
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashSet;

use super::{Database, MAX_IDS_PER_QUERY, StoredCaption, dense_bounds, storable_ids};

impl Database {
    /// Insert or overwrite the caption for a post
    ///
    /// A successful write clears any earlier failure on the same row.
    pub async fn upsert_caption(&self, record: &CaptionRecord) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let caption = serde_json::to_string(&record.caption)?;
        let metadata = serde_json::to_string(&record.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO captions (
                id, bucket, success, caption, language, model_id, image_url, prompt, metadata,
                error_kind, error_message, created_at, updated_at
            )
            VALUES (?, ?, 1, ?, ?, ?, ?, ?, ?, NULL, NULL, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                bucket = excluded.bucket,
                success = 1,
                caption = excluded.caption,
                language = excluded.language,
                model_id = excluded.model_id,
                image_url = excluded.image_url,
                prompt = excluded.prompt,
                metadata = excluded.metadata,
                error_kind = NULL,
                error_message = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.id)
        .bind(bucket_of(record.id) as i64)
        .bind(caption)
        .bind(record.language.code())
        .bind(&record.model_id)
        .bind(&record.image_url)
        .bind(&record.prompt)
        .bind(metadata)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to upsert caption {}: {}",
                record.id, e
            )))
        })?;

        Ok(())
    }

    /// Record a failed task
    ///
    /// Rows that already hold a successful caption are left untouched.
    pub async fn record_caption_failure(
        &self,
        id: PostId,
        kind: ErrorKind,
        message: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO captions (id, bucket, success, error_kind, error_message, created_at, updated_at)
            VALUES (?, ?, 0, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                error_kind = excluded.error_kind,
                error_message = excluded.error_message,
                updated_at = excluded.updated_at
            WHERE captions.success = 0
            "#,
        )
        .bind(id)
        .bind(bucket_of(id) as i64)
        .bind(kind.as_str())
        .bind(message)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record failure for {}: {}",
                id, e
            )))
        })?;

        Ok(())
    }

    /// IDs among `ids` that hold a successful caption
    pub async fn processed_ids(&self, ids: &[PostId]) -> Result<HashSet<PostId>> {
        let ids = storable_ids(ids);
        let wanted: HashSet<PostId> = ids.iter().copied().collect();

        if let Some((lo, hi)) = dense_bounds(&ids) {
            let found: Vec<PostId> = sqlx::query_scalar(
                "SELECT id FROM captions WHERE success = 1 AND id BETWEEN ? AND ?",
            )
            .bind(lo)
            .bind(hi)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to query processed ids: {}",
                    e
                )))
            })?;
            return Ok(found.into_iter().filter(|id| wanted.contains(id)).collect());
        }

        let mut processed = HashSet::new();
        for chunk in ids.chunks(MAX_IDS_PER_QUERY) {
            let mut query_builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT id FROM captions WHERE success = 1 AND id IN (");
            let mut separated = query_builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            let found: Vec<PostId> = query_builder
                .build_query_scalar()
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query processed ids: {}",
                        e
                    )))
                })?;
            processed.extend(found);
        }

        Ok(processed)
    }

    /// Fetch the stored caption row for a post
    pub async fn get_caption(&self, id: PostId) -> Result<Option<StoredCaption>> {
        sqlx::query_as("SELECT * FROM captions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get caption {}: {}",
                    id, e
                )))
            })
    }

    /// Number of caption rows, successful or not
    pub async fn count_captions(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM captions")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count captions: {}",
                    e
                )))
            })
    }
}

#[async_trait]
impl DocumentStore for Database {
    async fn upsert_caption(&self, record: &CaptionRecord) -> std::result::Result<(), PersistError> {
        Database::upsert_caption(self, record)
            .await
            .map_err(PersistError::from)
    }

    async fn record_failure(
        &self,
        id: PostId,
        kind: ErrorKind,
        message: &str,
    ) -> std::result::Result<(), PersistError> {
        self.record_caption_failure(id, kind, message)
            .await
            .map_err(PersistError::from)
    }

    async fn query_processed(&self, ids: &[PostId]) -> Result<HashSet<PostId>> {
        self.processed_ids(ids).await
    }
}
