//! Post index and bulk resolution.

use crate::error::DatabaseError;
use crate::lookup::{BulkLookup, ResolutionMap};
use crate::types::PostId;
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashSet;

use super::{Database, MAX_IDS_PER_QUERY, NewPost, PostRow, dense_bounds, join_tags, storable_ids};

const LOOKUP_SELECT: &str = r#"
    SELECT p.id, p.source_url, p.artist_tags, p.character_tags, p.general_tags, p.rating,
           COALESCE(c.success, 0) AS processed
    FROM posts p
    LEFT JOIN captions c ON c.id = p.id
"#;

impl Database {
    /// Insert or replace posts in the index
    ///
    /// Chunks the input to stay within SQLite's bind variable limit
    /// (6 variables per post).
    pub async fn upsert_posts(&self, posts: &[NewPost]) -> Result<()> {
        const MAX_POSTS_PER_BATCH: usize = MAX_IDS_PER_QUERY / 6;

        for chunk in posts.chunks(MAX_POSTS_PER_BATCH) {
            let mut query_builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO posts (id, source_url, artist_tags, character_tags, general_tags, rating) ",
            );

            query_builder.push_values(chunk, |mut b, post| {
                b.push_bind(post.id)
                    .push_bind(post.source_url.as_deref())
                    .push_bind(join_tags(&post.metadata.artists))
                    .push_bind(join_tags(&post.metadata.characters))
                    .push_bind(join_tags(&post.metadata.tags))
                    .push_bind(post.metadata.rating.as_deref());
            });

            query_builder.push(
                " ON CONFLICT(id) DO UPDATE SET \
                 source_url = excluded.source_url, \
                 artist_tags = excluded.artist_tags, \
                 character_tags = excluded.character_tags, \
                 general_tags = excluded.general_tags, \
                 rating = excluded.rating",
            );

            query_builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to insert posts: {}",
                        e
                    )))
                })?;
        }

        Ok(())
    }

    /// Resolve many posts at once
    ///
    /// Dense ID sets are answered with one `BETWEEN` scan; sparse sets use
    /// `IN` lists chunked to the bind variable limit. Only IDs present in the
    /// index appear in the result; IDs beyond the SQLite integer range are
    /// never present.
    pub async fn lookup_posts(&self, ids: &[PostId]) -> Result<ResolutionMap> {
        let ids = storable_ids(ids);
        let Some(bounds) = dense_bounds(&ids) else {
            return self.lookup_sparse(&ids).await;
        };

        let sql = format!("{} WHERE p.id BETWEEN ? AND ?", LOOKUP_SELECT);
        let rows: Vec<PostRow> = sqlx::query_as(&sql)
            .bind(bounds.0)
            .bind(bounds.1)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to look up posts: {}",
                    e
                )))
            })?;

        let wanted: HashSet<PostId> = ids.iter().copied().collect();
        Ok(rows
            .into_iter()
            .filter(|row| wanted.contains(&row.id))
            .map(|row| (row.id, row.into()))
            .collect())
    }

    async fn lookup_sparse(&self, ids: &[PostId]) -> Result<ResolutionMap> {
        let mut map = ResolutionMap::with_capacity(ids.len());

        for chunk in ids.chunks(MAX_IDS_PER_QUERY) {
            let mut query_builder: QueryBuilder<Sqlite> = QueryBuilder::new(LOOKUP_SELECT);
            query_builder.push(" WHERE p.id IN (");
            let mut separated = query_builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            let rows: Vec<PostRow> = query_builder
                .build_query_as()
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to look up posts: {}",
                        e
                    )))
                })?;

            map.extend(rows.into_iter().map(|row| (row.id, row.into())));
        }

        Ok(map)
    }

    /// Number of posts in the index
    pub async fn count_posts(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count posts: {}",
                    e
                )))
            })
    }
}

#[async_trait]
impl BulkLookup for Database {
    async fn lookup(&self, ids: &[PostId]) -> Result<ResolutionMap> {
        self.lookup_posts(ids).await
    }
}
