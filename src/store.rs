//! Document store seam

use crate::error::{ErrorKind, PersistError, Result};
use crate::types::{CaptionRecord, PostId};
use async_trait::async_trait;
use std::collections::HashSet;

/// Durable home of generated captions, keyed by post ID
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or overwrite the caption for `record.id`
    ///
    /// Writing the same ID twice leaves exactly one record.
    async fn upsert_caption(&self, record: &CaptionRecord) -> std::result::Result<(), PersistError>;

    /// Remember a failed task for diagnostics
    ///
    /// Must not replace a successful caption and must not mark the ID processed.
    async fn record_failure(
        &self,
        id: PostId,
        kind: ErrorKind,
        message: &str,
    ) -> std::result::Result<(), PersistError>;

    /// Subset of `ids` that already hold a successful caption
    async fn query_processed(&self, ids: &[PostId]) -> Result<HashSet<PostId>>;
}
