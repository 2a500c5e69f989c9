//! Database layer for gemini-caption
//!
//! One SQLite file plays both external collaborators of a batch run: the
//! post index consulted by the bulk lookup, and the document store that
//! receives captions.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`posts`]: Post index and bulk resolution
//! - [`captions`]: Caption documents, failure records, processed queries

use crate::types::{PostId, PostMetadata, ResolutionRecord};
use sqlx::{FromRow, sqlite::SqlitePool};

mod captions;
mod migrations;
mod posts;

/// SQLite allows 999 bind variables per statement by default
const MAX_IDS_PER_QUERY: usize = 900;

/// Post to be inserted into the index
#[derive(Debug, Clone, Default)]
pub struct NewPost {
    /// Post ID
    pub id: PostId,
    /// Image URL, if one is known
    pub source_url: Option<String>,
    /// Tag metadata
    pub metadata: PostMetadata,
}

/// Post index row joined with its caption state
#[derive(Debug, Clone, FromRow)]
struct PostRow {
    id: PostId,
    source_url: Option<String>,
    artist_tags: String,
    character_tags: String,
    general_tags: String,
    rating: Option<String>,
    processed: bool,
}

impl From<PostRow> for ResolutionRecord {
    fn from(row: PostRow) -> Self {
        ResolutionRecord {
            id: row.id,
            source_url: row.source_url,
            already_processed: row.processed,
            metadata: PostMetadata {
                artists: split_tags(&row.artist_tags),
                characters: split_tags(&row.character_tags),
                tags: split_tags(&row.general_tags),
                rating: row.rating,
            },
        }
    }
}

/// Caption row as stored
#[derive(Debug, Clone, FromRow)]
pub struct StoredCaption {
    /// Post ID
    pub id: PostId,
    /// `id / BUCKET_SIZE`
    pub bucket: i64,
    /// Whether this row holds a usable caption
    pub success: bool,
    /// Caption document (JSON text)
    pub caption: Option<String>,
    /// Caption language code
    pub language: Option<String>,
    /// Model that produced the caption
    pub model_id: Option<String>,
    /// URL the image was fetched from
    pub image_url: Option<String>,
    /// Prompt sent with the image
    pub prompt: Option<String>,
    /// Post metadata (JSON text)
    pub metadata: Option<String>,
    /// Failure classification for unsuccessful rows
    pub error_kind: Option<String>,
    /// Failure detail for unsuccessful rows
    pub error_message: Option<String>,
    /// Unix timestamp of the first write
    pub created_at: i64,
    /// Unix timestamp of the latest write
    pub updated_at: i64,
}

/// Tags are stored space-separated, danbooru style
fn split_tags(tags: &str) -> Vec<String> {
    tags.split_whitespace().map(str::to_string).collect()
}

fn join_tags(tags: &[String]) -> String {
    tags.join(" ")
}

/// Bounds worth scanning as one `BETWEEN` range instead of `IN` lists
fn dense_bounds(ids: &[PostId]) -> Option<(PostId, PostId)> {
    let min = ids.iter().min()?;
    let max = ids.iter().max()?;
    let span = max.0.checked_sub(min.0)?.checked_add(1)?;
    let limit = (ids.len() as u64).checked_mul(2)?;
    (span <= limit).then_some((*min, *max))
}

/// IDs that fit an SQLite integer; larger ones cannot be stored, so they are never found
fn storable_ids(ids: &[PostId]) -> Vec<PostId> {
    ids.iter()
        .copied()
        .filter(|id| i64::try_from(id.0).is_ok())
        .collect()
}

/// Database handle for gemini-caption
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
