//! Bulk resolution of candidate IDs
//!
//! The whole candidate set is answered by one round trip to the post index
//! and one to the document store. Per-ID queries are never issued.

use crate::error::{Error, Result};
use crate::store::DocumentStore;
use crate::types::{PostId, ResolutionRecord};
use async_trait::async_trait;
use std::collections::HashMap;

/// Mapping from post ID to what is known about it
pub type ResolutionMap = HashMap<PostId, ResolutionRecord>;

/// Index of fetchable posts
#[async_trait]
pub trait BulkLookup: Send + Sync {
    /// Resolve every ID in `ids` with a single batched query
    ///
    /// IDs the index does not know may be missing from the result.
    async fn lookup(&self, ids: &[PostId]) -> Result<ResolutionMap>;
}

/// Resolve the candidate set and mark IDs the store already holds
///
/// Any failure of either round trip is `LookupUnavailable`: without both
/// answers no reliable worklist can be formed.
pub async fn fetch_resolutions(
    lookup: &dyn BulkLookup,
    store: &dyn DocumentStore,
    candidates: &[PostId],
) -> Result<ResolutionMap> {
    if candidates.is_empty() {
        return Ok(ResolutionMap::new());
    }

    let mut map = lookup
        .lookup(candidates)
        .await
        .map_err(|e| unavailable("post index", e))?;

    let processed = store
        .query_processed(candidates)
        .await
        .map_err(|e| Error::LookupUnavailable(format!("document store: {}", e)))?;

    for id in processed {
        if let Some(record) = map.get_mut(&id) {
            record.already_processed = true;
        }
    }

    tracing::debug!(
        candidates = candidates.len(),
        resolved = map.len(),
        "bulk lookup complete"
    );

    Ok(map)
}

fn unavailable(source: &str, e: Error) -> Error {
    match e {
        Error::LookupUnavailable(_) => e,
        other => Error::LookupUnavailable(format!("{}: {}", source, other)),
    }
}
