//! Expansion of a batch request into candidate post IDs

use crate::error::{Error, Result};
use crate::types::{BUCKET_SIZE, PostId};
use std::collections::HashSet;

/// What one invocation should process
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchRequest {
    /// Inclusive ID range
    Range {
        /// First ID
        start_id: u64,
        /// Last ID (inclusive)
        end_id: u64,
    },
    /// A whole bucket: `key * BUCKET_SIZE ..= (key + 1) * BUCKET_SIZE - 1`
    Key(i64),
    /// An explicit list, typically the failed subset of an earlier run
    Ids(Vec<PostId>),
}

impl BatchRequest {
    /// Build a request from optional command-line parts
    ///
    /// Exactly one of `key` or the `start_id`/`end_id` pair must be given.
    pub fn from_parts(key: Option<i64>, start_id: Option<u64>, end_id: Option<u64>) -> Result<Self> {
        match (key, start_id, end_id) {
            (Some(key), None, None) => Ok(BatchRequest::Key(key)),
            (None, Some(start_id), Some(end_id)) => Ok(BatchRequest::Range { start_id, end_id }),
            (Some(_), _, _) => Err(Error::config(
                "key",
                "specify either a key or a start/end range, not both",
            )),
            (None, None, None) => Err(Error::config(
                "key",
                "specify either a key or a start/end range",
            )),
            (None, Some(_), None) => Err(Error::config("end_id", "start_id requires end_id")),
            (None, None, Some(_)) => Err(Error::config("start_id", "end_id requires start_id")),
        }
    }

    /// Expand into the ordered candidate IDs
    ///
    /// Ranges and keys yield ascending IDs. Explicit lists keep their
    /// first-occurrence order with duplicates dropped.
    pub fn resolve(&self) -> Result<Vec<PostId>> {
        match self {
            BatchRequest::Range { start_id, end_id } => {
                if start_id > end_id {
                    return Err(Error::InvalidRange {
                        start: *start_id,
                        end: *end_id,
                    });
                }
                Ok((*start_id..=*end_id).map(PostId).collect())
            }
            BatchRequest::Key(key) => {
                let (start, end) = key_bounds(*key)?;
                Ok((start..=end).map(PostId).collect())
            }
            BatchRequest::Ids(ids) => {
                if ids.is_empty() {
                    return Err(Error::config("ids", "ID list is empty"));
                }
                let mut seen = HashSet::with_capacity(ids.len());
                Ok(ids.iter().copied().filter(|id| seen.insert(*id)).collect())
            }
        }
    }
}

impl std::fmt::Display for BatchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchRequest::Range { start_id, end_id } => write!(f, "range {}..={}", start_id, end_id),
            BatchRequest::Key(key) => write!(f, "key {}", key),
            BatchRequest::Ids(ids) => write!(f, "{} explicit ids", ids.len()),
        }
    }
}

/// Inclusive ID bounds addressed by a bucket key
pub fn key_bounds(key: i64) -> Result<(u64, u64)> {
    let key_u = u64::try_from(key).map_err(|_| Error::InvalidKey(key))?;
    let start = key_u.checked_mul(BUCKET_SIZE).ok_or(Error::InvalidKey(key))?;
    let end = start.checked_add(BUCKET_SIZE - 1).ok_or(Error::InvalidKey(key))?;
    Ok((start, end))
}
