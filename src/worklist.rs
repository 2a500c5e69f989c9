//! Filtering of candidates into the dispatchable worklist

use crate::lookup::ResolutionMap;
use crate::types::{PostId, WorkItem};

/// Result of filtering: what to dispatch and what was skipped
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Worklist {
    /// IDs to dispatch, in candidate order
    pub items: Vec<WorkItem>,
    /// Candidates that already have a stored caption
    pub already_processed: Vec<PostId>,
    /// Candidates missing from the index or without a source URL
    pub unresolvable: Vec<PostId>,
}

impl Worklist {
    /// Number of IDs that will be dispatched
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is left to dispatch
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Split candidates into worklist items and skips
///
/// An ID is dispatched iff it is in the map, has a non-blank source URL and is
/// not already processed. An already-processed ID counts as such even when
/// its URL is gone.
pub fn build_worklist(candidates: &[PostId], map: &ResolutionMap) -> Worklist {
    let mut worklist = Worklist::default();

    for id in candidates {
        let Some(record) = map.get(id) else {
            worklist.unresolvable.push(*id);
            continue;
        };

        if record.already_processed {
            worklist.already_processed.push(*id);
            continue;
        }

        match record.source_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => worklist.items.push(WorkItem {
                id: *id,
                source_url: url.to_string(),
                metadata: record.metadata.clone(),
            }),
            _ => worklist.unresolvable.push(*id),
        }
    }

    worklist
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PostMetadata, ResolutionRecord};

    fn map_of(records: Vec<(u64, Option<&str>, bool)>) -> ResolutionMap {
        records
            .into_iter()
            .map(|(id, url, processed)| {
                (
                    PostId(id),
                    ResolutionRecord {
                        id: PostId(id),
                        source_url: url.map(str::to_string),
                        already_processed: processed,
                        metadata: PostMetadata::default(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn only_fetchable_unprocessed_ids_survive() {
        let candidates: Vec<PostId> = (1..=6).map(PostId).collect();
        let map = map_of(vec![
            (1, Some("http://img/1.png"), false),
            (2, Some("http://img/2.png"), true),
            (3, None, false),
            (4, Some("   "), false),
            (6, Some("http://img/6.webp"), false),
        ]);

        let worklist = build_worklist(&candidates, &map);

        let ids: Vec<PostId> = worklist.items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![PostId(1), PostId(6)]);
        assert_eq!(worklist.already_processed, vec![PostId(2)]);
        assert_eq!(worklist.unresolvable, vec![PostId(3), PostId(4), PostId(5)]);
    }

    #[test]
    fn worklist_follows_candidate_order() {
        let candidates = vec![PostId(9), PostId(3), PostId(7)];
        let map = map_of(vec![
            (3, Some("http://img/3"), false),
            (7, Some("http://img/7"), false),
            (9, Some("http://img/9"), false),
        ]);

        let ids: Vec<PostId> = build_worklist(&candidates, &map)
            .items
            .iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, candidates);
    }

    #[test]
    fn every_candidate_lands_in_exactly_one_bucket() {
        let candidates: Vec<PostId> = (0..50).map(PostId).collect();
        let map = map_of(
            (0..50)
                .filter(|i| i % 5 != 0)
                .map(|i| (i, (i % 3 != 0).then_some("http://img"), i % 7 == 0))
                .collect(),
        );

        let worklist = build_worklist(&candidates, &map);
        assert_eq!(
            worklist.len() + worklist.already_processed.len() + worklist.unresolvable.len(),
            candidates.len()
        );
        for item in &worklist.items {
            let record = &map[&item.id];
            assert!(!record.already_processed);
            assert!(record.source_url.is_some());
        }
    }

    #[test]
    fn urls_are_trimmed() {
        let map = map_of(vec![(1, Some("  http://img/1.png \n"), false)]);
        let worklist = build_worklist(&[PostId(1)], &map);
        assert_eq!(worklist.items[0].source_url, "http://img/1.png");
    }
}
