//! Thread-safe accumulation of task outcomes into a [`BatchReport`]

use crate::types::{BatchReport, FailureDetail, PostId, SkipBreakdown, TaskOutcome};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct AggregatorState {
    recorded: HashSet<PostId>,
    succeeded: u64,
    skipped: SkipBreakdown,
    failures: Vec<FailureDetail>,
}

/// Collects exactly one outcome per ID from concurrently finishing tasks
pub struct ReportAggregator {
    total: u64,
    state: Mutex<AggregatorState>,
}

impl ReportAggregator {
    /// Aggregator for a batch of `total` candidate IDs
    pub fn new(total: usize) -> Self {
        Self {
            total: total as u64,
            state: Mutex::new(AggregatorState {
                recorded: HashSet::with_capacity(total),
                ..AggregatorState::default()
            }),
        }
    }

    /// Record the terminal outcome of `id`
    ///
    /// Returns `false` and changes nothing if `id` already has an outcome.
    pub fn record(&self, id: PostId, outcome: &TaskOutcome) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if !state.recorded.insert(id) {
            tracing::warn!(post_id = id.0, "duplicate outcome ignored");
            return false;
        }

        match outcome {
            TaskOutcome::Succeeded(_) => state.succeeded += 1,
            TaskOutcome::Skipped { reason } => state.skipped.add(*reason),
            TaskOutcome::Failed { kind, message } => state.failures.push(FailureDetail {
                id,
                kind: *kind,
                message: message.clone(),
            }),
        }
        true
    }

    /// Whether `id` already has an outcome
    pub fn has_outcome(&self, id: PostId) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.recorded.contains(&id)
    }

    /// Number of IDs with an outcome so far
    pub fn recorded(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.recorded.len()
    }

    /// Build the final report
    pub fn finish(&self, cancelled: bool, elapsed: Duration) -> BatchReport {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let mut failures = state.failures.clone();
        failures.sort_by_key(|f| f.id);

        BatchReport {
            total: self.total,
            succeeded: state.succeeded,
            skipped: state.skipped.total(),
            failed: failures.len() as u64,
            skipped_breakdown: state.skipped.clone(),
            failures,
            cancelled,
            elapsed,
        }
    }
}
