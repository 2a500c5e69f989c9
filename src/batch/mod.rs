//! Batch orchestration
//!
//! A run flows strictly left to right:
//! resolver → bulk lookup → filter → dispatcher → (pipeline × N, bounded) → aggregator.
//!
//! Run-level errors (bad request shape, unavailable lookup) are returned from
//! [`BatchRunner::run`] before any task starts. Everything that goes wrong inside
//! a task ends up in the [`BatchReport`] instead.

use crate::captioner::Captioner;
use crate::config::Config;
use crate::error::Result;
use crate::image_source::ImageSource;
use crate::lookup::{BulkLookup, fetch_resolutions};
use crate::resolver::BatchRequest;
use crate::store::DocumentStore;
use crate::types::{BatchReport, Event, SkipReason, TaskOutcome};
use crate::worklist::build_worklist;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

mod aggregator;
mod dispatcher;
mod pipeline;

pub use aggregator::ReportAggregator;

use dispatcher::{DispatchPlan, dispatch};
use pipeline::PipelineContext;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;


/// Runs caption batches against a fixed set of collaborators
pub struct BatchRunner {
    config: Config,
    lookup: Arc<dyn BulkLookup>,
    store: Arc<dyn DocumentStore>,
    pipeline: Arc<PipelineContext>,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl BatchRunner {
    /// Wire a runner to its collaborators
    ///
    /// # Errors
    /// Returns a configuration error if `config` fails validation.
    pub fn new(
        config: Config,
        lookup: Arc<dyn BulkLookup>,
        images: Arc<dyn ImageSource>,
        captioner: Arc<dyn Captioner>,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(1000);

        let pipeline = Arc::new(PipelineContext {
            images,
            captioner,
            store: store.clone(),
            retry: config.retry.clone(),
            language: config.batch.language,
            output_dir: config.batch.output_dir.clone(),
            save_image: config.batch.save_image,
            event_tx: event_tx.clone(),
        });

        Ok(Self {
            config,
            lookup,
            store,
            pipeline,
            event_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to batch events
    ///
    /// Slow subscribers lag rather than block the run.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token that cancels any run of this runner
    ///
    /// Cancelling stops admission at once; in-flight tasks get the configured
    /// grace period. A cancelled runner stays cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute one batch
    ///
    /// # Errors
    /// Configuration errors (`InvalidRange`, `InvalidKey`, empty ID list) and
    /// `LookupUnavailable`. Task failures are reported, not returned.
    pub async fn run(&self, request: &BatchRequest) -> Result<BatchReport> {
        let started = Instant::now();

        let candidates = request.resolve()?;
        tracing::info!(request = %request, candidates = candidates.len(), "starting batch");

        let map = fetch_resolutions(self.lookup.as_ref(), self.store.as_ref(), &candidates).await?;
        let worklist = build_worklist(&candidates, &map);
        drop(map);

        let aggregator = Arc::new(ReportAggregator::new(candidates.len()));
        for id in &worklist.already_processed {
            aggregator.record(*id, &TaskOutcome::skipped(SkipReason::AlreadyProcessed));
        }
        for id in &worklist.unresolvable {
            aggregator.record(*id, &TaskOutcome::skipped(SkipReason::Unresolvable));
        }

        tracing::info!(
            worklist = worklist.len(),
            already_processed = worklist.already_processed.len(),
            unresolvable = worklist.unresolvable.len(),
            max_concurrency = self.config.batch.max_concurrency,
            "batch planned"
        );
        let _ = self.event_tx.send(Event::BatchPlanned {
            candidates: candidates.len(),
            worklist: worklist.len(),
            already_processed: worklist.already_processed.len(),
            unresolvable: worklist.unresolvable.len(),
        });

        let run_cancel = self.cancel.child_token();
        let deadline = self.config.batch.run_timeout.map(|timeout| {
            let token = run_cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                tracing::warn!(timeout_secs = timeout.as_secs(), "run timeout reached");
                token.cancel();
            })
        });

        let cancelled = dispatch(
            self.pipeline.clone(),
            DispatchPlan {
                items: worklist.items,
                max_concurrency: self.config.batch.max_concurrency,
                grace_period: self.config.batch.shutdown_grace_period,
                cancel: run_cancel,
            },
            aggregator.clone(),
        )
        .await;

        if let Some(deadline) = deadline {
            deadline.abort();
        }

        let report = aggregator.finish(cancelled, started.elapsed());

        tracing::info!(
            total = report.total,
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failed,
            cancelled = report.cancelled,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "batch finished"
        );
        let _ = self.event_tx.send(Event::BatchFinished {
            succeeded: report.succeeded,
            skipped: report.skipped,
            failed: report.failed,
        });

        Ok(report)
    }
}
