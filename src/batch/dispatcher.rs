//! Concurrency-bounded dispatcher
//!
//! Admission is a semaphore: a task is spawned only after it holds a permit,
//! and it keeps the permit until its outcome is recorded. Admission races the
//! run's cancellation token, so cancelling stops new tasks immediately. In-flight
//! tasks then get a grace period before an abort token drops their pipelines.

use super::aggregator::ReportAggregator;
use super::pipeline::{PipelineContext, run_pipeline};
use crate::error::ErrorKind;
use crate::types::{Event, PostId, SkipReason, Stage, TaskOutcome, WorkItem};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Dispatch settings for one run
pub(crate) struct DispatchPlan {
    pub(crate) items: Vec<WorkItem>,
    pub(crate) max_concurrency: usize,
    pub(crate) grace_period: Duration,
    pub(crate) cancel: CancellationToken,
}

/// Run every work item to a terminal outcome
///
/// Returns `true` if the run was cancelled before all items finished.
pub(crate) async fn dispatch(
    ctx: Arc<PipelineContext>,
    plan: DispatchPlan,
    aggregator: Arc<ReportAggregator>,
) -> bool {
    let DispatchPlan {
        items,
        max_concurrency,
        grace_period,
        cancel,
    } = plan;

    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let abort = CancellationToken::new();
    let mut tasks: JoinSet<()> = JoinSet::new();
    let mut task_ids: HashMap<Id, PostId> = HashMap::new();
    let mut unstarted: Vec<PostId> = Vec::new();

    let mut remaining = items.into_iter();
    for item in remaining.by_ref() {
        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = acquired else {
            unstarted.push(item.id);
            break;
        };

        // Reap finished tasks so the id map stays bounded by the concurrency limit
        while let Some(result) = tasks.try_join_next_with_id() {
            reap(result, &mut task_ids, &aggregator);
        }

        let id = item.id;
        ctx.emit(Event::TaskStage {
            id,
            stage: Stage::Pending,
        });

        let ctx = ctx.clone();
        let aggregator = aggregator.clone();
        let abort = abort.clone();
        let handle = tasks.spawn(async move {
            let _permit = permit;

            let outcome = tokio::select! {
                biased;
                _ = abort.cancelled() => TaskOutcome::skipped(SkipReason::Aborted),
                outcome = run_pipeline(&ctx, &item) => outcome,
            };

            finish_task(&ctx, &aggregator, &abort, id, outcome).await;
        });
        task_ids.insert(handle.id(), id);
    }
    unstarted.extend(remaining.map(|item| item.id));

    let mut cancelled = !unstarted.is_empty();
    if cancelled {
        announce_cancellation(&ctx, unstarted.len(), tasks.len());
        for id in unstarted {
            let outcome = TaskOutcome::skipped(SkipReason::Cancelled);
            if aggregator.record(id, &outcome) {
                ctx.emit(Event::TaskFinished { id, outcome });
            }
        }
    }

    // Cancellation while draining starts the grace period too
    let drained = tokio::select! {
        biased;
        _ = drain(&mut tasks, &mut task_ids, &aggregator) => true,
        _ = cancel.cancelled() => false,
    };

    if !drained {
        if !cancelled {
            cancelled = true;
            announce_cancellation(&ctx, 0, tasks.len());
        }

        let finished_in_grace =
            tokio::time::timeout(grace_period, drain(&mut tasks, &mut task_ids, &aggregator))
                .await
                .is_ok();

        if !finished_in_grace {
            tracing::warn!(
                in_flight = tasks.len(),
                grace_secs = grace_period.as_secs_f64(),
                "grace period elapsed, aborting in-flight tasks"
            );
            abort.cancel();
            drain(&mut tasks, &mut task_ids, &aggregator).await;
        }
    }

    cancelled
}

fn announce_cancellation(ctx: &PipelineContext, unstarted: usize, in_flight: usize) {
    tracing::warn!(unstarted, in_flight, "batch cancelled, no further tasks will start");
    ctx.emit(Event::CancellationRequested);
}

async fn finish_task(
    ctx: &PipelineContext,
    aggregator: &ReportAggregator,
    abort: &CancellationToken,
    id: PostId,
    outcome: TaskOutcome,
) {
    match &outcome {
        TaskOutcome::Succeeded(_) => tracing::info!(post_id = id.0, "caption stored"),
        TaskOutcome::Skipped { reason } => {
            tracing::warn!(post_id = id.0, ?reason, "task skipped")
        }
        TaskOutcome::Failed { kind, message } => {
            tracing::error!(post_id = id.0, kind = %kind, error = %message, "task failed")
        }
    }

    if !aggregator.record(id, &outcome) {
        return;
    }

    if let TaskOutcome::Failed { kind, message } = &outcome {
        // Best effort; the report already has the failure
        tokio::select! {
            biased;
            _ = abort.cancelled() => {}
            result = ctx.store.record_failure(id, *kind, message) => {
                if let Err(e) = result {
                    tracing::warn!(post_id = id.0, error = %e, "failed to record task failure");
                }
            }
        }
    }

    ctx.emit(Event::TaskFinished { id, outcome });
}

async fn drain(
    tasks: &mut JoinSet<()>,
    task_ids: &mut HashMap<Id, PostId>,
    aggregator: &ReportAggregator,
) {
    while let Some(result) = tasks.join_next_with_id().await {
        reap(result, task_ids, aggregator);
    }
}

/// Account for a task that ended without recording its own outcome
fn reap(
    result: Result<(Id, ()), JoinError>,
    task_ids: &mut HashMap<Id, PostId>,
    aggregator: &ReportAggregator,
) {
    let (task_id, error) = match result {
        Ok((task_id, ())) => (task_id, None),
        Err(e) => (e.id(), Some(e)),
    };

    let Some(post_id) = task_ids.remove(&task_id) else {
        return;
    };
    let Some(error) = error else {
        return;
    };

    let outcome = if error.is_panic() {
        TaskOutcome::failed(ErrorKind::Internal, format!("task panicked: {}", error))
    } else {
        TaskOutcome::skipped(SkipReason::Aborted)
    };

    if aggregator.record(post_id, &outcome) {
        tracing::error!(post_id = post_id.0, error = %error, "task ended abnormally");
    }
}
