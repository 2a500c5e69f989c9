//! Per-task pipeline: fetch, caption, persist

use crate::captioner::{Captioner, repair_json};
use crate::config::RetryConfig;
use crate::error::ErrorKind;
use crate::image_source::{ImageSource, extension_for_mime};
use crate::prompt::build_prompt;
use crate::retry::call_with_retry;
use crate::store::DocumentStore;
use crate::types::{
    CaptionRecord, CaptionRequest, CaptionResult, Event, ImageData, Language, PostId, Stage,
    TaskOutcome, WorkItem,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Everything a task needs, shared read-only across tasks
pub(crate) struct PipelineContext {
    pub(crate) images: Arc<dyn ImageSource>,
    pub(crate) captioner: Arc<dyn Captioner>,
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) retry: RetryConfig,
    pub(crate) language: Language,
    pub(crate) output_dir: Option<PathBuf>,
    pub(crate) save_image: bool,
    pub(crate) event_tx: broadcast::Sender<Event>,
}

impl PipelineContext {
    pub(crate) fn emit(&self, event: Event) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn stage(&self, id: PostId, stage: Stage) {
        tracing::debug!(post_id = id.0, ?stage, "task stage");
        self.emit(Event::TaskStage { id, stage });
    }
}

/// Drive one work item to its terminal outcome
///
/// Every error is folded into the returned outcome.
pub(crate) async fn run_pipeline(ctx: &PipelineContext, item: &WorkItem) -> TaskOutcome {
    let id = item.id;

    ctx.stage(id, Stage::Fetching);
    let image = match ctx.images.fetch(&item.source_url).await {
        Ok(image) => image,
        Err(e) => return TaskOutcome::failed(ErrorKind::FetchError, e.to_string()),
    };

    if let Some(dir) = ctx.output_dir.as_deref().filter(|_| ctx.save_image) {
        if let Err(e) = write_image_file(dir, id, &image).await {
            tracing::warn!(post_id = id.0, error = %e, "failed to save image");
        }
    }

    ctx.stage(id, Stage::Captioning);
    let prompt = build_prompt(&item.metadata, ctx.language);
    let request = CaptionRequest {
        image: &image,
        prompt: &prompt,
        language: ctx.language,
    };

    let text = match call_with_retry(&ctx.retry, || ctx.captioner.caption(&request)).await {
        Ok(text) => text,
        Err(e) => return TaskOutcome::failed(ErrorKind::from(&e), e.to_string()),
    };

    let caption = match repair_json(&text) {
        Ok(caption) => caption,
        Err(e) => return TaskOutcome::failed(ErrorKind::from(&e), e.to_string()),
    };

    ctx.stage(id, Stage::Persisting);
    let record = CaptionRecord {
        id,
        caption,
        language: ctx.language,
        model_id: ctx.captioner.model_id().to_string(),
        image_url: item.source_url.clone(),
        prompt,
        metadata: item.metadata.clone(),
    };

    if let Err(e) = ctx.store.upsert_caption(&record).await {
        return TaskOutcome::failed(ErrorKind::PersistenceError, e.to_string());
    }

    if let Some(dir) = &ctx.output_dir {
        // The store already holds the caption; a failed file copy is not a task failure
        if let Err(e) = write_caption_file(dir, &record).await {
            tracing::warn!(post_id = id.0, error = %e, "failed to write caption file");
        }
    }

    TaskOutcome::Succeeded(CaptionResult {
        caption: record.caption,
        metadata: record.metadata,
    })
}

async fn write_caption_file(dir: &Path, record: &CaptionRecord) -> crate::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}_caption.json", record.id));
    let json = serde_json::to_vec_pretty(record)?;
    tokio::fs::write(&path, json).await?;
    Ok(())
}

async fn write_image_file(dir: &Path, id: PostId, image: &ImageData) -> crate::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}.{}", id, extension_for_mime(&image.mime_type)));
    tokio::fs::write(&path, &image.bytes).await?;
    Ok(())
}
