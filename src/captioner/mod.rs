//! Captioning service seam and its Gemini adapter

use crate::error::CaptionError;
use crate::types::CaptionRequest;
use async_trait::async_trait;

mod gemini;
pub mod repair;

pub use gemini::GeminiCaptioner;
pub use repair::repair_json;

/// Generates caption text for one image
///
/// Implementations return the raw text of the service's answer. Parsing and
/// repair happen in the pipeline so every backend gets the same treatment.
#[async_trait]
pub trait Captioner: Send + Sync {
    /// Model identifier stored with each caption
    fn model_id(&self) -> &str;

    /// Make one captioning attempt
    ///
    /// Retry is the caller's job; the error variant tells it whether to.
    async fn caption(&self, request: &CaptionRequest<'_>) -> Result<String, CaptionError>;
}
