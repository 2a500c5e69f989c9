//! Core types for gemini-caption

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Number of IDs addressed by one bucket key
pub const BUCKET_SIZE: u64 = 100_000;

/// Bucket key containing an ID
pub fn bucket_of(id: PostId) -> u64 {
    id.0 / BUCKET_SIZE
}

/// Identifier of one image post
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PostId(pub u64);

impl PostId {
    /// Create a new PostId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for PostId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<PostId> for u64 {
    fn from(id: PostId) -> Self {
        id.0
    }
}

impl std::fmt::Display for PostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PostId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

// SQLite integers are signed; post IDs never approach i64::MAX.
impl sqlx::Type<sqlx::Sqlite> for PostId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for PostId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        let id = i64::try_from(self.0)?;
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&id, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for PostId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(u64::try_from(id)?))
    }
}

/// Caption language
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Simplified Chinese (default)
    #[default]
    Zh,
    /// English
    En,
}

impl Language {
    /// ISO code stored alongside each caption
    pub fn code(&self) -> &'static str {
        match self {
            Language::Zh => "zh",
            Language::En => "en",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    /// Accepts bare codes and locale strings such as `en_US.UTF-8` or `zh_CN:zh`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let primary = s.trim().split(['_', '-', '.', ':']).next().unwrap_or_default();
        match primary.to_ascii_lowercase().as_str() {
            "zh" => Ok(Language::Zh),
            "en" => Ok(Language::En),
            other => Err(format!("unsupported language '{}' (expected zh or en)", other)),
        }
    }
}

/// Tag metadata attached to a post, used for prompting and stored with the caption
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMetadata {
    /// Artist tags
    #[serde(default)]
    pub artists: Vec<String>,
    /// Character tags
    #[serde(default)]
    pub characters: Vec<String>,
    /// General descriptive tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Content rating, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<String>,
}

/// What the bulk lookup knows about one ID
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolutionRecord {
    /// The post
    pub id: PostId,
    /// Where the image can be fetched from; `None` means unfetchable for this run
    pub source_url: Option<String>,
    /// A successful caption is already stored
    pub already_processed: bool,
    /// Tag metadata for the post
    pub metadata: PostMetadata,
}

/// One entry of the worklist handed to the dispatcher
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItem {
    /// The post
    pub id: PostId,
    /// Resolved, non-empty image URL
    pub source_url: String,
    /// Tag metadata for the post
    pub metadata: PostMetadata,
}

/// Why a task was skipped
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A successful caption already exists
    AlreadyProcessed,
    /// No source URL could be resolved
    Unresolvable,
    /// The run was cancelled before the task started
    Cancelled,
    /// The task was running when the shutdown grace period ran out
    Aborted,
}

/// A caption that made it into the store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaptionResult {
    /// Parsed (and possibly repaired) caption document
    pub caption: serde_json::Value,
    /// Post metadata the caption was generated with
    pub metadata: PostMetadata,
}

/// Terminal state of one task; immutable once assigned
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Caption generated and persisted
    Succeeded(CaptionResult),
    /// No work was done
    Skipped {
        /// Why
        reason: SkipReason,
    },
    /// The pipeline stopped with an error
    Failed {
        /// Report classification
        kind: ErrorKind,
        /// Human-readable detail
        message: String,
    },
}

impl TaskOutcome {
    /// Build a failed outcome
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        TaskOutcome::Failed {
            kind,
            message: message.into(),
        }
    }

    /// Build a skipped outcome
    pub fn skipped(reason: SkipReason) -> Self {
        TaskOutcome::Skipped { reason }
    }

    /// Whether this outcome is a success
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded(_))
    }
}

/// Per-task pipeline stage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Admitted, not started
    Pending,
    /// Downloading image bytes
    Fetching,
    /// Waiting on the captioning service
    Captioning,
    /// Writing the caption document
    Persisting,
}

/// Image bytes plus the MIME type to declare to the captioning service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageData {
    /// Raw encoded image
    pub bytes: Vec<u8>,
    /// e.g. `image/png`
    pub mime_type: String,
}

/// Request sent to the captioning service
#[derive(Clone, Debug)]
pub struct CaptionRequest<'a> {
    /// Image to describe
    pub image: &'a ImageData,
    /// Instruction text
    pub prompt: &'a str,
    /// Output language
    pub language: Language,
}

/// Document written to the store for a successful task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaptionRecord {
    /// The post
    pub id: PostId,
    /// Parsed caption document
    pub caption: serde_json::Value,
    /// Caption language
    pub language: Language,
    /// Model that produced the caption
    pub model_id: String,
    /// URL the image was fetched from
    pub image_url: String,
    /// Prompt sent with the image
    pub prompt: String,
    /// Post metadata
    pub metadata: PostMetadata,
}

/// Event emitted during a batch run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Filtering finished and the worklist is known
    BatchPlanned {
        /// Candidate IDs produced by the resolver
        candidates: usize,
        /// IDs that will be dispatched
        worklist: usize,
        /// IDs skipped because they already have a caption
        already_processed: usize,
        /// IDs skipped because no URL is known
        unresolvable: usize,
    },

    /// A task moved to a new stage
    TaskStage {
        /// Post ID
        id: PostId,
        /// New stage
        stage: Stage,
    },

    /// A task reached its terminal outcome
    TaskFinished {
        /// Post ID
        id: PostId,
        /// Outcome
        outcome: TaskOutcome,
    },

    /// Admission stopped because the run was cancelled
    CancellationRequested,

    /// All tasks are terminal
    BatchFinished {
        /// Succeeded count
        succeeded: u64,
        /// Skipped count
        skipped: u64,
        /// Failed count
        failed: u64,
    },
}

/// Counts of skipped IDs by reason
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipBreakdown {
    /// Already captioned before this run
    pub already_processed: u64,
    /// Missing from the post index or without a URL
    pub unresolvable: u64,
    /// Never started because of cancellation
    pub cancelled: u64,
    /// Abandoned after the shutdown grace period
    pub aborted: u64,
}

impl SkipBreakdown {
    /// Sum of all reasons
    pub fn total(&self) -> u64 {
        self.already_processed + self.unresolvable + self.cancelled + self.aborted
    }

    pub(crate) fn add(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::AlreadyProcessed => self.already_processed += 1,
            SkipReason::Unresolvable => self.unresolvable += 1,
            SkipReason::Cancelled => self.cancelled += 1,
            SkipReason::Aborted => self.aborted += 1,
        }
    }
}

/// One failed ID in the report
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// Post ID
    pub id: PostId,
    /// Classification
    pub kind: ErrorKind,
    /// Error message
    pub message: String,
}

/// Final summary of one batch run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchReport {
    /// Candidate IDs considered
    pub total: u64,
    /// Tasks that stored a caption
    pub succeeded: u64,
    /// IDs that did no work
    pub skipped: u64,
    /// Tasks that failed
    pub failed: u64,
    /// Skipped IDs by reason
    pub skipped_breakdown: SkipBreakdown,
    /// Failed IDs in ascending order
    pub failures: Vec<FailureDetail>,
    /// The run was cancelled before the worklist drained
    pub cancelled: bool,
    /// Wall-clock duration of the run
    #[serde(with = "millis_serde")]
    pub elapsed: Duration,
}

impl BatchReport {
    /// IDs that should be re-run
    pub fn failed_ids(&self) -> Vec<PostId> {
        self.failures.iter().map(|f| f.id).collect()
    }

    /// Failures of a single kind
    pub fn failures_of(&self, kind: ErrorKind) -> impl Iterator<Item = &FailureDetail> {
        self.failures.iter().filter(move |f| f.kind == kind)
    }
}

mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
