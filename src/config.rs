//! Configuration types for gemini-caption

use crate::error::{Error, Result};
use crate::types::Language;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Batch behavior configuration (concurrency, language, cancellation)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum number of per-task pipelines running at once (default: 5)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Caption language (default: zh)
    #[serde(default)]
    pub language: Language,

    /// How long in-flight tasks may keep running after cancellation (default: 30 seconds)
    ///
    /// Tasks still running when the grace period ends are abandoned: their network
    /// calls are dropped and they are reported as skipped.
    #[serde(default = "default_grace_period", with = "duration_serde")]
    pub shutdown_grace_period: Duration,

    /// Run-level deadline; reaching it cancels the run (default: none)
    #[serde(default, with = "optional_duration_serde")]
    pub run_timeout: Option<Duration>,

    /// Also write each successful caption to `<output_dir>/<id>_caption.json`
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Also save each fetched image to `<output_dir>/<id>.<ext>` (requires `output_dir`)
    #[serde(default)]
    pub save_image: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            language: Language::default(),
            shutdown_grace_period: default_grace_period(),
            run_timeout: None,
            output_dir: None,
            save_image: false,
        }
    }
}

/// Retry configuration for the captioning call
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of captioning attempts, including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (default: 5 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Timeout for a single attempt; expiry counts as a transient failure (default: 120 seconds)
    #[serde(default = "default_attempt_timeout", with = "duration_serde")]
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
            attempt_timeout: default_attempt_timeout(),
        }
    }
}

/// Gemini API settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Base URL of the Generative Language API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// API key sent with every request
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model used for captioning (default: gemini-2.0-flash-lite-001)
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// Upper bound on generated tokens per caption (default: 4096)
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: None,
            model_id: default_model_id(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

/// HTTP image source settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageSourceConfig {
    /// Timeout for one image download (default: 60 seconds)
    #[serde(default = "default_image_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// User-Agent header sent to image hosts
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ImageSourceConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_image_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Data storage settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database holding the post index and caption documents (default: ./captions.db)
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration
///
/// Every field has a default, so an empty JSON object is a valid configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Batch behavior
    #[serde(default)]
    pub batch: BatchConfig,

    /// Captioning retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Gemini API settings
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Image source settings
    #[serde(default)]
    pub images: ImageSourceConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_json_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read config file {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Reject settings that would make the run meaningless
    pub fn validate(&self) -> Result<()> {
        if self.batch.max_concurrency == 0 {
            return Err(Error::config(
                "max_concurrency",
                "max_concurrency must be at least 1",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config(
                "max_attempts",
                "max_attempts must be at least 1",
            ));
        }
        if self.retry.backoff_multiplier.is_nan() || self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "backoff_multiplier",
                "backoff_multiplier must be at least 1.0",
            ));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(Error::config(
                "initial_delay",
                "initial_delay must not exceed max_delay",
            ));
        }
        if self.retry.attempt_timeout.is_zero() {
            return Err(Error::config(
                "attempt_timeout",
                "attempt_timeout must be greater than zero",
            ));
        }
        if self.batch.save_image && self.batch.output_dir.is_none() {
            return Err(Error::config(
                "save_image",
                "save_image needs output_dir to be set",
            ));
        }
        if self.gemini.model_id.trim().is_empty() {
            return Err(Error::config("model_id", "model_id must not be empty"));
        }
        Ok(())
    }
}

// Default value functions
fn default_max_concurrency() -> usize {
    5
}

fn default_grace_period() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_attempt_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_true() -> bool {
    true
}

fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_model_id() -> String {
    "gemini-2.0-flash-lite-001".to_string()
}

fn default_max_output_tokens() -> u32 {
    4096
}

fn default_image_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_user_agent() -> String {
    concat!("gemini-caption/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./captions.db")
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
