//! # caption-batch
//!
//! Caption one batch of posts: an ID range, a bucket key or an explicit ID list.
//!
//! Exits non-zero only for run-level failures (bad arguments, unreadable
//! configuration, unavailable lookup). Per-post failures are part of the JSON
//! report printed on stdout.

use clap::Parser;
use gemini_caption::{
    BatchReport, BatchRequest, BatchRunner, Config, Database, GeminiCaptioner, HttpImageSource,
    Language, PostId, Result, cancel_on_signal,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "caption-batch")]
#[command(about = "Caption a batch of posts with a vision-language model")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Bucket key; covers IDs key*100000 ..= key*100000+99999
    #[arg(long, conflicts_with_all = ["start_id", "end_id", "ids"])]
    key: Option<i64>,

    /// First ID of an inclusive range
    #[arg(long, requires = "end_id", conflicts_with = "ids")]
    start_id: Option<u64>,

    /// Last ID of an inclusive range
    #[arg(long, requires = "start_id", conflicts_with = "ids")]
    end_id: Option<u64>,

    /// Explicit comma-separated ID list, e.g. to re-run failed posts
    #[arg(long, value_delimiter = ',')]
    ids: Option<Vec<u64>>,

    /// Maximum number of posts captioned at once
    #[arg(long, env = "MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// Gemini model identifier
    #[arg(long, env = "MODEL_ID")]
    model_id: Option<String>,

    /// Caption language (zh or en)
    #[arg(long, env = "LANGUAGE")]
    language: Option<Language>,

    /// SQLite database with the post index and captions
    #[arg(long, env = "DATABASE_PATH")]
    database: Option<PathBuf>,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Also write each caption to <dir>/<id>_caption.json
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Also save each fetched image to <output-dir>/<id>.<ext>
    #[arg(long)]
    save_image: bool,

    /// JSON configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "gemini_caption=debug" (default: RUST_LOG, then info)
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Append logs to this file as well as stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Cancel the run after this many seconds
    #[arg(long)]
    run_timeout_secs: Option<u64>,

    /// Write the JSON report to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Cli {
    fn request(&self) -> Result<BatchRequest> {
        match &self.ids {
            Some(ids) => Ok(BatchRequest::Ids(ids.iter().copied().map(PostId).collect())),
            None => BatchRequest::from_parts(self.key, self.start_id, self.end_id),
        }
    }

    fn build_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)?,
            None => Config::default(),
        };

        if let Some(n) = self.max_concurrency {
            config.batch.max_concurrency = n;
        }
        if let Some(model_id) = &self.model_id {
            config.gemini.model_id = model_id.clone();
        }
        if let Some(language) = self.language {
            config.batch.language = language;
        }
        if let Some(path) = &self.database {
            config.persistence.database_path = path.clone();
        }
        if let Some(key) = &self.api_key {
            config.gemini.api_key = Some(key.clone());
        }
        if let Some(dir) = &self.output_dir {
            config.batch.output_dir = Some(dir.clone());
        }
        if self.save_image {
            config.batch.save_image = true;
        }
        if let Some(secs) = self.run_timeout_secs {
            config.batch.run_timeout = Some(Duration::from_secs(secs));
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(cli: &Cli) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let file_layer = match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()?;
    Ok(())
}

async fn run(cli: &Cli) -> Result<BatchReport> {
    let request = cli.request()?;
    let config = cli.build_config()?;

    let db = Arc::new(Database::new(&config.persistence.database_path).await?);
    let runner = BatchRunner::new(
        config.clone(),
        db.clone(),
        Arc::new(HttpImageSource::new(&config.images)?),
        Arc::new(GeminiCaptioner::new(&config.gemini)?),
        db,
    )?;

    let signals = tokio::spawn(cancel_on_signal(runner.cancel_token()));
    let report = runner.run(&request).await;
    signals.abort();
    let report = report?;

    let json = serde_json::to_string_pretty(&report)?;
    if let Some(path) = &cli.report {
        tokio::fs::write(path, &json).await?;
        tracing::info!(path = %path.display(), "report written");
    }
    println!("{}", json);

    Ok(report)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(&cli).await {
        Ok(report) => {
            if report.failed > 0 {
                tracing::warn!(
                    failed = report.failed,
                    ids = ?report.failed_ids(),
                    "some posts failed; re-run them with --ids"
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, configuration = e.is_configuration_error(), "batch run failed");
            ExitCode::FAILURE
        }
    }
}
