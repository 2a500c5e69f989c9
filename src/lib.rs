//! # gemini-caption
//!
//! Batch image captioning over bucketed post IDs.
//!
//! A batch is a contiguous ID range, a bucket key (100,000 IDs per bucket) or an
//! explicit ID list. Each candidate is resolved to an image URL in one bulk
//! lookup, already-captioned posts are skipped, and the rest are captioned by
//! a vision-language model with bounded concurrency, retry on transient errors
//! and idempotent persistence. Every candidate ends up with exactly one outcome
//! in the final [`BatchReport`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use gemini_caption::{
//!     BatchRequest, BatchRunner, Config, Database, GeminiCaptioner, HttpImageSource,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.gemini.api_key = Some("your-key".to_string());
//!
//!     let db = Arc::new(Database::new(&config.persistence.database_path).await?);
//!     let runner = BatchRunner::new(
//!         config.clone(),
//!         db.clone(),
//!         Arc::new(HttpImageSource::new(&config.images)?),
//!         Arc::new(GeminiCaptioner::new(&config.gemini)?),
//!         db,
//!     )?;
//!
//!     // Subscribe to events
//!     let mut events = runner.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = runner.run(&BatchRequest::Key(76)).await?;
//!     println!("{} succeeded, {} failed", report.succeeded, report.failed);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Batch orchestration: dispatch, pipeline and reporting
pub mod batch;
/// Vision-language captioning backends
pub mod captioner;
/// Configuration types
pub mod config;
/// SQLite persistence layer
pub mod db;
/// Error types
pub mod error;
/// Image download
pub mod image_source;
/// Bulk resolution of post IDs
pub mod lookup;
/// Caption prompt construction
pub mod prompt;
/// Batch request resolution
pub mod resolver;
/// Retry logic with exponential backoff
pub mod retry;
/// Caption persistence seam
pub mod store;
/// Core types and events
pub mod types;
/// Worklist construction
pub mod worklist;

// Re-export commonly used types
pub use batch::BatchRunner;
pub use captioner::{Captioner, GeminiCaptioner};
pub use config::Config;
pub use db::Database;
pub use error::{CaptionError, Error, ErrorKind, FetchError, PersistError, Result};
pub use image_source::{HttpImageSource, ImageSource};
pub use lookup::BulkLookup;
pub use resolver::BatchRequest;
pub use store::DocumentStore;
pub use types::{BatchReport, Event, Language, PostId, SkipReason, Stage, TaskOutcome};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives a termination signal
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// A second signal is not handled here; the runner's grace period bounds how
/// long shutdown takes.
///
/// # Example
///
/// ```no_run
/// # use gemini_caption::{BatchRunner, cancel_on_signal};
/// # fn wire(runner: &BatchRunner) {
/// tokio::spawn(cancel_on_signal(runner.cancel_token()));
/// # }
/// ```
pub async fn cancel_on_signal(token: CancellationToken) {
    tokio::select! {
        _ = wait_for_signal() => {
            tracing::warn!("shutdown signal received, cancelling batch");
            token.cancel();
        }
        _ = token.cancelled() => {}
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{Signal, SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    fn register(kind: SignalKind, name: &'static str) -> Option<Signal> {
        signal(kind)
            .inspect_err(|e| tracing::warn!(signal = name, error = %e, "could not register signal handler"))
            .ok()
    }

    async fn recv(signal: Option<&mut Signal>) {
        match signal {
            Some(signal) => {
                signal.recv().await;
            }
            None => std::future::pending().await,
        }
    }

    let mut sigterm = register(SignalKind::terminate(), "SIGTERM");
    let mut sigint = register(SignalKind::interrupt(), "SIGINT");

    if sigterm.is_none() && sigint.is_none() {
        tracing::error!("no signal handlers registered, using ctrl_c fallback");
        wait_for_ctrl_c().await;
        return;
    }

    let received = tokio::select! {
        _ = recv(sigterm.as_mut()) => "SIGTERM",
        _ = recv(sigint.as_mut()) => "SIGINT",
    };
    tracing::info!(signal = received, "signal received");
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
    tracing::info!(signal = "ctrl_c", "signal received");
}

/// Resolves on Ctrl+C; never resolves if the listener cannot be installed
async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl_c");
        std::future::pending::<()>().await;
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_listener_exits_when_batch_is_cancelled() {
        let token = CancellationToken::new();
        let listener = tokio::spawn(cancel_on_signal(token.clone()));

        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .expect("listener should stop once the batch is cancelled")
            .unwrap();
    }

    #[tokio::test]
    async fn signal_listener_leaves_token_alone_while_idle() {
        let token = CancellationToken::new();
        let listener = tokio::spawn(cancel_on_signal(token.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!token.is_cancelled());
        assert!(!listener.is_finished());
        listener.abort();
    }
}
