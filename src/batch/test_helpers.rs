//! Fake collaborators for batch tests.

use crate::captioner::Captioner;
use crate::config::{Config, RetryConfig};
use crate::error::{CaptionError, Error, ErrorKind, FetchError, PersistError, Result};
use crate::image_source::ImageSource;
use crate::lookup::{BulkLookup, ResolutionMap};
use crate::store::DocumentStore;
use crate::types::{CaptionRecord, CaptionRequest, ImageData, PostId, PostMetadata, ResolutionRecord};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub(crate) const CAPTION_JSON: &str = r#"{"short_summary": "a test image"}"#;

/// URL the fakes use for a post
pub(crate) fn url_for(id: u64) -> String {
    format!("https://img.test/{}.png", id)
}

/// Resolvable, unprocessed record for a post
pub(crate) fn resolvable(id: u64) -> ResolutionRecord {
    ResolutionRecord {
        id: PostId(id),
        source_url: Some(url_for(id)),
        already_processed: false,
        metadata: PostMetadata::default(),
    }
}

/// Config with millisecond retry delays so tests stay fast
pub(crate) fn fast_config(max_concurrency: usize) -> Config {
    let mut config = Config::default();
    config.batch.max_concurrency = max_concurrency;
    config.batch.shutdown_grace_period = Duration::from_millis(200);
    config.retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
        attempt_timeout: Duration::from_secs(5),
    };
    config
}

/// Posts between image fetch and caption upsert, shared by [`FakeImages`] and [`FakeStore`]
#[derive(Default)]
pub(crate) struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub(crate) struct FakeLookup {
    records: HashMap<PostId, ResolutionRecord>,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeLookup {
    pub(crate) fn with_records(records: Vec<ResolutionRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.id, r)).collect(),
            ..Self::default()
        }
    }

    pub(crate) fn resolving(ids: impl IntoIterator<Item = u64>) -> Self {
        Self::with_records(ids.into_iter().map(resolvable).collect())
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BulkLookup for FakeLookup {
    async fn lookup(&self, ids: &[PostId]) -> Result<ResolutionMap> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Other("connection refused".to_string()));
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.records.get(id).map(|r| (*id, r.clone())))
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct FakeStore {
    processed: Mutex<HashSet<PostId>>,
    captions: Mutex<HashMap<PostId, CaptionRecord>>,
    failures: Mutex<Vec<(PostId, ErrorKind)>>,
    reject: HashSet<PostId>,
    upserts: AtomicUsize,
    in_flight: Option<Arc<InFlight>>,
}

impl FakeStore {
    pub(crate) fn with_processed(ids: impl IntoIterator<Item = PostId>) -> Self {
        Self {
            processed: Mutex::new(ids.into_iter().collect()),
            ..Self::default()
        }
    }

    pub(crate) fn rejecting(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            reject: ids.into_iter().map(PostId).collect(),
            ..Self::default()
        }
    }

    pub(crate) fn tracking(in_flight: &Arc<InFlight>) -> Self {
        Self {
            in_flight: Some(in_flight.clone()),
            ..Self::default()
        }
    }

    pub(crate) fn caption(&self, id: u64) -> Option<CaptionRecord> {
        self.captions.lock().unwrap().get(&PostId(id)).cloned()
    }

    pub(crate) fn caption_count(&self) -> usize {
        self.captions.lock().unwrap().len()
    }

    pub(crate) fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub(crate) fn failures(&self) -> Vec<(PostId, ErrorKind)> {
        let mut failures = self.failures.lock().unwrap().clone();
        failures.sort_by_key(|(id, _)| *id);
        failures
    }
}

#[async_trait]
impl DocumentStore for FakeStore {
    async fn upsert_caption(&self, record: &CaptionRecord) -> std::result::Result<(), PersistError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        if self.reject.contains(&record.id) {
            return Err(PersistError("disk full".to_string()));
        }
        self.captions.lock().unwrap().insert(record.id, record.clone());
        self.processed.lock().unwrap().insert(record.id);
        if let Some(in_flight) = &self.in_flight {
            in_flight.leave();
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        id: PostId,
        kind: ErrorKind,
        _message: &str,
    ) -> std::result::Result<(), PersistError> {
        self.failures.lock().unwrap().push((id, kind));
        Ok(())
    }

    async fn query_processed(&self, ids: &[PostId]) -> Result<HashSet<PostId>> {
        let processed = self.processed.lock().unwrap();
        Ok(ids.iter().filter(|id| processed.contains(id)).copied().collect())
    }
}

/// Serves the URL itself as image bytes so the captioner can tell posts apart
#[derive(Default)]
pub(crate) struct FakeImages {
    missing: HashSet<String>,
    delay: Duration,
    in_flight: Option<Arc<InFlight>>,
}

impl FakeImages {
    pub(crate) fn missing(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            missing: ids.into_iter().map(url_for).collect(),
            ..Self::default()
        }
    }

    /// Slow downloads that count each post as in flight until its caption is stored
    pub(crate) fn tracking(in_flight: &Arc<InFlight>, delay: Duration) -> Self {
        Self {
            delay,
            in_flight: Some(in_flight.clone()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ImageSource for FakeImages {
    async fn fetch(&self, url: &str) -> std::result::Result<ImageData, FetchError> {
        if let Some(in_flight) = &self.in_flight {
            in_flight.enter();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.missing.contains(url) {
            return Err(FetchError::NotFound(url.to_string()));
        }
        Ok(ImageData {
            bytes: url.as_bytes().to_vec(),
            mime_type: "image/png".to_string(),
        })
    }
}

enum Behavior {
    Script(VecDeque<std::result::Result<String, CaptionError>>),
    Panic,
    Hang,
}

/// Scripted captioner that tracks call counts and peak concurrency
pub(crate) struct FakeCaptioner {
    behaviors: Mutex<HashMap<String, Behavior>>,
    delay: Duration,
    calls: Mutex<HashMap<String, usize>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeCaptioner {
    pub(crate) fn new() -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            calls: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Responses for successive attempts on a post; later attempts succeed
    pub(crate) fn script(
        self,
        id: u64,
        responses: Vec<std::result::Result<String, CaptionError>>,
    ) -> Self {
        self.behaviors
            .lock()
            .unwrap()
            .insert(url_for(id), Behavior::Script(responses.into()));
        self
    }

    pub(crate) fn fail_always(self, id: u64, error: CaptionError) -> Self {
        let responses = (0..16).map(|_| Err(error.clone())).collect();
        self.script(id, responses)
    }

    pub(crate) fn panic_on(self, id: u64) -> Self {
        self.behaviors
            .lock()
            .unwrap()
            .insert(url_for(id), Behavior::Panic);
        self
    }

    pub(crate) fn hang_on(self, id: u64) -> Self {
        self.behaviors
            .lock()
            .unwrap()
            .insert(url_for(id), Behavior::Hang);
        self
    }

    pub(crate) fn calls_for(&self, id: u64) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&url_for(id))
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub(crate) fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Captioner for FakeCaptioner {
    fn model_id(&self) -> &str {
        "fake-model"
    }

    async fn caption(
        &self,
        request: &CaptionRequest<'_>,
    ) -> std::result::Result<String, CaptionError> {
        let url = String::from_utf8_lossy(&request.image.bytes).into_owned();
        *self.calls.lock().unwrap().entry(url.clone()).or_insert(0) += 1;

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        enum Next {
            Respond(std::result::Result<String, CaptionError>),
            Panic,
            Hang,
        }

        let next = match self.behaviors.lock().unwrap().get_mut(&url) {
            Some(Behavior::Script(responses)) => {
                Next::Respond(responses.pop_front().unwrap_or_else(|| Ok(CAPTION_JSON.to_string())))
            }
            Some(Behavior::Panic) => Next::Panic,
            Some(Behavior::Hang) => Next::Hang,
            None => Next::Respond(Ok(CAPTION_JSON.to_string())),
        };

        match next {
            Next::Respond(response) => response,
            Next::Panic => panic!("captioner exploded on {}", url),
            Next::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(CaptionError::Timeout("hung".to_string()))
            }
        }
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
