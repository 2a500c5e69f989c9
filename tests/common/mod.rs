//! Common test utilities for gemini-caption integration tests

use base64::Engine;
use gemini_caption::db::NewPost;
use gemini_caption::types::PostMetadata;
use gemini_caption::{Config, Database, PostId};
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const MODEL_ID: &str = "test-model";
pub const GENERATE_PATH: &str = "/v1beta/models/test-model:generateContent";
pub const CAPTION_TEXT: &str = "```json\n{\"short_summary\": \"a girl under cherry blossoms\", \"regular_summary\": \"...\",}\n```";

/// Image body served for `id`
pub fn image_bytes(id: u64) -> Vec<u8> {
    format!("image-bytes-{}", id).into_bytes()
}

/// Base64 of `image_bytes(id)`, as it appears in a Gemini request body
pub fn encoded_image(id: u64) -> String {
    base64::engine::general_purpose::STANDARD.encode(image_bytes(id))
}

/// Fresh database in a temp dir
pub async fn create_db() -> (Database, TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let db = Database::new(&dir.path().join("captions.db"))
        .await
        .expect("database");
    (db, dir)
}

/// Insert posts pointing at `images`; `(id, false)` leaves the post without a URL
pub async fn seed_posts(db: &Database, images: &MockServer, posts: &[(u64, bool)]) {
    let rows: Vec<NewPost> = posts
        .iter()
        .map(|&(id, has_url)| NewPost {
            id: PostId(id),
            source_url: has_url.then(|| format!("{}/img/{}.png", images.uri(), id)),
            metadata: PostMetadata {
                artists: vec!["some_artist".to_string()],
                characters: vec![],
                tags: vec!["1girl".to_string(), "cherry_blossoms".to_string()],
                rating: Some("g".to_string()),
            },
        })
        .collect();
    db.upsert_posts(&rows).await.expect("seed posts");
}

/// Serve `image_bytes(id)` for each id; anything else is a 404
pub async fn mount_images(server: &MockServer, ids: &[u64]) {
    for &id in ids {
        Mock::given(method("GET"))
            .and(path(format!("/img/{}.png", id)))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "image/png")
                    .set_body_bytes(image_bytes(id)),
            )
            .mount(server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path_regex(r"^/img/.*"))
        .respond_with(ResponseTemplate::new(404))
        .with_priority(10)
        .mount(server)
        .await;
}

/// Gemini success response carrying `text`
pub fn gemini_text(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": {"parts": [{"text": text}], "role": "model"},
            "finishReason": "STOP"
        }]
    })
}

/// Answer every generateContent call with a caption
pub async fn mount_caption_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_text(CAPTION_TEXT)))
        .with_priority(10)
        .mount(server)
        .await;
}

/// Answer calls carrying the image of `id` with `status`
pub async fn mount_caption_status_for(server: &MockServer, id: u64, status: u16, times: Option<u64>) {
    let mock = Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(body_string_contains(encoded_image(id)))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({
            "error": {"code": status, "message": format!("status {}", status)}
        })))
        .with_priority(1);
    let mock = match times {
        Some(n) => mock.up_to_n_times(n),
        None => mock,
    };
    mock.mount(server).await;
}

/// Config pointing at the mock Gemini server with millisecond retries
pub fn test_config(gemini: &MockServer, max_concurrency: usize) -> Config {
    let mut config = Config::default();
    config.batch.max_concurrency = max_concurrency;
    config.batch.shutdown_grace_period = Duration::from_secs(1);
    config.gemini.api_base = gemini.uri();
    config.gemini.api_key = Some("test-key".to_string());
    config.gemini.model_id = MODEL_ID.to_string();
    config.retry.initial_delay = Duration::from_millis(5);
    config.retry.max_delay = Duration::from_millis(20);
    config.retry.jitter = false;
    config.retry.attempt_timeout = Duration::from_secs(5);
    config.images.request_timeout = Duration::from_secs(5);
    config
}
