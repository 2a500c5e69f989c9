//! Gemini `generateContent` REST client

use super::Captioner;
use crate::config::GeminiConfig;
use crate::error::{CaptionError, Error, Result};
use crate::types::CaptionRequest;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};

const SAFETY_CATEGORIES: [&str; 5] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_CIVIC_INTEGRITY",
];

const BLOCKING_FINISH_REASONS: [&str; 5] =
    ["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII", "RECITATION"];

/// Captioner backed by the Gemini API
pub struct GeminiCaptioner {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model_id: String,
    max_output_tokens: u32,
}

impl GeminiCaptioner {
    /// Create a client for the configured model
    ///
    /// # Errors
    /// Returns a configuration error when no API key is set.
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| Error::config("api_key", "a Gemini API key is required"))?
            .to_string();

        // Per-attempt deadlines come from the retry policy
        let client = reqwest::Client::builder()
            .user_agent(concat!("gemini-caption/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            config.api_base.trim_end_matches('/'),
            config.model_id
        );

        Ok(Self {
            client,
            endpoint,
            api_key,
            model_id: config.model_id.clone(),
            max_output_tokens: config.max_output_tokens,
        })
    }
}

#[async_trait]
impl Captioner for GeminiCaptioner {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn caption(&self, request: &CaptionRequest<'_>) -> std::result::Result<String, CaptionError> {
        let body = GenerateContentRequest::new(request, self.max_output_tokens);

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &text));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text).map_err(|e| {
            CaptionError::MalformedResponse(format!("unexpected response shape: {}", e))
        })?;

        parsed.into_caption_text()
    }
}

fn transport_error(e: reqwest::Error) -> CaptionError {
    if e.is_timeout() {
        CaptionError::Timeout(e.to_string())
    } else {
        CaptionError::Network(e.to_string())
    }
}

/// Map a non-success HTTP status to a caption error
fn classify_status(status: u16, body: &str) -> CaptionError {
    let detail = format!("HTTP {}: {}", status, error_message(body));

    if is_hard_quota(body) {
        return CaptionError::QuotaExhausted(detail);
    }

    match status {
        429 => CaptionError::RateLimited(detail),
        408 | 504 => CaptionError::Timeout(detail),
        500..=599 => CaptionError::Unavailable(detail),
        401 | 403 => CaptionError::PermissionDenied(detail),
        _ => CaptionError::InvalidRequest(detail),
    }
}

// Per-minute limits clear on their own; daily and billing limits do not.
fn is_hard_quota(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("quota")
        && (lower.contains("billing") || lower.contains("per day") || lower.contains("perday"))
}

fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error: ErrorBody,
    }
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    match serde_json::from_str::<Envelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) => body.chars().take(200).collect(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

impl<'a> GenerateContentRequest<'a> {
    fn new(request: &CaptionRequest<'a>, max_output_tokens: u32) -> Self {
        let parts = vec![
            Part::Text {
                text: request.prompt,
            },
            Part::InlineData {
                inline_data: InlineData {
                    mime_type: request.image.mime_type.clone(),
                    data: general_purpose::STANDARD.encode(&request.image.bytes),
                },
            },
        ];

        Self {
            contents: vec![Content {
                role: "user",
                parts,
            }],
            generation_config: GenerationConfig { max_output_tokens },
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|&category| SafetySetting {
                    category,
                    threshold: "OFF",
                })
                .collect(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn into_caption_text(self) -> std::result::Result<String, CaptionError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(CaptionError::Blocked(reason));
        }

        let Some(candidate) = self.candidates.into_iter().next() else {
            return Err(CaptionError::MalformedResponse(
                "response contained no candidates".to_string(),
            ));
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if !text.trim().is_empty() {
            return Ok(text);
        }

        match candidate.finish_reason {
            Some(reason) if BLOCKING_FINISH_REASONS.contains(&reason.as_str()) => {
                Err(CaptionError::Blocked(reason))
            }
            _ => Err(CaptionError::MalformedResponse(
                "response contained no caption text".to_string(),
            )),
        }
    }
}
