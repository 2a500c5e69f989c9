use super::{ImageSource, mime_from_extension};
use crate::config::ImageSourceConfig;
use crate::error::{Error, FetchError, Result};
use crate::types::ImageData;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;

/// Downloads images over HTTP(S)
pub struct HttpImageSource {
    client: reqwest::Client,
}

impl HttpImageSource {
    /// Create a source with the configured timeout and user agent
    pub fn new(config: &ImageSourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch(&self, url: &str) -> std::result::Result<ImageData, FetchError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| FetchError::Network(format!("invalid URL '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::Network(format!(
                "unsupported scheme '{}' in '{}'",
                parsed.scheme(),
                url
            )));
        }

        let response = self.client.get(parsed.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Network(format!("timeout fetching '{}'", url))
            } else {
                FetchError::Network(format!("failed to fetch '{}': {}", url, e))
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(FetchError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Network(format!(
                "HTTP {} fetching '{}'",
                status.as_u16(),
                url
            )));
        }

        let header_mime = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
            .filter(|v| v.starts_with("image/"));

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(format!("failed to read body of '{}': {}", url, e)))?;

        if bytes.is_empty() {
            return Err(FetchError::Network(format!("empty body from '{}'", url)));
        }

        let mime_type = header_mime
            .or_else(|| mime_from_extension(parsed.path()).map(str::to_string))
            .unwrap_or_else(|| "image/jpeg".to_string());

        tracing::debug!(url = url, bytes = bytes.len(), mime_type = %mime_type, "image fetched");

        Ok(ImageData {
            bytes: bytes.to_vec(),
            mime_type,
        })
    }
}
