//! Image acquisition seam

use crate::error::FetchError;
use crate::types::ImageData;
use async_trait::async_trait;

mod http;

pub use http::HttpImageSource;

/// Source of image bytes for a resolved URL
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Download the image at `url`
    async fn fetch(&self, url: &str) -> Result<ImageData, FetchError>;
}

/// MIME type implied by a URL's file extension
pub fn mime_from_extension(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

/// File extension for an image MIME type; unknown types fall back to `jpg`
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "jpg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_lookup_ignores_query_and_case() {
        assert_eq!(mime_from_extension("https://cdn/x/abc.PNG"), Some("image/png"));
        assert_eq!(mime_from_extension("https://cdn/x/abc.jpeg?w=100"), Some("image/jpeg"));
        assert_eq!(mime_from_extension("https://cdn/x/abc.webp#frag"), Some("image/webp"));
        assert_eq!(mime_from_extension("https://cdn/x/abc.mp4"), None);
        assert_eq!(mime_from_extension("https://cdn/x/abc"), None);
    }

    #[test]
    fn mime_maps_back_to_extension() {
        assert_eq!(extension_for_mime("image/png"), "png");
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("image/webp"), "webp");
        assert_eq!(extension_for_mime("application/octet-stream"), "jpg");
    }
}
