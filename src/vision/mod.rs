//! Vision verification clients.
//!
//! This module provides a trait-based abstraction over the vision backend,
//! with the Groq-hosted vision model as the primary implementation and a
//! deterministic mock as the no-credentials fallback.
//!
//! Clients never retry internally; the workflow owns retry policy.

mod error;
mod groq;
mod mock;

pub use error::{classify_http_status, VisionError, VisionErrorKind};
pub use groq::{GroqVisionClient, DEFAULT_GROQ_MODEL};
pub use mock::MockVisionClient;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Where a judgment came from, so callers can never silently conflate mock
/// verdicts with real ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgmentSource {
    /// The configured vision backend
    Model,
    /// The deterministic fallback used when no backend is configured
    Mock,
}

impl From<JudgmentSource> for crate::task::AttemptSource {
    fn from(source: JudgmentSource) -> Self {
        match source {
            JudgmentSource::Model => crate::task::AttemptSource::Model,
            JudgmentSource::Mock => crate::task::AttemptSource::Mock,
        }
    }
}

/// Structured verdict for one photo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Judgment {
    pub success: bool,
    pub reasoning: String,
    /// Confidence in [0.0, 1.0]
    pub confidence: f64,
    pub source: JudgmentSource,
}

/// A client that judges a photo against free-text instructions.
#[async_trait]
pub trait VerificationClient: Send + Sync {
    /// Judge one image against the given instructions.
    ///
    /// # Errors
    /// Returns `VisionError` when the backend is unreachable, rate limited,
    /// or returns a malformed response. Content-based rejections are NOT
    /// errors; they come back as `Judgment { success: false, .. }`.
    async fn verify(&self, image: &[u8], instructions: &str) -> Result<Judgment, VisionError>;

    /// Whether this client produces mock verdicts.
    fn is_mock(&self) -> bool {
        false
    }
}

/// Image formats the verification pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
    Gif,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Gif => "image/gif",
        }
    }
}

/// Sniff the image format from magic bytes.
pub fn detect_image_format(image: &[u8]) -> Option<ImageFormat> {
    match image {
        [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),
        [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(ImageFormat::Png),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(ImageFormat::Webp),
        [b'G', b'I', b'F', b'8', ..] => Some(ImageFormat::Gif),
        _ => None,
    }
}

/// Validate the inputs every client shares.
///
/// # Errors
/// Returns `VisionError::InvalidInput` for an empty or unrecognized image
/// payload or empty instructions.
pub(crate) fn check_inputs(image: &[u8], instructions: &str) -> Result<ImageFormat, VisionError> {
    if image.is_empty() {
        return Err(VisionError::InvalidInput("image payload is empty".into()));
    }
    if instructions.trim().is_empty() {
        return Err(VisionError::InvalidInput(
            "verification instructions are empty".into(),
        ));
    }
    detect_image_format(image).ok_or_else(|| {
        VisionError::InvalidInput("unsupported image format (expected JPEG, PNG, WebP or GIF)".into())
    })
}

/// Pick the verification client for this deployment.
///
/// With `GROQ_API_KEY` set, verdicts come from the real backend; without it
/// the deterministic mock is used and loudly flagged at startup.
pub fn client_from_config(config: &Config) -> Arc<dyn VerificationClient> {
    match &config.groq_api_key {
        Some(key) => Arc::new(GroqVisionClient::new(key.clone(), config.groq_model.clone())),
        None => {
            tracing::warn!(
                "GROQ_API_KEY not configured; verification verdicts will be mocked and flagged as such"
            );
            Arc::new(MockVisionClient::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00];

    #[test]
    fn detects_common_formats() {
        assert_eq!(detect_image_format(JPEG), Some(ImageFormat::Jpeg));
        assert_eq!(detect_image_format(PNG), Some(ImageFormat::Png));
        assert_eq!(
            detect_image_format(b"RIFF\x00\x00\x00\x00WEBPVP8 "),
            Some(ImageFormat::Webp)
        );
        assert_eq!(detect_image_format(b"GIF89a"), Some(ImageFormat::Gif));
        assert_eq!(detect_image_format(b"plain text"), None);
        assert_eq!(detect_image_format(&[]), None);
    }

    #[test]
    fn input_checks_reject_bad_payloads() {
        assert!(matches!(
            check_inputs(&[], "show the bed"),
            Err(VisionError::InvalidInput(_))
        ));
        assert!(matches!(
            check_inputs(JPEG, "   "),
            Err(VisionError::InvalidInput(_))
        ));
        assert!(matches!(
            check_inputs(b"not an image", "show the bed"),
            Err(VisionError::InvalidInput(_))
        ));
        assert_eq!(check_inputs(JPEG, "show the bed").unwrap(), ImageFormat::Jpeg);
    }
}
