//! OCR adapter.
//!
//! An [`OcrProvider`] turns uploaded image bytes into raw text plus, when the
//! provider offers it, structured receipt fields. Providers:
//!
//! - [`TesseractOcr`] - local `tesseract` binary (default)
//! - [`TextractOcr`] - AWS Textract AnalyzeExpense (feature `textract`)
//! - [`StaticOcr`] - fixed output, for tests and offline demos

pub mod tesseract;
pub mod textract;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{OcrConfig, OcrProviderKind};

pub use tesseract::TesseractOcr;
#[cfg(feature = "textract")]
pub use textract::TextractOcr;

// ============================================================================
// IMAGE UPLOAD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    /// Detect the format from magic bytes
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(ImageFormat::Png)
        } else {
            None
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }
}

/// A validated image ready for OCR
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub file_name: Option<String>,
    /// Hex SHA-256 of `bytes`
    pub sha256: String,
}

impl ImageUpload {
    /// Returns `None` when the bytes are not a supported image type.
    pub fn from_bytes(bytes: Vec<u8>, file_name: Option<String>) -> Option<Self> {
        let format = ImageFormat::sniff(&bytes)?;
        let sha256 = format!("{:x}", Sha256::digest(&bytes));

        Some(ImageUpload {
            bytes,
            format,
            file_name,
            sha256,
        })
    }
}

// ============================================================================
// OCR OUTPUT
// ============================================================================

/// One recognized line of text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrLine {
    pub text: String,
    /// 0.0 - 1.0
    pub confidence: f32,
}

/// Line item as reported by the provider (price still unparsed)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrLineItem {
    pub name: String,
    pub price: Option<String>,
}

/// Structured fields some providers detect on their own
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrFields {
    pub vendor: Option<String>,
    pub date: Option<String>,
    pub total: Option<String>,
    #[serde(default)]
    pub items: Vec<OcrLineItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrOutput {
    /// Provider name (stored with the raw OCR record)
    pub provider: String,
    /// Lines joined with '\n'
    pub text: String,
    pub lines: Vec<OcrLine>,
    pub fields: OcrFields,
    /// Provider-specific structured output, kept for audit
    pub payload: serde_json::Value,
}

impl OcrOutput {
    pub fn from_lines(provider: &str, lines: Vec<OcrLine>, fields: OcrFields, payload: serde_json::Value) -> Self {
        let text = lines
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        OcrOutput {
            provider: provider.to_string(),
            text,
            lines,
            fields,
            payload,
        }
    }
}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

#[derive(Debug, Error)]
pub enum OcrError {
    /// Nothing usable survived the confidence filter
    #[error("OCR confidence too low: no text above {min_confidence}")]
    LowConfidence { min_confidence: f32 },

    /// The provider call itself failed
    #[error("OCR provider {provider} failed: {cause:#}")]
    Provider { provider: String, cause: anyhow::Error },
}

impl OcrError {
    pub fn provider(provider: &str, cause: impl Into<anyhow::Error>) -> Self {
        OcrError::Provider {
            provider: provider.to_string(),
            cause: cause.into(),
        }
    }
}

#[async_trait]
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn recognize(&self, image: &ImageUpload) -> Result<OcrOutput, OcrError>;
}

/// Provider that always returns the same output
pub struct StaticOcr {
    output: OcrOutput,
}

impl StaticOcr {
    pub fn new(output: OcrOutput) -> Self {
        StaticOcr { output }
    }

    /// Output built from plain text, one line per '\n', full confidence
    pub fn from_text(text: &str) -> Self {
        let lines = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| OcrLine {
                text: line.to_string(),
                confidence: 1.0,
            })
            .collect();

        StaticOcr::new(OcrOutput::from_lines(
            "static",
            lines,
            OcrFields::default(),
            serde_json::Value::Null,
        ))
    }
}

#[async_trait]
impl OcrProvider for StaticOcr {
    fn name(&self) -> &str {
        "static"
    }

    async fn recognize(&self, _image: &ImageUpload) -> Result<OcrOutput, OcrError> {
        if self.output.text.trim().is_empty() && self.output.fields == OcrFields::default() {
            return Err(OcrError::LowConfidence { min_confidence: 0.0 });
        }
        Ok(self.output.clone())
    }
}

/// Build the provider selected in configuration
pub async fn build_provider(config: &OcrConfig) -> anyhow::Result<Arc<dyn OcrProvider>> {
    match config.provider {
        OcrProviderKind::Tesseract => Ok(Arc::new(TesseractOcr::new(
            &config.tesseract_bin,
            &config.language,
            config.min_confidence,
        ))),
        #[cfg(feature = "textract")]
        OcrProviderKind::Textract => Ok(Arc::new(
            TextractOcr::from_env(config.aws_region.clone(), config.min_confidence).await,
        )),
        #[cfg(not(feature = "textract"))]
        OcrProviderKind::Textract => {
            anyhow::bail!("OCR provider 'textract' requires building with the `textract` feature")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_sniff_supported_formats() {
        assert_eq!(ImageFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::sniff(&PNG_HEADER), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::Jpeg.mime_type(), "image/jpeg");
        assert_eq!(ImageFormat::Png.mime_type(), "image/png");
    }

    #[test]
    fn test_sniff_rejects_other_bytes() {
        assert_eq!(ImageFormat::sniff(b"GIF89a"), None);
        assert_eq!(ImageFormat::sniff(b"%PDF-1.7"), None);
        assert_eq!(ImageFormat::sniff(&[]), None);
    }

    #[test]
    fn test_upload_hashes_bytes() {
        let mut bytes = PNG_HEADER.to_vec();
        bytes.extend_from_slice(b"rest");

        let upload = ImageUpload::from_bytes(bytes, Some("r.png".to_string())).unwrap();
        assert_eq!(upload.format, ImageFormat::Png);
        assert_eq!(upload.sha256.len(), 64);
        assert!(ImageUpload::from_bytes(b"hello".to_vec(), None).is_none());
    }

    #[tokio::test]
    async fn test_static_provider_joins_lines() {
        let ocr = StaticOcr::from_text("LULU\n\n  Total 3.370  \n");
        let upload = ImageUpload::from_bytes(PNG_HEADER.to_vec(), None).unwrap();

        let output = ocr.recognize(&upload).await.unwrap();
        assert_eq!(output.text, "LULU\nTotal 3.370");
        assert_eq!(output.lines.len(), 2);
    }

    #[tokio::test]
    async fn test_static_provider_empty_is_low_confidence() {
        let ocr = StaticOcr::from_text("   ");
        let upload = ImageUpload::from_bytes(PNG_HEADER.to_vec(), None).unwrap();

        let err = ocr.recognize(&upload).await.unwrap_err();
        assert!(matches!(err, OcrError::LowConfidence { .. }));
    }
}
