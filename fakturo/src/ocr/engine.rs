use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{EngineType, FieldMap};

/// Input handed to an engine for a single extraction.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub image: Arc<[u8]>,
    pub mime_type: String,
    /// Tesseract-style language code(s), e.g. `pol+eng`.
    pub language: String,
    /// Upper bound the caller will wait. Engines with their own network
    /// timeouts should not exceed it.
    pub timeout: Duration,
}

impl ExtractionRequest {
    pub fn new(
        image: impl Into<Arc<[u8]>>,
        mime_type: impl Into<String>,
        language: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            image: image.into(),
            mime_type: mime_type.into(),
            language: language.into(),
            timeout,
        }
    }

    pub fn is_pdf(&self) -> bool {
        self.mime_type == "application/pdf"
    }
}

/// Uniform extraction result shared by every engine family.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineOutput {
    pub text: String,
    pub fields: FieldMap,
    pub overall_confidence: f64,
    pub duration_ms: i64,
}

impl EngineOutput {
    /// Processed but produced nothing usable.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.fields.is_empty()
    }
}

/// Failure modes an engine can report. Unavailability is distinct from a
/// run that completed with empty output.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("engine timed out after {0:?}")]
    Timeout(Duration),

    #[error("engine failed: {0}")]
    Failed(String),
}

/// A black-box OCR engine.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Catalog name; must be unique within a registry.
    fn name(&self) -> &str;

    fn engine_type(&self) -> EngineType;

    fn version(&self) -> &str {
        "1"
    }

    /// Cheap readiness check. Engines that cannot serve any request return
    /// false and are reported as unavailable without being called.
    fn is_available(&self) -> bool {
        true
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<EngineOutput, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldValue;

    #[test]
    fn test_whitespace_only_output_is_empty() {
        let output = EngineOutput {
            text: "  \n ".to_string(),
            ..Default::default()
        };
        assert!(output.is_empty());
    }

    #[test]
    fn test_fields_without_text_are_not_empty() {
        let mut output = EngineOutput::default();
        output
            .fields
            .insert("gross_total".to_string(), FieldValue::new("10.00", 0.7));
        assert!(!output.is_empty());
    }

    #[test]
    fn test_request_detects_pdf() {
        let request = ExtractionRequest::new(
            vec![1u8, 2, 3],
            "application/pdf",
            "eng",
            Duration::from_secs(1),
        );
        assert!(request.is_pdf());
        assert_eq!(request.image.len(), 3);
    }
}
