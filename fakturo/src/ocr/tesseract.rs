use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use leptess::LepTess;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::OcrConfig;
use crate::models::EngineType;

use super::engine::{EngineError, EngineOutput, ExtractionRequest, OcrEngine};
use super::fields::InvoiceFieldParser;

/// Confidence assigned to text read from a PDF's embedded text layer.
const TEXT_LAYER_CONFIDENCE: f64 = 0.97;
/// Overall confidence ceiling for output with text but no recognised fields.
const TEXT_ONLY_CONFIDENCE: f64 = 0.2;

enum Backend {
    Ready(Arc<Mutex<LepTess>>),
    Unavailable(String),
}

/// Local Tesseract engine via leptess.
///
/// PDFs with an embedded text layer are read directly; scanned images go
/// through Tesseract. Both feed the shared invoice field parser.
pub struct TesseractEngine {
    name: String,
    languages: String,
    backend: Backend,
    parser: Arc<InvoiceFieldParser>,
}

impl TesseractEngine {
    pub const DEFAULT_NAME: &'static str = "tesseract";

    pub fn new(config: &OcrConfig, parser: Arc<InvoiceFieldParser>) -> Self {
        let backend = match LepTess::new(None, &config.languages) {
            Ok(lt) => {
                info!(languages = %config.languages, "Tesseract OCR initialized");
                Backend::Ready(Arc::new(Mutex::new(lt)))
            }
            Err(e) => {
                let reason = format!("Tesseract not available: {e}");
                warn!("{}", reason);
                Backend::Unavailable(reason)
            }
        };

        Self {
            name: Self::DEFAULT_NAME.to_string(),
            languages: config.languages.clone(),
            backend,
            parser,
        }
    }

    /// False when leptess failed to load; image requests then fail as
    /// unavailable while PDF text layers are still read.
    pub fn can_recognize_images(&self) -> bool {
        matches!(self.backend, Backend::Ready(_))
    }

    fn output_from_text(&self, text: String, recognition: f64, started: Instant) -> EngineOutput {
        let fields = self.parser.parse_scaled(&text, recognition);
        let overall_confidence = if fields.is_empty() {
            if text.trim().is_empty() {
                0.0
            } else {
                recognition * TEXT_ONLY_CONFIDENCE
            }
        } else {
            fields.values().map(|f| f.confidence).sum::<f64>() / fields.len() as f64
        };

        EngineOutput {
            text,
            fields,
            overall_confidence,
            duration_ms: started.elapsed().as_millis() as i64,
        }
    }

    async fn read_text_layer(&self, bytes: Arc<[u8]>) -> Result<String, EngineError> {
        tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| EngineError::Failed(format!("PDF extraction task panicked: {e}")))?
            .map_err(|e| EngineError::Failed(format!("PDF extraction failed: {e}")))
    }

    async fn recognize(
        &self,
        tesseract: &Arc<Mutex<LepTess>>,
        bytes: Arc<[u8]>,
    ) -> Result<(String, f64), EngineError> {
        let tesseract = Arc::clone(tesseract);

        tokio::task::spawn_blocking(move || {
            let mut lt = tesseract.blocking_lock();
            lt.set_image_from_mem(&bytes)
                .map_err(|e| EngineError::Failed(format!("Failed to set image: {e}")))?;
            let text = lt
                .get_utf8_text()
                .map_err(|e| EngineError::Failed(format!("Failed to extract text: {e}")))?;
            let confidence = (lt.mean_text_conf().max(0) as f64 / 100.0).min(1.0);
            Ok((text.trim().to_string(), confidence))
        })
        .await
        .map_err(|e| EngineError::Failed(format!("OCR task panicked: {e}")))?
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn engine_type(&self) -> EngineType {
        EngineType::Tesseract
    }

    fn version(&self) -> &str {
        "5"
    }

    /// The PDF text layer needs no Tesseract, so this engine always takes
    /// requests. Images without a backend are refused in `extract`.
    fn is_available(&self) -> bool {
        true
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<EngineOutput, EngineError> {
        let started = Instant::now();

        if request.is_pdf() {
            let text = self.read_text_layer(Arc::clone(&request.image)).await?;
            if !text.trim().is_empty() {
                debug!(chars = text.len(), "Using embedded PDF text layer");
                return Ok(self.output_from_text(text, TEXT_LAYER_CONFIDENCE, started));
            }
            // Image-only PDFs need a rasteriser leptonica cannot provide.
            return Ok(self.output_from_text(String::new(), 0.0, started));
        }

        let tesseract = match &self.backend {
            Backend::Ready(tesseract) => tesseract,
            Backend::Unavailable(reason) => return Err(EngineError::Unavailable(reason.clone())),
        };

        if !self
            .languages
            .split('+')
            .any(|lang| request.language.split('+').any(|wanted| wanted == lang))
        {
            debug!(
                requested = %request.language,
                loaded = %self.languages,
                "Requested language not loaded; using loaded models"
            );
        }

        let (text, confidence) = self.recognize(tesseract, Arc::clone(&request.image)).await?;
        Ok(self.output_from_text(text, confidence, started))
    }
}
