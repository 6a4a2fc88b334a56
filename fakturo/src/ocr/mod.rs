//! OCR engines.
//!
//! Every engine family implements [`OcrEngine`], a uniform extraction contract
//! returning text, a field map with per-field confidence, an overall
//! confidence and the elapsed time. Unavailability is reported separately
//! from a run that produced nothing.
//!
//! - [`TesseractEngine`] runs Tesseract locally via leptess and reads PDF text
//!   layers directly.
//! - [`VisionApiEngine`] calls an OpenAI-compatible vision model.
//! - [`CompositeEngine`] runs several engines at once and merges their fields.
//!
//! Plain-text engines share [`InvoiceFieldParser`] to turn text into fields.

mod composite;
mod engine;
pub mod fields;
mod preprocessing;
mod tesseract;
mod vision;

pub use composite::CompositeEngine;
pub use engine::{EngineError, EngineOutput, ExtractionRequest, OcrEngine};
pub use fields::InvoiceFieldParser;
pub use preprocessing::{preprocess_image, PreprocessOptions};
pub use tesseract::TesseractEngine;
pub use vision::VisionApiEngine;
