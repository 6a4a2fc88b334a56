use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use nanoid::nanoid;
use serde::{Deserialize, Serialize};

use super::Disposition;

/// An extracted field value with its confidence in `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldValue {
    pub value: String,
    pub confidence: f64,
    /// Engine that produced the value, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
}

impl FieldValue {
    pub fn new(value: impl Into<String>, confidence: f64) -> Self {
        Self {
            value: value.into(),
            confidence: clamp_confidence(confidence),
            engine: None,
        }
    }

    pub fn from_engine(mut self, engine: &str) -> Self {
        self.engine = Some(engine.to_string());
        self
    }
}

pub type FieldMap = BTreeMap<String, FieldValue>;

/// Clamp to `[0, 1]`, mapping NaN to zero.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Outcome of one successful processing cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResult {
    pub id: String,
    pub document_id: String,
    pub raw_text: String,
    pub fields: FieldMap,
    pub overall_confidence: f64,
    pub engines: Vec<String>,
    pub ensemble_used: bool,
    pub disposition: Disposition,
    pub superseded: bool,
    pub created_at: DateTime<Utc>,
}

impl OcrResult {
    pub fn new(
        document_id: &str,
        raw_text: String,
        fields: FieldMap,
        overall_confidence: f64,
        engines: Vec<String>,
        ensemble_used: bool,
    ) -> Self {
        Self {
            id: nanoid!(),
            document_id: document_id.to_string(),
            raw_text,
            fields,
            overall_confidence: clamp_confidence(overall_confidence),
            engines,
            ensemble_used,
            disposition: Disposition::NeedsReview,
            superseded: false,
            created_at: Utc::now(),
        }
    }
}
