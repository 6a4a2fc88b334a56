use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EngineType, Metadata};

/// Catalog entry for an installed OCR engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engine {
    pub name: String,
    pub engine_type: EngineType,
    pub version: String,
    pub is_active: bool,
    /// Lower is tried first.
    pub priority: i64,
    pub config: Metadata,
    pub stats: EngineStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Rolling statistics maintained after every invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineStats {
    pub documents_processed: i64,
    pub successes: i64,
    pub avg_duration_ms: f64,
    pub avg_confidence: f64,
    pub success_rate: f64,
    pub reviews_count: i64,
    pub avg_review_accuracy: Option<f64>,
}

/// Catalog values used when an engine implementation is first registered.
#[derive(Debug, Clone)]
pub struct EngineDefaults {
    pub version: String,
    pub priority: i64,
    pub is_active: bool,
    pub config: Metadata,
}

impl EngineDefaults {
    pub fn with_priority(priority: i64) -> Self {
        Self {
            version: "1".to_string(),
            priority,
            is_active: true,
            config: Metadata::new(),
        }
    }
}
