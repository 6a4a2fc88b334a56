use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::Engine;

/// Catalog entry with rolling statistics, for `GET /v1/engines`.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EngineResponse {
    pub name: String,
    /// `tesseract`, `neural_net` or `composite`.
    pub engine_type: String,
    pub version: String,
    pub is_active: bool,
    pub priority: i64,
    pub documents_processed: i64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub avg_confidence: f64,
    pub reviews_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_review_accuracy: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl From<Engine> for EngineResponse {
    fn from(engine: Engine) -> Self {
        Self {
            name: engine.name,
            engine_type: engine.engine_type.to_string(),
            version: engine.version,
            is_active: engine.is_active,
            priority: engine.priority,
            documents_processed: engine.stats.documents_processed,
            success_rate: engine.stats.success_rate,
            avg_duration_ms: engine.stats.avg_duration_ms,
            avg_confidence: engine.stats.avg_confidence,
            reviews_count: engine.stats.reviews_count,
            avg_review_accuracy: engine.stats.avg_review_accuracy,
            updated_at: engine.updated_at,
        }
    }
}
