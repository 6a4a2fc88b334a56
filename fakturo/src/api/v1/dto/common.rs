//! Shared DTO types used across several v1 endpoints.

use serde::{Deserialize, Serialize};

use crate::models::FieldValue;

pub const DEFAULT_LIST_LIMIT: u32 = 50;
pub const MAX_LIST_LIMIT: u32 = 500;

/// Query parameters for list endpoints.
#[derive(Debug, Clone, Default, Deserialize, utoipa::ToSchema, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct LimitQuery {
    /// Maximum number of items (default 50, max 500).
    pub limit: Option<u32>,
}

impl LimitQuery {
    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }
}

/// One extracted invoice field.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FieldValueResponse {
    pub value: String,
    /// In `[0, 1]`.
    pub confidence: f64,
    /// Engine whose reading was kept, when merged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
}

impl From<FieldValue> for FieldValueResponse {
    fn from(field: FieldValue) -> Self {
        Self {
            value: field.value,
            confidence: field.confidence,
            engine: field.engine,
        }
    }
}
