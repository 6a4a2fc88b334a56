//! Document DTOs: upload admission, status, attempts and audit trail.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::common::FieldValueResponse;
use crate::models::{AuditEntry, Document, ExtractionAttempt, OcrResult};
use crate::pipeline::{Admission, DocumentStatusView};

/// Response body for `POST /v1/documents:upload`.
///
/// ```json
/// { "documentId": "V1StGXR8_Z5jdHi6B-myT", "status": "queued" }
/// ```
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadDocumentResponse {
    pub document_id: String,
    /// `queued` or `rejected`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl From<Admission> for UploadDocumentResponse {
    fn from(admission: Admission) -> Self {
        match admission {
            Admission::Queued { document_id } => Self {
                document_id,
                status: "queued".to_string(),
                rejection_reason: None,
            },
            Admission::Rejected {
                document_id,
                reason,
            } => Self {
                document_id,
                status: "rejected".to_string(),
                rejection_reason: Some(reason),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OcrResultResponse {
    pub id: String,
    pub fields: BTreeMap<String, FieldValueResponse>,
    pub overall_confidence: f64,
    pub engines: Vec<String>,
    pub ensemble_used: bool,
    /// `accepted`, `needs_review` or `rejected`.
    pub disposition: String,
    pub raw_text: String,
    pub created_at: DateTime<Utc>,
}

impl From<OcrResult> for OcrResultResponse {
    fn from(result: OcrResult) -> Self {
        Self {
            id: result.id,
            fields: result
                .fields
                .into_iter()
                .map(|(name, field)| (name, field.into()))
                .collect(),
            overall_confidence: result.overall_confidence,
            engines: result.engines,
            ensemble_used: result.ensemble_used,
            disposition: result.disposition.to_string(),
            raw_text: result.raw_text,
            created_at: result.created_at,
        }
    }
}

/// Response body for `GET /v1/documents/{documentId}`.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_by: Option<String>,
    pub status: String,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_engine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Active result; absent until OCR has completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<OcrResultResponse>,
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            filename: doc.filename,
            mime_type: doc.mime_type,
            size_bytes: doc.size_bytes,
            content_sha256: doc.content_sha256,
            uploaded_by: doc.uploaded_by,
            status: doc.status.to_string(),
            retry_count: doc.retry_count,
            next_retry_at: doc.next_retry_at,
            retry_strategy: doc.retry_strategy.map(|s| s.to_string()),
            preferred_engine: doc.preferred_engine,
            review_reason: doc.review_reason,
            error_message: doc.error_message,
            uploaded_at: doc.uploaded_at,
            updated_at: doc.updated_at,
            result: None,
        }
    }
}

impl From<DocumentStatusView> for DocumentResponse {
    fn from(view: DocumentStatusView) -> Self {
        Self {
            result: view.result.map(Into::into),
            ..DocumentResponse::from(view.document)
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    pub step: String,
    /// Order within the document, starting at 1.
    pub ordinal: i64,
    /// Processing cycle, starting at 1.
    pub cycle: u32,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[schema(value_type = Object)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[schema(value_type = Object)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<ExtractionAttempt> for AttemptResponse {
    fn from(attempt: ExtractionAttempt) -> Self {
        Self {
            id: attempt.id,
            engine: attempt.engine_name,
            step: attempt.step_type.to_string(),
            ordinal: attempt.ordinal,
            cycle: attempt.cycle,
            status: attempt.status.to_string(),
            confidence: attempt.confidence,
            duration_ms: attempt.duration_ms,
            error_message: attempt.error_message,
            input: attempt.input_snapshot,
            output: attempt.output_snapshot,
            started_at: attempt.started_at,
            completed_at: attempt.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntryResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<String>,
    pub action: String,
    pub actor: String,
    #[schema(value_type = Object)]
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<AuditEntry> for AuditEntryResponse {
    fn from(entry: AuditEntry) -> Self {
        Self {
            id: entry.id,
            attempt_id: entry.attempt_id,
            action: entry.action.to_string(),
            actor: entry.actor,
            detail: entry.detail,
            created_at: entry.created_at,
        }
    }
}
