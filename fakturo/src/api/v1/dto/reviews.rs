//! Manual review DTOs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Document, ReviewFeedback, ReviewSubmission};

/// Request body for `POST /v1/reviews/{documentId}/complete`.
///
/// ```json
/// {
///   "reviewer": "anna",
///   "corrections": { "gross_total": "1230.00" },
///   "accuracyRating": 0.8
/// }
/// ```
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompleteReviewRequest {
    pub reviewer: String,
    /// Corrected values keyed by field name.
    #[serde(default)]
    pub corrections: BTreeMap<String, String>,
    /// Share of fields the engine got right, in `[0, 1]`.
    pub accuracy_rating: Option<f64>,
    pub notes: Option<String>,
    pub time_spent_secs: Option<i64>,
}

impl From<CompleteReviewRequest> for ReviewSubmission {
    fn from(req: CompleteReviewRequest) -> Self {
        Self {
            reviewer: req.reviewer,
            corrections: req.corrections,
            accuracy_rating: req.accuracy_rating,
            notes: req.notes,
            time_spent_secs: req.time_spent_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReviewFeedbackResponse {
    pub id: String,
    pub document_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
    pub reviewer: String,
    pub corrections: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy_rating: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl From<ReviewFeedback> for ReviewFeedbackResponse {
    fn from(feedback: ReviewFeedback) -> Self {
        Self {
            id: feedback.id,
            document_id: feedback.document_id,
            result_id: feedback.result_id,
            reviewer: feedback.reviewer,
            corrections: feedback.corrections,
            accuracy_rating: feedback.accuracy_rating,
            created_at: feedback.created_at,
        }
    }
}

/// Entry in the manual review queue, oldest first.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQueueItem {
    pub document_id: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
}

impl From<Document> for ReviewQueueItem {
    fn from(doc: Document) -> Self {
        Self {
            document_id: doc.id,
            filename: doc.filename,
            reason: doc.review_reason,
            queued_at: doc.review_queued_at,
            retry_count: doc.retry_count,
        }
    }
}
