use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DocumentStatus, RetryStrategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub content_sha256: Option<String>,
    pub uploaded_by: Option<String>,
    pub status: DocumentStatus,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub retry_strategy: Option<RetryStrategy>,
    /// Engine the pending retry refers to (the one that last failed).
    pub retry_engine: Option<String>,
    /// Consecutive transient failures of `retry_engine`.
    pub consecutive_failures: u32,
    pub preprocessing_used: bool,
    pub preferred_engine: Option<String>,
    pub review_reason: Option<String>,
    pub review_queued_at: Option<DateTime<Utc>>,
    pub review_completed_at: Option<DateTime<Utc>>,
    pub review_completed_by: Option<String>,
    pub error_message: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(id: String, filename: String, mime_type: String, size_bytes: i64) -> Self {
        let now = Utc::now();
        Self {
            id,
            filename,
            size_bytes,
            mime_type,
            content_sha256: None,
            uploaded_by: None,
            status: DocumentStatus::Uploaded,
            retry_count: 0,
            next_retry_at: None,
            retry_strategy: None,
            retry_engine: None,
            consecutive_failures: 0,
            preprocessing_used: false,
            preferred_engine: None,
            review_reason: None,
            review_queued_at: None,
            review_completed_at: None,
            review_completed_by: None,
            error_message: None,
            uploaded_at: now,
            updated_at: now,
        }
    }

    /// Clear the pending retry plan once a cycle has consumed it.
    pub fn clear_retry_plan(&mut self) {
        self.next_retry_at = None;
        self.retry_strategy = None;
    }
}
