use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    AuditEntry, Disposition, Document, DocumentStatus, Engine, EngineDefaults, EngineType,
    ExtractionAttempt, OcrResult, ReviewFeedback,
};

// ---------------------------------------------------------------------------
// Individual store traits
// ---------------------------------------------------------------------------

/// Durable document lifecycle. Every status change is conditional on the
/// status the caller observed, so concurrent writers cannot clobber each other.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_document(&self, doc: &Document, content: Option<&[u8]>) -> Result<()>;
    async fn get_document(&self, id: &str) -> Result<Option<Document>>;
    async fn get_document_content(&self, id: &str) -> Result<Option<Vec<u8>>>;

    /// Atomic `Queued -> Processing`. False when somebody else owns it.
    async fn claim_document(&self, id: &str) -> Result<bool>;

    async fn transition_status(
        &self,
        id: &str,
        from: DocumentStatus,
        to: DocumentStatus,
        error: Option<&str>,
    ) -> Result<bool>;

    async fn save_document(&self, doc: &Document, expected: DocumentStatus) -> Result<bool>;
    async fn cancel_document(&self, id: &str) -> Result<bool>;
    async fn list_by_status(&self, status: DocumentStatus, limit: u32) -> Result<Vec<Document>>;
    async fn list_due_retries(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Document>>;
    async fn list_stale_queued(&self, before: DateTime<Utc>, limit: u32)
        -> Result<Vec<Document>>;
    /// Documents left in `uploaded`, `ocr_completed` or
    /// `integration_processing` since before `before`.
    async fn list_stranded(&self, before: DateTime<Utc>, limit: u32) -> Result<Vec<Document>>;
    async fn touch_queued(&self, id: &str) -> Result<()>;

    /// Return documents left in `Processing` by a crashed process to the queue.
    async fn recover_interrupted(&self) -> Result<Vec<String>>;

    async fn count_by_status(&self) -> Result<Vec<(DocumentStatus, i64)>>;
}

/// Engine catalog and rolling statistics.
#[async_trait]
pub trait EngineStore: Send + Sync {
    async fn upsert_engine_if_absent(
        &self,
        name: &str,
        engine_type: EngineType,
        defaults: &EngineDefaults,
    ) -> Result<bool>;
    async fn get_engine(&self, name: &str) -> Result<Option<Engine>>;
    async fn list_engines(&self) -> Result<Vec<Engine>>;
    async fn list_active_engines(&self) -> Result<Vec<Engine>>;
    async fn set_engine_active(&self, name: &str, active: bool) -> Result<bool>;
    async fn set_engine_priority(&self, name: &str, priority: i64) -> Result<bool>;
    async fn record_engine_outcome(
        &self,
        name: &str,
        success: bool,
        duration_ms: i64,
        confidence: Option<f64>,
        smoothing: f64,
    ) -> Result<()>;
    async fn record_engine_feedback(
        &self,
        name: &str,
        accuracy: Option<f64>,
        smoothing: f64,
    ) -> Result<()>;
}

/// Append-only extraction attempts.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// False when the document already has an attempt in flight.
    async fn open_attempt(&self, attempt: &mut ExtractionAttempt) -> Result<bool>;
    async fn complete_attempt(&self, attempt: &ExtractionAttempt) -> Result<bool>;
    async fn record_attempt(&self, attempt: &mut ExtractionAttempt) -> Result<()>;
    async fn list_attempts(&self, document_id: &str) -> Result<Vec<ExtractionAttempt>>;
    async fn count_attempts(&self, document_id: &str) -> Result<i64>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save_result(&self, result: &OcrResult) -> Result<()>;
    async fn active_result(&self, document_id: &str) -> Result<Option<OcrResult>>;
    async fn supersede_results(&self, document_id: &str) -> Result<u64>;
    async fn update_disposition(&self, result_id: &str, disposition: Disposition) -> Result<()>;
}

#[async_trait]
pub trait ReviewStore: Send + Sync {
    async fn create_feedback(&self, feedback: &ReviewFeedback) -> Result<()>;
    /// Atomically close a review; false when the document is not awaiting one.
    async fn complete_review(&self, feedback: &ReviewFeedback) -> Result<bool>;
    async fn list_feedback(&self, document_id: &str) -> Result<Vec<ReviewFeedback>>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_audit(&self, entry: &AuditEntry) -> Result<()>;
    async fn list_audit(&self, document_id: &str) -> Result<Vec<AuditEntry>>;
}

// ---------------------------------------------------------------------------
// Unified backend supertrait
// ---------------------------------------------------------------------------

/// A complete database backend that combines all store traits plus lifecycle
/// operations.
#[async_trait]
pub trait DatabaseBackend:
    DocumentStore + EngineStore + AttemptStore + ResultStore + ReviewStore + AuditStore
{
    /// Sync with remote (e.g. Turso replication). No-op for local-only backends.
    async fn sync(&self) -> Result<()>;
}
