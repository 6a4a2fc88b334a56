use crate::db::connection::Database;
use crate::db::repository::{
    AttemptRepository, AuditRepository, DocumentRepository, EngineRepository, ResultRepository,
    ReviewRepository,
};
use crate::db::traits::{
    AttemptStore, AuditStore, DatabaseBackend, DocumentStore, EngineStore, ResultStore,
    ReviewStore,
};
use crate::error::Result;
use crate::models::{
    AuditEntry, Disposition, Document, DocumentStatus, Engine, EngineDefaults, EngineType,
    ExtractionAttempt, OcrResult, ReviewFeedback,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub struct LibSqlBackend {
    db: Database,
}

impl LibSqlBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DocumentStore for LibSqlBackend {
    async fn create_document(&self, doc: &Document, content: Option<&[u8]>) -> Result<()> {
        let conn = self.db.connect()?;
        DocumentRepository::create(&conn, doc, content).await
    }
    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let conn = self.db.connect()?;
        DocumentRepository::get_by_id(&conn, id).await
    }
    async fn get_document_content(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.db.connect()?;
        DocumentRepository::get_content(&conn, id).await
    }
    async fn claim_document(&self, id: &str) -> Result<bool> {
        let conn = self.db.connect()?;
        DocumentRepository::claim(&conn, id).await
    }
    async fn transition_status(
        &self,
        id: &str,
        from: DocumentStatus,
        to: DocumentStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let conn = self.db.connect()?;
        DocumentRepository::transition(&conn, id, from, to, error).await
    }
    async fn save_document(&self, doc: &Document, expected: DocumentStatus) -> Result<bool> {
        let conn = self.db.connect()?;
        DocumentRepository::save(&conn, doc, expected).await
    }
    async fn cancel_document(&self, id: &str) -> Result<bool> {
        let conn = self.db.connect()?;
        DocumentRepository::cancel(&conn, id).await
    }
    async fn list_by_status(&self, status: DocumentStatus, limit: u32) -> Result<Vec<Document>> {
        let conn = self.db.connect()?;
        DocumentRepository::list_by_status(&conn, status, limit).await
    }
    async fn list_due_retries(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Document>> {
        let conn = self.db.connect()?;
        DocumentRepository::list_due_retries(&conn, now, limit).await
    }
    async fn list_stale_queued(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Document>> {
        let conn = self.db.connect()?;
        DocumentRepository::list_stale_queued(&conn, before, limit).await
    }
    async fn list_stranded(&self, before: DateTime<Utc>, limit: u32) -> Result<Vec<Document>> {
        let conn = self.db.connect()?;
        DocumentRepository::list_stranded(&conn, before, limit).await
    }
    async fn touch_queued(&self, id: &str) -> Result<()> {
        let conn = self.db.connect()?;
        DocumentRepository::touch_queued(&conn, id).await
    }
    async fn recover_interrupted(&self) -> Result<Vec<String>> {
        let conn = self.db.connect()?;
        DocumentRepository::recover_interrupted(&conn).await
    }
    async fn count_by_status(&self) -> Result<Vec<(DocumentStatus, i64)>> {
        let conn = self.db.connect()?;
        DocumentRepository::count_by_status(&conn).await
    }
}

#[async_trait]
impl EngineStore for LibSqlBackend {
    async fn upsert_engine_if_absent(
        &self,
        name: &str,
        engine_type: EngineType,
        defaults: &EngineDefaults,
    ) -> Result<bool> {
        let conn = self.db.connect()?;
        EngineRepository::upsert_if_absent(&conn, name, engine_type, defaults).await
    }
    async fn get_engine(&self, name: &str) -> Result<Option<Engine>> {
        let conn = self.db.connect()?;
        EngineRepository::get(&conn, name).await
    }
    async fn list_engines(&self) -> Result<Vec<Engine>> {
        let conn = self.db.connect()?;
        EngineRepository::list(&conn).await
    }
    async fn list_active_engines(&self) -> Result<Vec<Engine>> {
        let conn = self.db.connect()?;
        EngineRepository::list_active(&conn).await
    }
    async fn set_engine_active(&self, name: &str, active: bool) -> Result<bool> {
        let conn = self.db.connect()?;
        EngineRepository::set_active(&conn, name, active).await
    }
    async fn set_engine_priority(&self, name: &str, priority: i64) -> Result<bool> {
        let conn = self.db.connect()?;
        EngineRepository::set_priority(&conn, name, priority).await
    }
    async fn record_engine_outcome(
        &self,
        name: &str,
        success: bool,
        duration_ms: i64,
        confidence: Option<f64>,
        smoothing: f64,
    ) -> Result<()> {
        let conn = self.db.connect()?;
        EngineRepository::record_outcome(&conn, name, success, duration_ms, confidence, smoothing)
            .await
    }
    async fn record_engine_feedback(
        &self,
        name: &str,
        accuracy: Option<f64>,
        smoothing: f64,
    ) -> Result<()> {
        let conn = self.db.connect()?;
        EngineRepository::record_feedback(&conn, name, accuracy, smoothing).await
    }
}

#[async_trait]
impl AttemptStore for LibSqlBackend {
    async fn open_attempt(&self, attempt: &mut ExtractionAttempt) -> Result<bool> {
        let conn = self.db.connect()?;
        AttemptRepository::open(&conn, attempt).await
    }
    async fn complete_attempt(&self, attempt: &ExtractionAttempt) -> Result<bool> {
        let conn = self.db.connect()?;
        AttemptRepository::complete(&conn, attempt).await
    }
    async fn record_attempt(&self, attempt: &mut ExtractionAttempt) -> Result<()> {
        let conn = self.db.connect()?;
        AttemptRepository::record(&conn, attempt).await
    }
    async fn list_attempts(&self, document_id: &str) -> Result<Vec<ExtractionAttempt>> {
        let conn = self.db.connect()?;
        AttemptRepository::list_for_document(&conn, document_id).await
    }
    async fn count_attempts(&self, document_id: &str) -> Result<i64> {
        let conn = self.db.connect()?;
        AttemptRepository::count_for_document(&conn, document_id).await
    }
}

#[async_trait]
impl ResultStore for LibSqlBackend {
    async fn save_result(&self, result: &OcrResult) -> Result<()> {
        let conn = self.db.connect()?;
        ResultRepository::save(&conn, result).await
    }
    async fn active_result(&self, document_id: &str) -> Result<Option<OcrResult>> {
        let conn = self.db.connect()?;
        ResultRepository::get_active(&conn, document_id).await
    }
    async fn supersede_results(&self, document_id: &str) -> Result<u64> {
        let conn = self.db.connect()?;
        ResultRepository::supersede(&conn, document_id).await
    }
    async fn update_disposition(&self, result_id: &str, disposition: Disposition) -> Result<()> {
        let conn = self.db.connect()?;
        ResultRepository::update_disposition(&conn, result_id, disposition).await
    }
}

#[async_trait]
impl ReviewStore for LibSqlBackend {
    async fn create_feedback(&self, feedback: &ReviewFeedback) -> Result<()> {
        let conn = self.db.connect()?;
        ReviewRepository::create(&conn, feedback).await
    }
    async fn complete_review(&self, feedback: &ReviewFeedback) -> Result<bool> {
        let conn = self.db.connect()?;
        ReviewRepository::complete(&conn, feedback).await
    }
    async fn list_feedback(&self, document_id: &str) -> Result<Vec<ReviewFeedback>> {
        let conn = self.db.connect()?;
        ReviewRepository::list_for_document(&conn, document_id).await
    }
}

#[async_trait]
impl AuditStore for LibSqlBackend {
    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let conn = self.db.connect()?;
        AuditRepository::append(&conn, entry).await
    }
    async fn list_audit(&self, document_id: &str) -> Result<Vec<AuditEntry>> {
        let conn = self.db.connect()?;
        AuditRepository::list_for_document(&conn, document_id).await
    }
}

#[async_trait]
impl DatabaseBackend for LibSqlBackend {
    async fn sync(&self) -> Result<()> {
        self.db.sync().await
    }
}
