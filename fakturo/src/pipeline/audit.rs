use std::sync::Arc;

use tracing::warn;

use crate::db::DatabaseBackend;
use crate::error::Result;
use crate::models::AuditEntry;

/// Actor names written to the audit trail.
pub mod actor {
    pub const INGESTION: &str = "ingestion";
    pub const ORCHESTRATOR: &str = "orchestrator";
    pub const INVOKER: &str = "invoker";
    pub const RETRY_SCHEDULER: &str = "retry_scheduler";
    pub const REVIEW_ROUTER: &str = "review_router";
    pub const API: &str = "api";
    pub const RECOVERY: &str = "recovery";
}

/// Append-only trace of pipeline actions per document.
#[derive(Clone)]
pub struct AuditLog {
    db: Arc<dyn DatabaseBackend>,
}

impl AuditLog {
    pub fn new(db: Arc<dyn DatabaseBackend>) -> Self {
        Self { db }
    }

    /// Best effort: a failed write is logged and never fails the caller.
    pub async fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.db.append_audit(&entry).await {
            warn!(
                doc_id = %entry.document_id,
                action = %entry.action,
                error = %e,
                "Failed to append audit entry"
            );
        }
    }

    pub async fn entries(&self, document_id: &str) -> Result<Vec<AuditEntry>> {
        self.db.list_audit(document_id).await
    }
}
