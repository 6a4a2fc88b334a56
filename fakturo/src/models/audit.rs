use chrono::{DateTime, Utc};
use nanoid::nanoid;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    DocumentAdmitted,
    DocumentRejected,
    DocumentQueued,
    DocumentClaimed,
    DocumentHeld,
    DocumentRecovered,
    DocumentCancelled,
    DocumentFailed,
    DocumentCompleted,
    PreprocessingApplied,
    AttemptCompleted,
    EnsembleMerged,
    ResultPersisted,
    ResultDiscarded,
    RetryScheduled,
    RetryWoken,
    RetriesExhausted,
    ReviewQueued,
    ReviewCompleted,
    IntegrationSubmitted,
    IntegrationFailed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentAdmitted => "document_admitted",
            Self::DocumentRejected => "document_rejected",
            Self::DocumentQueued => "document_queued",
            Self::DocumentClaimed => "document_claimed",
            Self::DocumentHeld => "document_held",
            Self::DocumentRecovered => "document_recovered",
            Self::DocumentCancelled => "document_cancelled",
            Self::DocumentFailed => "document_failed",
            Self::DocumentCompleted => "document_completed",
            Self::PreprocessingApplied => "preprocessing_applied",
            Self::AttemptCompleted => "attempt_completed",
            Self::EnsembleMerged => "ensemble_merged",
            Self::ResultPersisted => "result_persisted",
            Self::ResultDiscarded => "result_discarded",
            Self::RetryScheduled => "retry_scheduled",
            Self::RetryWoken => "retry_woken",
            Self::RetriesExhausted => "retries_exhausted",
            Self::ReviewQueued => "review_queued",
            Self::ReviewCompleted => "review_completed",
            Self::IntegrationSubmitted => "integration_submitted",
            Self::IntegrationFailed => "integration_failed",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("Unknown audit action: {s}"))
    }
}

/// Append-only trace record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub document_id: String,
    pub attempt_id: Option<String>,
    pub action: AuditAction,
    pub actor: String,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(document_id: &str, action: AuditAction, actor: &str) -> Self {
        Self {
            id: nanoid!(),
            document_id: document_id.to_string(),
            attempt_id: None,
            action,
            actor: actor.to_string(),
            detail: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn attempt(mut self, attempt_id: &str) -> Self {
        self.attempt_id = Some(attempt_id.to_string());
        self
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}
