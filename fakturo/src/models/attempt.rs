use chrono::{DateTime, Utc};
use nanoid::nanoid;
use serde::{Deserialize, Serialize};

use super::{AttemptStatus, StepType};

/// One step executed against a document. Immutable once completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionAttempt {
    pub id: String,
    pub document_id: String,
    pub engine_name: Option<String>,
    pub step_type: StepType,
    /// Position within the document's attempt history, assigned by the store.
    pub ordinal: i64,
    /// Retry count of the document when the attempt was made.
    pub cycle: u32,
    pub status: AttemptStatus,
    pub input_snapshot: Option<serde_json::Value>,
    pub output_snapshot: Option<serde_json::Value>,
    pub duration_ms: Option<i64>,
    pub confidence: Option<f64>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExtractionAttempt {
    pub fn start(
        document_id: &str,
        engine_name: Option<&str>,
        step_type: StepType,
        cycle: u32,
    ) -> Self {
        Self {
            id: nanoid!(),
            document_id: document_id.to_string(),
            engine_name: engine_name.map(str::to_string),
            step_type,
            ordinal: 0,
            cycle,
            status: AttemptStatus::InProgress,
            input_snapshot: None,
            output_snapshot: None,
            duration_ms: None,
            confidence: None,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn finish(&mut self, status: AttemptStatus) {
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        if self.duration_ms.is_none() {
            self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0));
        }
    }
}
