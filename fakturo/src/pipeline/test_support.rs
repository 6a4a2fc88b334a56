use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::config::{DatabaseConfig, PipelineConfig};
use crate::db::{Database, DatabaseBackend, LibSqlBackend};
use crate::models::{
    Document, DocumentStatus, EngineDefaults, EngineType, FieldMap, FieldValue,
};
use crate::ocr::{EngineError, EngineOutput, ExtractionRequest, OcrEngine};

use super::audit::AuditLog;
use super::downstream::Downstream;
use super::registry::EngineRegistry;
use super::review::{ReviewRouter, ReviewThresholds};

pub async fn test_backend() -> (TempDir, Arc<dyn DatabaseBackend>) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("file:{}", dir.path().join("fakturo-test.db").display());
    let db = Database::new(&DatabaseConfig::for_url(url)).await.unwrap();
    (dir, Arc::new(LibSqlBackend::new(db)))
}

pub fn review_router(db: Arc<dyn DatabaseBackend>) -> Arc<ReviewRouter> {
    Arc::new(ReviewRouter::new(
        db.clone(),
        Arc::new(EngineRegistry::new(db.clone(), 0.2)),
        Downstream::log_only(),
        AuditLog::new(db),
        ReviewThresholds::from_config(&PipelineConfig::default()),
    ))
}

/// Insert a queued document with a few bytes of content.
pub async fn queued_document(db: &Arc<dyn DatabaseBackend>, id: &str) -> Document {
    let mut doc = Document::new(id.to_string(), format!("{id}.png"), "image/png".into(), 4);
    db.create_document(&doc, Some(&[1, 2, 3, 4])).await.unwrap();
    db.transition_status(id, DocumentStatus::Uploaded, DocumentStatus::Queued, None)
        .await
        .unwrap();
    doc.status = DocumentStatus::Queued;
    doc
}

pub fn defaults(priority: i64) -> EngineDefaults {
    let mut defaults = EngineDefaults::with_priority(priority);
    defaults
        .config
        .insert("timeout_ms".to_string(), serde_json::json!(100));
    defaults
}

pub fn output(fields: &[(&str, f64)], overall: f64) -> EngineOutput {
    let fields: FieldMap = fields
        .iter()
        .map(|(name, confidence)| (name.to_string(), FieldValue::new("value", *confidence)))
        .collect();
    EngineOutput {
        text: "scripted text".to_string(),
        fields,
        overall_confidence: overall,
        duration_ms: 3,
    }
}

#[derive(Clone)]
pub enum Step {
    Output(EngineOutput),
    Unavailable,
    Hang,
    Fail(&'static str),
    Panic,
}

/// Engine that replays a script; the last step repeats once the script runs out.
pub struct ScriptedEngine {
    name: String,
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    calls: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(name: &str, steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Option<Step> {
        let mut steps = self.steps.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        if let Some(step) = steps.pop_front() {
            *last = Some(step.clone());
            return Some(step);
        }
        last.clone()
    }
}

#[async_trait]
impl OcrEngine for ScriptedEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn engine_type(&self) -> EngineType {
        EngineType::Tesseract
    }

    async fn extract(&self, _request: &ExtractionRequest) -> Result<EngineOutput, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Some(Step::Output(output)) => Ok(output),
            Some(Step::Unavailable) => Err(EngineError::Unavailable("scripted".into())),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(EngineOutput::default())
            }
            Some(Step::Fail(message)) => Err(EngineError::Failed(message.to_string())),
            Some(Step::Panic) => panic!("scripted engine panic"),
            None => Ok(EngineOutput::default()),
        }
    }
}
