// Shared helpers for pipeline integration tests
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fakturo::config::{
    Config, DatabaseConfig, DownstreamConfig, IngestionConfig, OcrConfig, PipelineConfig,
    RetryConfig, ServerConfig,
};
use fakturo::db::{Database, DatabaseBackend, LibSqlBackend};
use fakturo::models::{DocumentStatus, EngineDefaults, EngineType, FieldMap, FieldValue};
use fakturo::ocr::{EngineError, EngineOutput, ExtractionRequest, OcrEngine};
use fakturo::pipeline::{
    Admission, Downstream, EngineRegistry, Job, JobQueue, Pipeline, Upload, WorkerPool,
};

static INIT: Once = Once::new();

/// Initialize tracing subscriber once for tests
pub fn init_test_logger() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

pub const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

/// Deterministic configuration: no env lookups, zero retry delay.
pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            api_keys: vec!["test-key".to_string()],
        },
        database: DatabaseConfig::for_url("file::memory:"),
        ingestion: IngestionConfig::default(),
        pipeline: PipelineConfig::default(),
        retry: RetryConfig {
            max_retries: 3,
            base_delay_secs: 0,
            max_delay_secs: 0,
            escalate_after: 2,
        },
        ocr: OcrConfig::default(),
        downstream: DownstreamConfig {
            invoice_webhook_url: None,
            review_webhook_url: None,
            timeout_secs: 5,
        },
    }
}

pub struct TestPipeline {
    _dir: TempDir,
    pub db: Arc<dyn DatabaseBackend>,
    pub registry: Arc<EngineRegistry>,
    pub pipeline: Arc<Pipeline>,
    pub receiver: mpsc::Receiver<Job>,
}

impl TestPipeline {
    pub async fn new() -> Self {
        Self::with(test_config(), Downstream::log_only()).await
    }

    pub async fn with(config: Config, downstream: Downstream) -> Self {
        init_test_logger();
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let url = format!("file:{}", dir.path().join("fakturo-integ.db").display());
        let raw_db = Database::new(&DatabaseConfig::for_url(url))
            .await
            .expect("failed to open database");
        let db: Arc<dyn DatabaseBackend> = Arc::new(LibSqlBackend::new(raw_db));

        let registry = Arc::new(EngineRegistry::new(
            db.clone(),
            config.pipeline.stats_smoothing,
        ));
        let (queue, receiver) = JobQueue::channel(config.pipeline.job_queue_capacity);
        let pipeline = Arc::new(Pipeline::new(
            db.clone(),
            registry.clone(),
            &config,
            downstream,
            queue,
        ));

        Self {
            _dir: dir,
            db,
            registry,
            pipeline,
            receiver,
        }
    }

    /// Register a scripted engine; per-engine timeout is 100 ms.
    pub async fn engine(&self, name: &str, priority: i64, steps: Vec<Step>) -> Arc<ScriptedEngine> {
        let engine = ScriptedEngine::new(name, steps);
        let mut defaults = EngineDefaults::with_priority(priority);
        defaults
            .config
            .insert("timeout_ms".to_string(), serde_json::json!(100));
        self.registry
            .register(engine.clone(), defaults)
            .await
            .expect("failed to register engine");
        engine
    }

    /// Upload a small PNG and return its id, expecting it to be queued.
    pub async fn upload_png(&self, filename: &str) -> String {
        let admission = self
            .pipeline
            .ingest(Upload {
                filename: filename.to_string(),
                content_type: Some("image/png".to_string()),
                uploaded_by: Some("clerk".to_string()),
                preferred_engine: None,
                bytes: PNG_MAGIC.to_vec(),
            })
            .await
            .expect("ingest failed");
        match admission {
            Admission::Queued { document_id } => document_id,
            other => panic!("expected queued admission, got {other:?}"),
        }
    }

    /// Pop the next job and run it to completion.
    pub async fn run_next_job(&mut self) -> Job {
        let job = self.receiver.try_recv().expect("no job queued");
        self.pipeline
            .handle_job(job.clone())
            .await
            .expect("job failed");
        job
    }

    /// Hand the job receiver to a worker pool. `run_next_job` no longer
    /// works afterwards.
    pub fn spawn_workers(&mut self, slots: usize) -> (CancellationToken, JoinHandle<()>) {
        let (_, placeholder) = mpsc::channel::<Job>(1);
        let receiver = std::mem::replace(&mut self.receiver, placeholder);
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new(self.pipeline.clone(), slots);
        let handle = tokio::spawn(pool.run(receiver, cancel.clone()));
        (cancel, handle)
    }

    /// Poll until the document reaches `expected` or two seconds pass.
    pub async fn wait_for(&self, document_id: &str, expected: DocumentStatus) -> DocumentStatus {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let status = self.status(document_id).await;
            if status == expected || tokio::time::Instant::now() >= deadline {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub async fn status(&self, document_id: &str) -> DocumentStatus {
        self.pipeline
            .status(document_id)
            .await
            .expect("status failed")
            .document
            .status
    }
}

pub fn output(fields: &[(&str, &str, f64)], overall: f64) -> EngineOutput {
    let fields: FieldMap = fields
        .iter()
        .map(|(name, value, confidence)| (name.to_string(), FieldValue::new(*value, *confidence)))
        .collect();
    EngineOutput {
        text: "FAKTURA VAT".to_string(),
        fields,
        overall_confidence: overall,
        duration_ms: 5,
    }
}

/// A complete invoice at one confidence level.
pub fn invoice(confidence: f64) -> EngineOutput {
    output(
        &[
            ("invoice_number", "FV/2024/001", confidence),
            ("issue_date", "2024-03-01", confidence),
            ("gross_total", "1230.00", confidence),
        ],
        confidence,
    )
}

#[derive(Clone)]
pub enum Step {
    Output(EngineOutput),
    Unavailable,
    Hang,
    Fail(&'static str),
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
        EngineType::NeuralNet
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
            None => Ok(EngineOutput::default()),
        }
    }
}
