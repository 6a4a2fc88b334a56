use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::db::DatabaseBackend;
use crate::error::{FakturoError, Result};
use crate::models::{
    AttemptStatus, AuditAction, AuditEntry, Document, DocumentStatus, ExtractionAttempt,
    OcrResult, RetryStrategy, StepType,
};
use crate::ocr::{preprocess_image, EngineOutput, PreprocessOptions};

use super::audit::{actor, AuditLog};
use super::ensemble::{merge, Candidate};
use super::invoker::{EngineInvoker, InvocationContext, InvocationOutcome};
use super::registry::{ActiveEngine, EngineRegistry};
use super::retry::{FailureKind, RetryScheduler};

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// Someone else owns the document, or it is not queued.
    Skipped,
    /// Configuration problem; the document went back to `Queued` untouched.
    Held { reason: String },
    Cancelled,
    RetryScheduled {
        strategy: RetryStrategy,
        next_retry_at: DateTime<Utc>,
    },
    Failed { error: String },
    OcrCompleted(OcrResult),
    ForcedReview { reason: String },
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub acceptance_threshold: f64,
    pub confidence_floor: f64,
    pub language: String,
    pub preprocess: PreprocessOptions,
}

impl OrchestratorSettings {
    pub fn new(config: &PipelineConfig, preprocess: PreprocessOptions) -> Self {
        Self {
            acceptance_threshold: config.acceptance_threshold,
            confidence_floor: config.confidence_floor,
            language: config.language.clone(),
            preprocess,
        }
    }
}

/// What the engines of one cycle produced, in invocation order.
#[derive(Default)]
struct CycleTally {
    usable: Vec<(String, EngineOutput)>,
    best_low: Option<f64>,
    first_unavailable: Option<(String, String)>,
    first_error: Option<(String, String)>,
}

impl CycleTally {
    fn failure(self) -> FailureKind {
        if let Some(confidence) = self.best_low {
            return FailureKind::LowConfidence { confidence };
        }
        if let Some((engine, error)) = self.first_error {
            return FailureKind::Errored { engine, error };
        }
        if let Some((engine, error)) = self.first_unavailable {
            return FailureKind::Unavailable { engine, error };
        }
        FailureKind::LowConfidence { confidence: 0.0 }
    }
}

enum EngineRun {
    Accepted(OcrResult),
    Exhausted(CycleTally),
    TimedOut { engine: String, error: String },
    Cancelled,
}

/// Runs one processing cycle per call: claim, engines in order, merge,
/// persist, or hand the failure to the retry scheduler.
pub struct Orchestrator {
    db: Arc<dyn DatabaseBackend>,
    registry: Arc<EngineRegistry>,
    invoker: EngineInvoker,
    retry: Arc<RetryScheduler>,
    audit: AuditLog,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        db: Arc<dyn DatabaseBackend>,
        registry: Arc<EngineRegistry>,
        invoker: EngineInvoker,
        retry: Arc<RetryScheduler>,
        audit: AuditLog,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            db,
            registry,
            invoker,
            retry,
            audit,
            settings,
        }
    }

    pub async fn process_document(&self, document_id: &str) -> Result<CycleOutcome> {
        let mut doc = self
            .db
            .get_document(document_id)
            .await?
            .ok_or_else(|| FakturoError::NotFound(format!("document {document_id}")))?;

        if doc.status != DocumentStatus::Queued || !self.db.claim_document(document_id).await? {
            debug!(doc_id = %document_id, status = %doc.status, "Document not claimable; skipping");
            return Ok(CycleOutcome::Skipped);
        }
        doc.status = DocumentStatus::Processing;
        info!(doc_id = %document_id, retry_count = doc.retry_count, strategy = ?doc.retry_strategy, "Document claimed");
        self.audit
            .record(
                AuditEntry::new(document_id, AuditAction::DocumentClaimed, actor::ORCHESTRATOR)
                    .detail(json!({
                        "retry_count": doc.retry_count,
                        "strategy": doc.retry_strategy,
                    })),
            )
            .await;

        match self.run_cycle(&doc).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let reason = e.to_string();
                if matches!(e, FakturoError::Configuration(_)) {
                    warn!(doc_id = %document_id, error = %reason, "Configuration error; holding document");
                } else {
                    error!(doc_id = %document_id, error = %reason, "Processing cycle aborted; holding document");
                }
                self.hold(&doc, &reason).await?;
                Ok(CycleOutcome::Held { reason })
            }
        }
    }

    /// Engines for this cycle, honouring the retry strategy and the
    /// document's preferred engine.
    pub async fn plan_engines(&self, doc: &Document) -> Result<Vec<ActiveEngine>> {
        let mut active = self.registry.list_active_engines_by_priority().await?;
        if active.is_empty() {
            return Err(FakturoError::Configuration("no active OCR engines".to_string()));
        }

        match (doc.retry_strategy, doc.retry_engine.as_deref()) {
            (Some(RetryStrategy::SameEngine), Some(engine)) => {
                if let Some(same) = active.iter().find(|e| e.name() == engine) {
                    return Ok(vec![same.clone()]);
                }
                warn!(doc_id = %doc.id, engine = %engine, "Retry engine no longer active; using all engines");
            }
            (Some(RetryStrategy::DifferentEngine), Some(engine)) => {
                let others: Vec<_> = active.iter().filter(|e| e.name() != engine).cloned().collect();
                if others.is_empty() {
                    warn!(doc_id = %doc.id, engine = %engine, "No other engine available; retrying the same one");
                } else {
                    active = others;
                }
            }
            _ => {}
        }

        if let Some(preferred) = doc.preferred_engine.as_deref() {
            match active.iter().position(|e| e.name() == preferred) {
                Some(index) => {
                    let engine = active.remove(index);
                    active.insert(0, engine);
                }
                None => debug!(doc_id = %doc.id, engine = %preferred, "Preferred engine not in plan"),
            }
        }

        Ok(active)
    }

    async fn run_cycle(&self, doc: &Document) -> Result<CycleOutcome> {
        let content = match self.db.get_document_content(&doc.id).await? {
            Some(content) => content,
            None => return self.fail(doc, "document content is missing").await,
        };

        let plan = self.plan_engines(doc).await?;
        let cycle = doc.retry_count + 1;
        let (image, preprocessed) = self.prepare_image(doc, content, cycle).await?;

        let ctx = InvocationContext {
            document_id: &doc.id,
            cycle,
            mime_type: &doc.mime_type,
            language: &self.settings.language,
            preprocessed,
        };

        let result = match self.run_engines(&ctx, &plan, image).await? {
            EngineRun::Cancelled => return Ok(self.discard(doc, None).await),
            EngineRun::TimedOut { engine, error } => {
                return self
                    .retry
                    .apply(doc, FailureKind::Timeout { engine, error })
                    .await
            }
            EngineRun::Accepted(result) => result,
            EngineRun::Exhausted(tally) => match tally.usable.len() {
                0 => return self.retry.apply(doc, tally.failure()).await,
                1 => {
                    let (engine, output) = &tally.usable[0];
                    OcrResult::new(
                        &doc.id,
                        output.text.clone(),
                        output.fields.clone(),
                        output.overall_confidence,
                        vec![engine.clone()],
                        false,
                    )
                }
                _ => self.merge(doc, cycle, &tally.usable).await?,
            },
        };

        let threshold = self.retry.policy().preprocessing_retry_threshold;
        if result.overall_confidence < self.settings.confidence_floor
            || (result.overall_confidence < threshold && !doc.preprocessing_used)
        {
            return self
                .retry
                .apply(
                    doc,
                    FailureKind::LowConfidence {
                        confidence: result.overall_confidence,
                    },
                )
                .await;
        }

        self.persist(doc, result).await
    }

    async fn run_engines(
        &self,
        ctx: &InvocationContext<'_>,
        plan: &[ActiveEngine],
        image: Arc<[u8]>,
    ) -> Result<EngineRun> {
        let mut tally = CycleTally::default();

        for engine in plan {
            if self.is_cancelled(ctx.document_id).await? {
                return Ok(EngineRun::Cancelled);
            }

            let invocation = self.invoker.invoke(ctx, engine, Arc::clone(&image)).await?;
            let name = engine.name().to_string();

            match invocation.outcome {
                InvocationOutcome::Extracted(output) => {
                    let confidence = output.overall_confidence;
                    if confidence >= self.settings.acceptance_threshold {
                        info!(doc_id = %ctx.document_id, engine = %name, confidence, "Engine result accepted");
                        return Ok(EngineRun::Accepted(OcrResult::new(
                            ctx.document_id,
                            output.text,
                            output.fields,
                            confidence,
                            vec![name],
                            false,
                        )));
                    }
                    if confidence >= self.settings.confidence_floor {
                        tally.usable.push((name, output));
                    } else {
                        tally.best_low = Some(tally.best_low.map_or(confidence, |b| b.max(confidence)));
                    }
                }
                InvocationOutcome::Empty => {
                    tally.best_low = Some(tally.best_low.unwrap_or(0.0));
                }
                InvocationOutcome::TimedOut(limit) => {
                    let error = format!("{name} timed out after {} ms", limit.as_millis());
                    return Ok(EngineRun::TimedOut {
                        engine: name,
                        error,
                    });
                }
                outcome @ InvocationOutcome::Unavailable(_) => {
                    if tally.first_unavailable.is_none() {
                        let error = describe(outcome, &name);
                        tally.first_unavailable = Some((name, error));
                    }
                }
                outcome @ InvocationOutcome::Failed(_) => {
                    if tally.first_error.is_none() {
                        let error = describe(outcome, &name);
                        tally.first_error = Some((name, error));
                    }
                }
            }
        }

        if self.is_cancelled(ctx.document_id).await? {
            return Ok(EngineRun::Cancelled);
        }
        Ok(EngineRun::Exhausted(tally))
    }

    async fn merge(
        &self,
        doc: &Document,
        cycle: u32,
        usable: &[(String, EngineOutput)],
    ) -> Result<OcrResult> {
        let candidates: Vec<Candidate<'_>> = usable
            .iter()
            .map(|(engine, output)| Candidate::new(engine, output))
            .collect();
        let merged = merge(&candidates);

        let mut attempt = ExtractionAttempt::start(&doc.id, None, StepType::ConfidenceScoring, cycle);
        attempt.input_snapshot = Some(json!({
            "candidates": usable
                .iter()
                .map(|(engine, output)| json!({"engine": engine, "confidence": output.overall_confidence}))
                .collect::<Vec<_>>(),
        }));
        attempt.output_snapshot = Some(json!({ "fields": merged.fields }));
        attempt.confidence = Some(merged.overall_confidence);
        attempt.finish(AttemptStatus::Succeeded);
        self.db.record_attempt(&mut attempt).await?;

        info!(
            doc_id = %doc.id,
            engines = ?merged.engines,
            confidence = merged.overall_confidence,
            "Ensemble merge"
        );
        self.audit
            .record(
                AuditEntry::new(&doc.id, AuditAction::EnsembleMerged, actor::ORCHESTRATOR)
                    .attempt(&attempt.id)
                    .detail(json!({
                        "engines": merged.engines,
                        "fields": merged.fields.len(),
                        "confidence": merged.overall_confidence,
                    })),
            )
            .await;

        Ok(OcrResult::new(
            &doc.id,
            merged.raw_text,
            merged.fields,
            merged.overall_confidence,
            merged.engines,
            true,
        ))
    }

    async fn prepare_image(
        &self,
        doc: &Document,
        content: Vec<u8>,
        cycle: u32,
    ) -> Result<(Arc<[u8]>, bool)> {
        let wants_preprocessing = doc.retry_strategy == Some(RetryStrategy::WithPreprocessing);
        if !wants_preprocessing || doc.mime_type == "application/pdf" {
            return Ok((Arc::from(content), false));
        }

        let mut attempt = ExtractionAttempt::start(&doc.id, None, StepType::Preprocessing, cycle);
        attempt.input_snapshot = Some(json!({ "bytes": content.len(), "mime_type": doc.mime_type }));

        let options = self.settings.preprocess;
        let original: Arc<[u8]> = Arc::from(content);
        let input = Arc::clone(&original);
        let processed = tokio::task::spawn_blocking(move || preprocess_image(&input, &options))
            .await
            .map_err(|e| FakturoError::Internal(format!("preprocessing task failed: {e}")))?;

        let (image, applied) = match processed {
            Ok(bytes) => {
                attempt.output_snapshot = Some(json!({ "bytes": bytes.len() }));
                attempt.finish(AttemptStatus::Succeeded);
                (Arc::from(bytes), true)
            }
            Err(e) => {
                warn!(doc_id = %doc.id, error = %e, "Preprocessing failed; using original image");
                attempt.error_message = Some(e.to_string());
                attempt.finish(AttemptStatus::Failed);
                (original, false)
            }
        };
        self.db.record_attempt(&mut attempt).await?;
        self.audit
            .record(
                AuditEntry::new(&doc.id, AuditAction::PreprocessingApplied, actor::ORCHESTRATOR)
                    .attempt(&attempt.id)
                    .detail(json!({ "applied": applied, "error": attempt.error_message })),
            )
            .await;

        Ok((image, applied))
    }

    async fn persist(&self, doc: &Document, result: OcrResult) -> Result<CycleOutcome> {
        if self.is_cancelled(&doc.id).await? {
            return Ok(self.discard(doc, None).await);
        }

        self.db.save_result(&result).await?;

        let mut updated = doc.clone();
        updated.status = DocumentStatus::OcrCompleted;
        updated.clear_retry_plan();
        updated.retry_engine = None;
        updated.consecutive_failures = 0;
        updated.error_message = None;
        if !self.db.save_document(&updated, DocumentStatus::Processing).await? {
            return Ok(self.discard(doc, Some(&result)).await);
        }

        info!(
            doc_id = %doc.id,
            confidence = result.overall_confidence,
            engines = ?result.engines,
            ensemble = result.ensemble_used,
            "OCR completed"
        );
        self.audit
            .record(
                AuditEntry::new(&doc.id, AuditAction::ResultPersisted, actor::ORCHESTRATOR).detail(
                    json!({
                        "result_id": result.id,
                        "confidence": result.overall_confidence,
                        "engines": result.engines,
                        "ensemble_used": result.ensemble_used,
                    }),
                ),
            )
            .await;

        Ok(CycleOutcome::OcrCompleted(result))
    }

    /// Drop the cycle's work for a document cancelled mid-flight.
    async fn discard(&self, doc: &Document, saved: Option<&OcrResult>) -> CycleOutcome {
        if saved.is_some() {
            if let Err(e) = self.db.supersede_results(&doc.id).await {
                error!(doc_id = %doc.id, error = %e, "Failed to supersede discarded result");
            }
        }
        info!(doc_id = %doc.id, "Document cancelled during processing; result discarded");
        self.audit
            .record(
                AuditEntry::new(&doc.id, AuditAction::ResultDiscarded, actor::ORCHESTRATOR)
                    .detail(json!({ "result_id": saved.map(|r| r.id.clone()) })),
            )
            .await;
        CycleOutcome::Cancelled
    }

    async fn is_cancelled(&self, document_id: &str) -> Result<bool> {
        Ok(self
            .db
            .get_document(document_id)
            .await?
            .map_or(true, |d| d.status == DocumentStatus::Cancelled))
    }

    async fn hold(&self, doc: &Document, reason: &str) -> Result<()> {
        let held = self
            .db
            .transition_status(
                &doc.id,
                DocumentStatus::Processing,
                DocumentStatus::Queued,
                Some(reason),
            )
            .await?;
        if held {
            self.audit
                .record(
                    AuditEntry::new(&doc.id, AuditAction::DocumentHeld, actor::ORCHESTRATOR)
                        .detail(json!({ "reason": reason })),
                )
                .await;
        }
        Ok(())
    }

    async fn fail(&self, doc: &Document, error: &str) -> Result<CycleOutcome> {
        let failed = self
            .db
            .transition_status(
                &doc.id,
                DocumentStatus::Processing,
                DocumentStatus::Failed,
                Some(error),
            )
            .await?;
        if !failed {
            return Ok(CycleOutcome::Cancelled);
        }
        error!(doc_id = %doc.id, error = %error, "Document failed");
        self.audit
            .record(
                AuditEntry::new(&doc.id, AuditAction::DocumentFailed, actor::ORCHESTRATOR)
                    .detail(json!({ "error": error })),
            )
            .await;
        Ok(CycleOutcome::Failed {
            error: error.to_string(),
        })
    }
}

fn describe(outcome: InvocationOutcome, engine: &str) -> String {
    outcome
        .into_error(engine)
        .map(|e| e.to_string())
        .unwrap_or_else(|| format!("{engine} produced no output"))
}
