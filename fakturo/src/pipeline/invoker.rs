use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, error, warn};

use crate::db::DatabaseBackend;
use crate::error::{FakturoError, Result};
use crate::models::{
    clamp_confidence, AttemptStatus, AuditAction, AuditEntry, ExtractionAttempt, StepType,
};
use crate::ocr::{EngineError, EngineOutput, ExtractionRequest};

use super::audit::{actor, AuditLog};
use super::registry::{ActiveEngine, EngineRegistry};

/// Identifies the cycle an invocation belongs to.
#[derive(Debug, Clone)]
pub struct InvocationContext<'a> {
    pub document_id: &'a str,
    pub cycle: u32,
    pub mime_type: &'a str,
    pub language: &'a str,
    pub preprocessed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    Extracted(EngineOutput),
    /// The engine ran but produced neither text nor fields.
    Empty,
    Unavailable(String),
    TimedOut(Duration),
    Failed(String),
}

impl InvocationOutcome {
    fn attempt_status(&self) -> AttemptStatus {
        match self {
            Self::Extracted(_) => AttemptStatus::Succeeded,
            Self::Empty => AttemptStatus::Empty,
            Self::Unavailable(_) => AttemptStatus::Unavailable,
            Self::TimedOut(_) => AttemptStatus::TimedOut,
            Self::Failed(_) => AttemptStatus::Failed,
        }
    }

    pub fn into_error(self, engine: &str) -> Option<FakturoError> {
        match self {
            Self::Extracted(_) | Self::Empty => None,
            Self::Unavailable(reason) => Some(FakturoError::EngineUnavailable(format!(
                "{engine}: {reason}"
            ))),
            Self::TimedOut(timeout) => Some(FakturoError::EngineTimeout {
                engine: engine.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
            Self::Failed(message) => Some(FakturoError::Engine(format!("{engine}: {message}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub attempt: ExtractionAttempt,
    pub outcome: InvocationOutcome,
}

/// Runs one engine call as one attempt.
///
/// The engine runs on its own task so a panic is contained, under a hard
/// timeout so a hung engine cannot hold a worker slot.
pub struct EngineInvoker {
    db: Arc<dyn DatabaseBackend>,
    registry: Arc<EngineRegistry>,
    audit: AuditLog,
    default_timeout: Duration,
}

impl EngineInvoker {
    pub fn new(
        db: Arc<dyn DatabaseBackend>,
        registry: Arc<EngineRegistry>,
        audit: AuditLog,
        default_timeout: Duration,
    ) -> Self {
        Self {
            db,
            registry,
            audit,
            default_timeout,
        }
    }

    pub async fn invoke(
        &self,
        ctx: &InvocationContext<'_>,
        engine: &ActiveEngine,
        image: Arc<[u8]>,
    ) -> Result<Invocation> {
        let timeout = engine.timeout_override().unwrap_or(self.default_timeout);
        let mut attempt = ExtractionAttempt::start(
            ctx.document_id,
            Some(engine.name()),
            StepType::TextExtraction,
            ctx.cycle,
        );
        attempt.input_snapshot = Some(json!({
            "mime_type": ctx.mime_type,
            "language": ctx.language,
            "bytes": image.len(),
            "timeout_ms": timeout.as_millis() as u64,
            "preprocessed": ctx.preprocessed,
        }));

        if !self.db.open_attempt(&mut attempt).await? {
            return Err(FakturoError::Conflict(format!(
                "document {} already has an attempt in flight",
                ctx.document_id
            )));
        }

        let started = Instant::now();
        let outcome = if engine.engine.is_available() {
            let request = ExtractionRequest::new(image, ctx.mime_type, ctx.language, timeout);
            self.run(engine, request, timeout).await
        } else {
            InvocationOutcome::Unavailable("engine reports it is not available".to_string())
        };

        match &outcome {
            InvocationOutcome::Extracted(output) => {
                attempt.duration_ms = Some(output.duration_ms.max(0));
                attempt.confidence = Some(output.overall_confidence);
                attempt.output_snapshot = Some(json!({
                    "text_chars": output.text.chars().count(),
                    "fields": output.fields,
                    "overall_confidence": output.overall_confidence,
                }));
            }
            InvocationOutcome::Empty => {
                attempt.confidence = Some(0.0);
            }
            InvocationOutcome::Unavailable(reason) | InvocationOutcome::Failed(reason) => {
                attempt.error_message = Some(reason.clone());
            }
            InvocationOutcome::TimedOut(limit) => {
                attempt.error_message = Some(format!("timed out after {} ms", limit.as_millis()));
            }
        }
        if attempt.duration_ms.is_none() {
            attempt.duration_ms = Some(started.elapsed().as_millis() as i64);
        }
        attempt.finish(outcome.attempt_status());

        let closed = match self.db.complete_attempt(&attempt).await {
            Ok(closed) => closed,
            Err(e) => {
                self.abandon(&attempt, &e).await;
                return Err(e);
            }
        };
        if !closed {
            warn!(
                doc_id = %ctx.document_id,
                attempt_id = %attempt.id,
                "Attempt was closed by someone else"
            );
        }

        if !matches!(outcome, InvocationOutcome::Extracted(_) | InvocationOutcome::Empty) {
            warn!(
                doc_id = %ctx.document_id,
                engine = %engine.name(),
                status = %attempt.status,
                error = ?attempt.error_message,
                "Engine invocation did not produce output"
            );
        }

        self.registry.record_outcome(engine.name(), &attempt).await;
        self.audit
            .record(
                AuditEntry::new(ctx.document_id, AuditAction::AttemptCompleted, actor::INVOKER)
                    .attempt(&attempt.id)
                    .detail(json!({
                        "engine": engine.name(),
                        "ordinal": attempt.ordinal,
                        "cycle": attempt.cycle,
                        "status": attempt.status,
                        "confidence": attempt.confidence,
                        "duration_ms": attempt.duration_ms,
                        "error": attempt.error_message,
                    })),
            )
            .await;

        Ok(Invocation { attempt, outcome })
    }

    /// Close an attempt whose outcome could not be written. Left
    /// `in_progress` it would block every later attempt on the document.
    async fn abandon(&self, attempt: &ExtractionAttempt, cause: &FakturoError) {
        let mut failed = attempt.clone();
        failed.output_snapshot = None;
        failed.error_message = Some(format!("outcome not recorded: {cause}"));
        failed.finish(AttemptStatus::Failed);

        match self.db.complete_attempt(&failed).await {
            Ok(_) => warn!(
                doc_id = %attempt.document_id,
                attempt_id = %attempt.id,
                error = %cause,
                "Attempt closed as failed; its outcome could not be recorded"
            ),
            Err(e) => error!(
                doc_id = %attempt.document_id,
                attempt_id = %attempt.id,
                error = %e,
                "Attempt left in progress"
            ),
        }
    }

    async fn run(
        &self,
        engine: &ActiveEngine,
        request: ExtractionRequest,
        timeout: Duration,
    ) -> InvocationOutcome {
        let implementation = Arc::clone(&engine.engine);
        let handle = tokio::spawn(async move { implementation.extract(&request).await });
        let abort = handle.abort_handle();

        match tokio::time::timeout(timeout, handle).await {
            Err(_) => {
                abort.abort();
                InvocationOutcome::TimedOut(timeout)
            }
            Ok(Err(join_error)) => {
                if join_error.is_panic() {
                    InvocationOutcome::Failed("engine panicked".to_string())
                } else {
                    InvocationOutcome::Failed(format!("engine task aborted: {join_error}"))
                }
            }
            Ok(Ok(Err(EngineError::Unavailable(reason)))) => InvocationOutcome::Unavailable(reason),
            Ok(Ok(Err(EngineError::Timeout(limit)))) => InvocationOutcome::TimedOut(limit),
            Ok(Ok(Err(EngineError::Failed(message)))) => InvocationOutcome::Failed(message),
            Ok(Ok(Ok(output))) if output.is_empty() => {
                debug!(engine = %engine.name(), "Engine returned empty output");
                InvocationOutcome::Empty
            }
            Ok(Ok(Ok(output))) => InvocationOutcome::Extracted(clamped(output)),
        }
    }
}

/// Engines may report scores outside `[0, 1]` or NaN.
fn clamped(mut output: EngineOutput) -> EngineOutput {
    output.overall_confidence = clamp_confidence(output.overall_confidence);
    for field in output.fields.values_mut() {
        field.confidence = clamp_confidence(field.confidence);
    }
    output
}
