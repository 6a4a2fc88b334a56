//! Document processing pipeline.
//!
//! Uploads enter through [`Ingestor`], which persists them and enqueues a
//! [`Job`]. The [`WorkerPool`] hands jobs to the [`Orchestrator`], which
//! runs one cycle of OCR engines per job. Failed cycles go to the
//! [`RetryScheduler`]; completed ones to the [`ReviewRouter`], which either
//! forwards the invoice downstream or parks it for manual review.
//!
//! [`Pipeline`] wires these together and is what the HTTP layer talks to.

pub mod audit;
pub mod downstream;
pub mod ensemble;
pub mod ingest;
pub mod invoker;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod review;
pub mod worker;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::DatabaseBackend;
use crate::error::{FakturoError, Result};
use crate::models::{
    AuditAction, AuditEntry, Document, DocumentStatus, Engine, ExtractionAttempt, OcrResult,
    ReviewFeedback, ReviewSubmission,
};
use crate::ocr::PreprocessOptions;

pub use audit::{actor, AuditLog};
pub use downstream::{Downstream, InvoicePayload, InvoiceSink, ReviewNotice, ReviewNotifier};
pub use ingest::{Admission, Ingestor, Upload};
pub use invoker::EngineInvoker;
pub use orchestrator::{CycleOutcome, Orchestrator, OrchestratorSettings};
pub use registry::{ActiveEngine, EngineRegistry};
pub use retry::{RetryPolicy, RetryScheduler, SweepReport};
pub use review::{ReviewRouter, ReviewThresholds};
pub use worker::{run_sweeper, Job, JobQueue, JobReason, WorkerPool};

const RECOVERY_BATCH: u32 = 1000;

/// A document with its current result, if any.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentStatusView {
    pub document: Document,
    pub result: Option<OcrResult>,
}

pub struct Pipeline {
    db: Arc<dyn DatabaseBackend>,
    registry: Arc<EngineRegistry>,
    ingestor: Ingestor,
    orchestrator: Orchestrator,
    retry: Arc<RetryScheduler>,
    review: Arc<ReviewRouter>,
    audit: AuditLog,
    queue: JobQueue,
    stale_after: Duration,
}

impl Pipeline {
    pub fn new(
        db: Arc<dyn DatabaseBackend>,
        registry: Arc<EngineRegistry>,
        config: &Config,
        downstream: Downstream,
        queue: JobQueue,
    ) -> Self {
        let audit = AuditLog::new(db.clone());
        let review = Arc::new(ReviewRouter::new(
            db.clone(),
            registry.clone(),
            downstream,
            audit.clone(),
            ReviewThresholds::from_config(&config.pipeline),
        ));
        let retry = Arc::new(RetryScheduler::new(
            db.clone(),
            RetryPolicy::from_config(&config.retry, &config.pipeline),
            review.clone(),
            audit.clone(),
            Duration::from_secs(config.pipeline.stale_queue_secs),
        ));
        let invoker = EngineInvoker::new(
            db.clone(),
            registry.clone(),
            audit.clone(),
            Duration::from_secs(config.ocr.timeout_secs),
        );
        let orchestrator = Orchestrator::new(
            db.clone(),
            registry.clone(),
            invoker,
            retry.clone(),
            audit.clone(),
            OrchestratorSettings::new(
                &config.pipeline,
                PreprocessOptions::from_config(&config.ocr),
            ),
        );
        let ingestor = Ingestor::new(
            db.clone(),
            audit.clone(),
            queue.clone(),
            config.ingestion.clone(),
        );

        Self {
            db,
            registry,
            ingestor,
            orchestrator,
            retry,
            review,
            audit,
            queue,
            stale_after: Duration::from_secs(config.pipeline.stale_queue_secs),
        }
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    pub async fn ingest(&self, upload: Upload) -> Result<Admission> {
        self.ingestor.admit(upload).await
    }

    /// Run one cycle for the job's document and route a completed result.
    pub async fn handle_job(&self, job: Job) -> Result<CycleOutcome> {
        info!(doc_id = %job.document_id, reason = %job.reason, "Processing job");
        let outcome = self.orchestrator.process_document(&job.document_id).await?;

        if let CycleOutcome::OcrCompleted(result) = &outcome {
            let doc = self
                .db
                .get_document(&job.document_id)
                .await?
                .ok_or_else(|| FakturoError::NotFound(format!("document {}", job.document_id)))?;
            if doc.status == DocumentStatus::OcrCompleted {
                let status = self.review.route(&doc, result.clone()).await?;
                info!(doc_id = %doc.id, status = %status, "Result routed");
            } else {
                warn!(doc_id = %doc.id, status = %doc.status, "Document moved on before routing");
            }
        }

        Ok(outcome)
    }

    pub async fn status(&self, document_id: &str) -> Result<DocumentStatusView> {
        let document = self.document(document_id).await?;
        let result = self.db.active_result(document_id).await?;
        Ok(DocumentStatusView { document, result })
    }

    /// Cancel a non-terminal document. An in-flight cycle notices and
    /// discards its work.
    pub async fn cancel(&self, document_id: &str, actor: &str) -> Result<Document> {
        let doc = self.document(document_id).await?;
        if doc.status.is_terminal() {
            return Err(FakturoError::Conflict(format!(
                "document {document_id} is already {}",
                doc.status
            )));
        }
        if !self.db.cancel_document(document_id).await? {
            return Err(FakturoError::Conflict(format!(
                "document {document_id} reached a terminal state"
            )));
        }

        info!(doc_id = %document_id, from = %doc.status, "Document cancelled");
        self.audit
            .record(
                AuditEntry::new(document_id, AuditAction::DocumentCancelled, actor)
                    .detail(json!({ "from": doc.status })),
            )
            .await;
        self.document(document_id).await
    }

    pub async fn complete_review(
        &self,
        document_id: &str,
        submission: ReviewSubmission,
    ) -> Result<ReviewFeedback> {
        self.review.complete_review(document_id, submission).await
    }

    pub async fn review_queue(&self, limit: u32) -> Result<Vec<Document>> {
        self.review.review_queue(limit).await
    }

    pub async fn attempts(&self, document_id: &str) -> Result<Vec<ExtractionAttempt>> {
        self.document(document_id).await?;
        self.db.list_attempts(document_id).await
    }

    pub async fn audit_trail(&self, document_id: &str) -> Result<Vec<AuditEntry>> {
        self.document(document_id).await?;
        self.audit.entries(document_id).await
    }

    pub async fn engines(&self) -> Result<Vec<Engine>> {
        self.registry.engines().await
    }

    pub async fn status_counts(&self) -> Result<Vec<(DocumentStatus, i64)>> {
        self.db.count_by_status().await
    }

    /// Startup recovery: requeue documents a previous process left in
    /// `Processing`, move on those it left between stages, then enqueue
    /// everything waiting in `Queued`.
    pub async fn recover(&self) -> Result<usize> {
        let interrupted = self.db.recover_interrupted().await?;
        for id in &interrupted {
            warn!(doc_id = %id, "Recovered document interrupted mid-cycle");
            self.audit
                .record(AuditEntry::new(
                    id,
                    AuditAction::DocumentRecovered,
                    actor::RECOVERY,
                ))
                .await;
        }
        let resumed = self.resume_stranded(Utc::now(), actor::RECOVERY).await?;

        let queued = self
            .db
            .list_by_status(DocumentStatus::Queued, RECOVERY_BATCH)
            .await?;
        let mut enqueued = 0;
        for doc in &queued {
            let reason = if interrupted.contains(&doc.id) || resumed.contains(&doc.id) {
                JobReason::Recovered
            } else {
                JobReason::Stale
            };
            if self.queue.enqueue(&doc.id, reason) {
                enqueued += 1;
            }
        }

        info!(
            interrupted = interrupted.len(),
            resumed = resumed.len(),
            queued = queued.len(),
            enqueued,
            "Startup recovery complete"
        );
        Ok(enqueued)
    }

    /// Wake due retries, re-enqueue stale queued documents and move on
    /// documents stuck between stages.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = self.retry.sweep(now).await?;
        for id in &report.woken {
            self.queue.enqueue(id, JobReason::RetryDue);
        }
        for id in &report.requeued {
            self.queue.enqueue(id, JobReason::Stale);
        }

        let stale_before = now
            - chrono::Duration::from_std(self.stale_after)
                .map_err(|e| FakturoError::Internal(format!("invalid stale interval: {e}")))?;
        for id in self
            .resume_stranded(stale_before, actor::RETRY_SCHEDULER)
            .await?
        {
            self.queue.enqueue(&id, JobReason::Recovered);
            report.resumed.push(id);
        }
        Ok(report)
    }

    /// Advance documents untouched since `before` in a stage nothing else
    /// will move them out of. Returns the ids that went back to `Queued`.
    async fn resume_stranded(&self, before: DateTime<Utc>, by: &str) -> Result<Vec<String>> {
        let mut requeued = Vec::new();
        for doc in self.db.list_stranded(before, RECOVERY_BATCH).await? {
            let moved = match doc.status {
                DocumentStatus::Uploaded => self
                    .db
                    .transition_status(&doc.id, DocumentStatus::Uploaded, DocumentStatus::Queued, None)
                    .await
                    .map(|ok| if ok { DocumentStatus::Queued } else { doc.status }),
                _ => self.review.resume(&doc).await,
            };
            let to = match moved {
                Ok(to) if to != doc.status => to,
                Ok(_) => continue,
                Err(e) => {
                    warn!(doc_id = %doc.id, status = %doc.status, error = %e, "Failed to resume stranded document");
                    continue;
                }
            };

            warn!(doc_id = %doc.id, from = %doc.status, to = %to, "Resumed stranded document");
            self.audit
                .record(
                    AuditEntry::new(&doc.id, AuditAction::DocumentRecovered, by)
                        .detail(json!({ "from": doc.status, "to": to })),
                )
                .await;
            if to == DocumentStatus::Queued {
                requeued.push(doc.id);
            }
        }
        Ok(requeued)
    }

    /// Flush to the remote primary when running as an embedded replica.
    pub async fn sync(&self) -> Result<()> {
        self.db.sync().await
    }

    async fn document(&self, document_id: &str) -> Result<Document> {
        self.db
            .get_document(document_id)
            .await?
            .ok_or_else(|| FakturoError::NotFound(format!("document {document_id}")))
    }
}
