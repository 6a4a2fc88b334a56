use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::config::{PipelineConfig, RetryConfig};
use crate::db::DatabaseBackend;
use crate::error::{FakturoError, Result};
use crate::models::{AuditAction, AuditEntry, Document, DocumentStatus, RetryStrategy};

use super::audit::{actor, AuditLog};
use super::orchestrator::CycleOutcome;
use super::review::ReviewRouter;

const SWEEP_BATCH: u32 = 100;

/// Retry budget and backoff shape.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failures on one engine before switching engines.
    pub escalate_after: u32,
    /// Results under this confidence earn one preprocessing retry.
    pub preprocessing_retry_threshold: f64,
}

impl RetryPolicy {
    pub fn from_config(retry: &RetryConfig, pipeline: &PipelineConfig) -> Self {
        Self {
            max_retries: retry.max_retries,
            base_delay: Duration::from_secs(retry.base_delay_secs),
            max_delay: Duration::from_secs(retry.max_delay_secs),
            escalate_after: retry.escalate_after.max(1),
            preprocessing_retry_threshold: pipeline.preprocessing_retry_threshold,
        }
    }

    /// `base * 2^retry_count`, capped at `max_delay`.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Pure retry decision for a failed cycle.
    pub fn decide(&self, doc: &Document, failure: &FailureKind) -> RetryDecision {
        if doc.retry_count >= self.max_retries {
            let detail = format!(
                "retries exhausted after {} attempts: {}",
                doc.retry_count,
                failure.describe()
            );
            return match failure {
                FailureKind::LowConfidence { .. } => RetryDecision::ForceReview {
                    reason: detail,
                    exhausted: true,
                },
                _ => RetryDecision::Fail { error: detail },
            };
        }

        let delay = self.backoff_delay(doc.retry_count);
        match failure {
            FailureKind::Timeout { engine, .. } | FailureKind::Errored { engine, .. } => {
                let consecutive_failures = if doc.retry_engine.as_deref() == Some(engine.as_str())
                    && doc.retry_strategy == Some(RetryStrategy::SameEngine)
                {
                    doc.consecutive_failures + 1
                } else {
                    1
                };
                let strategy = if consecutive_failures >= self.escalate_after {
                    RetryStrategy::DifferentEngine
                } else {
                    RetryStrategy::SameEngine
                };
                RetryDecision::Retry {
                    strategy,
                    engine: Some(engine.clone()),
                    consecutive_failures,
                    delay,
                }
            }
            FailureKind::Unavailable { engine, .. } => RetryDecision::Retry {
                strategy: RetryStrategy::DifferentEngine,
                engine: Some(engine.clone()),
                consecutive_failures: 0,
                delay,
            },
            FailureKind::LowConfidence { confidence } => {
                if doc.preprocessing_used {
                    RetryDecision::ForceReview {
                        reason: format!(
                            "confidence {confidence:.2} remained low after preprocessing"
                        ),
                        exhausted: false,
                    }
                } else {
                    RetryDecision::Retry {
                        strategy: RetryStrategy::WithPreprocessing,
                        engine: None,
                        consecutive_failures: 0,
                        delay,
                    }
                }
            }
        }
    }
}

/// Why a processing cycle ended without a usable result.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureKind {
    /// An engine call hit its timeout. The cycle stops at that engine.
    Timeout { engine: String, error: String },
    /// Every planned engine errored; `engine` is the first one tried.
    Errored { engine: String, error: String },
    /// Every planned engine was unavailable; `engine` is the first one tried.
    Unavailable { engine: String, error: String },
    /// Engines ran but nothing cleared the preprocessing threshold.
    LowConfidence { confidence: f64 },
}

impl FailureKind {
    pub fn describe(&self) -> String {
        match self {
            Self::Timeout { error, .. }
            | Self::Errored { error, .. }
            | Self::Unavailable { error, .. } => error.clone(),
            Self::LowConfidence { confidence } => {
                format!("no usable output (best confidence {confidence:.2})")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Retry {
        strategy: RetryStrategy,
        /// Engine to repeat (`same-engine`) or to avoid (`different-engine`).
        engine: Option<String>,
        consecutive_failures: u32,
        delay: Duration,
    },
    ForceReview {
        reason: String,
        exhausted: bool,
    },
    Fail {
        error: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// `RetryScheduled -> Queued` transitions made by this sweep.
    pub woken: Vec<String>,
    /// Queued documents untouched for too long.
    pub requeued: Vec<String>,
    /// Documents moved back to `Queued` after being stuck in `Uploaded`.
    pub resumed: Vec<String>,
}

/// Applies retry decisions and wakes documents whose retry time has come.
/// Never sleeps: delays are stored as `next_retry_at` and picked up by
/// [`RetryScheduler::sweep`].
pub struct RetryScheduler {
    db: Arc<dyn DatabaseBackend>,
    policy: RetryPolicy,
    review: Arc<ReviewRouter>,
    audit: AuditLog,
    stale_after: Duration,
}

impl RetryScheduler {
    pub fn new(
        db: Arc<dyn DatabaseBackend>,
        policy: RetryPolicy,
        review: Arc<ReviewRouter>,
        audit: AuditLog,
        stale_after: Duration,
    ) -> Self {
        Self {
            db,
            policy,
            review,
            audit,
            stale_after,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Persist the outcome of a failed cycle for a document in `Processing`.
    pub async fn apply(&self, doc: &Document, failure: FailureKind) -> Result<CycleOutcome> {
        match self.policy.decide(doc, &failure) {
            RetryDecision::Retry {
                strategy,
                engine,
                consecutive_failures,
                delay,
            } => {
                let next_retry_at = Utc::now()
                    + chrono::Duration::from_std(delay)
                        .map_err(|e| FakturoError::Internal(format!("invalid retry delay: {e}")))?;

                let mut updated = doc.clone();
                updated.status = DocumentStatus::RetryScheduled;
                updated.retry_count += 1;
                updated.next_retry_at = Some(next_retry_at);
                updated.retry_strategy = Some(strategy);
                updated.retry_engine = engine.clone();
                updated.consecutive_failures = consecutive_failures;
                updated.preprocessing_used |= strategy == RetryStrategy::WithPreprocessing;
                updated.error_message = Some(failure.describe());

                if !self.db.save_document(&updated, doc.status).await? {
                    warn!(doc_id = %doc.id, "Document changed before retry could be scheduled");
                    return Ok(CycleOutcome::Cancelled);
                }

                info!(
                    doc_id = %doc.id,
                    strategy = %strategy,
                    retry_count = updated.retry_count,
                    delay_secs = delay.as_secs(),
                    "Retry scheduled"
                );
                self.audit
                    .record(
                        AuditEntry::new(&doc.id, AuditAction::RetryScheduled, actor::RETRY_SCHEDULER)
                            .detail(json!({
                                "strategy": strategy,
                                "engine": engine,
                                "retry_count": updated.retry_count,
                                "next_retry_at": next_retry_at,
                                "reason": failure.describe(),
                            })),
                    )
                    .await;

                Ok(CycleOutcome::RetryScheduled {
                    strategy,
                    next_retry_at,
                })
            }
            RetryDecision::ForceReview { reason, exhausted } => {
                if exhausted {
                    self.record_exhausted(doc, &reason).await;
                }
                if !self.review.force_review(doc, &reason).await? {
                    return Ok(CycleOutcome::Cancelled);
                }
                Ok(CycleOutcome::ForcedReview { reason })
            }
            RetryDecision::Fail { error } => {
                let mut updated = doc.clone();
                updated.status = DocumentStatus::Failed;
                updated.error_message = Some(error.clone());
                updated.clear_retry_plan();

                if !self.db.save_document(&updated, doc.status).await? {
                    return Ok(CycleOutcome::Cancelled);
                }

                self.record_exhausted(doc, &error).await;
                warn!(doc_id = %doc.id, error = %error, "Document failed");
                self.audit
                    .record(
                        AuditEntry::new(&doc.id, AuditAction::DocumentFailed, actor::RETRY_SCHEDULER)
                            .detail(json!({ "error": error })),
                    )
                    .await;
                Ok(CycleOutcome::Failed { error })
            }
        }
    }

    async fn record_exhausted(&self, doc: &Document, reason: &str) {
        self.audit
            .record(
                AuditEntry::new(&doc.id, AuditAction::RetriesExhausted, actor::RETRY_SCHEDULER)
                    .detail(json!({
                        "retry_count": doc.retry_count,
                        "max_retries": self.policy.max_retries,
                        "reason": reason,
                    })),
            )
            .await;
    }

    /// Wake due retries and collect queued documents nobody picked up.
    /// The caller enqueues the returned ids.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for doc in self.db.list_due_retries(now, SWEEP_BATCH).await? {
            let woken = self
                .db
                .transition_status(
                    &doc.id,
                    DocumentStatus::RetryScheduled,
                    DocumentStatus::Queued,
                    None,
                )
                .await?;
            if !woken {
                continue;
            }
            info!(doc_id = %doc.id, strategy = ?doc.retry_strategy, "Retry due; document queued");
            self.audit
                .record(
                    AuditEntry::new(&doc.id, AuditAction::RetryWoken, actor::RETRY_SCHEDULER)
                        .detail(json!({
                            "strategy": doc.retry_strategy,
                            "retry_count": doc.retry_count,
                        })),
                )
                .await;
            report.woken.push(doc.id);
        }

        let stale_before = now
            - chrono::Duration::from_std(self.stale_after)
                .map_err(|e| FakturoError::Internal(format!("invalid stale interval: {e}")))?;
        for doc in self.db.list_stale_queued(stale_before, SWEEP_BATCH).await? {
            if report.woken.contains(&doc.id) {
                continue;
            }
            self.db.touch_queued(&doc.id).await?;
            report.requeued.push(doc.id);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::{queued_document, review_router, test_backend};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(300),
            escalate_after: 2,
            preprocessing_retry_threshold: 0.45,
        }
    }

    fn doc() -> Document {
        let mut doc = Document::new("d".into(), "a.png".into(), "image/png".into(), 1);
        doc.status = DocumentStatus::Processing;
        doc
    }

    fn timeout(engine: &str) -> FailureKind {
        FailureKind::Timeout {
            engine: engine.to_string(),
            error: format!("{engine} timed out"),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff_delay(0), Duration::from_secs(30));
        assert_eq!(p.backoff_delay(1), Duration::from_secs(60));
        assert_eq!(p.backoff_delay(2), Duration::from_secs(120));
        assert_eq!(p.backoff_delay(4), Duration::from_secs(300));
        assert_eq!(p.backoff_delay(40), Duration::from_secs(300));
    }

    #[test]
    fn test_first_timeout_retries_same_engine() {
        let decision = policy().decide(&doc(), &timeout("e1"));
        assert_eq!(
            decision,
            RetryDecision::Retry {
                strategy: RetryStrategy::SameEngine,
                engine: Some("e1".into()),
                consecutive_failures: 1,
                delay: Duration::from_secs(30),
            }
        );
    }

    #[test]
    fn test_second_consecutive_timeout_escalates() {
        let mut d = doc();
        d.retry_count = 1;
        d.retry_engine = Some("e1".into());
        d.retry_strategy = Some(RetryStrategy::SameEngine);
        d.consecutive_failures = 1;

        match policy().decide(&d, &timeout("e1")) {
            RetryDecision::Retry {
                strategy, engine, ..
            } => {
                assert_eq!(strategy, RetryStrategy::DifferentEngine);
                assert_eq!(engine.as_deref(), Some("e1"));
            }
            other => panic!("unexpected decision {other:?}"),
        }

        // A timeout on another engine starts a fresh count.
        match policy().decide(&d, &timeout("e2")) {
            RetryDecision::Retry {
                strategy,
                consecutive_failures,
                ..
            } => {
                assert_eq!(strategy, RetryStrategy::SameEngine);
                assert_eq!(consecutive_failures, 1);
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[test]
    fn test_unavailable_switches_engine() {
        let failure = FailureKind::Unavailable {
            engine: "e1".into(),
            error: "down".into(),
        };
        match policy().decide(&doc(), &failure) {
            RetryDecision::Retry { strategy, .. } => {
                assert_eq!(strategy, RetryStrategy::DifferentEngine)
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[test]
    fn test_low_confidence_gets_one_preprocessing_retry() {
        let low = FailureKind::LowConfidence { confidence: 0.2 };
        let mut d = doc();
        assert!(matches!(
            policy().decide(&d, &low),
            RetryDecision::Retry {
                strategy: RetryStrategy::WithPreprocessing,
                ..
            }
        ));

        d.preprocessing_used = true;
        assert!(matches!(
            policy().decide(&d, &low),
            RetryDecision::ForceReview {
                exhausted: false,
                ..
            }
        ));
    }

    #[test]
    fn test_exhausted_budget_is_terminal() {
        let mut d = doc();
        d.retry_count = 3;
        assert!(matches!(
            policy().decide(&d, &timeout("e1")),
            RetryDecision::Fail { .. }
        ));
        assert!(matches!(
            policy().decide(&d, &FailureKind::LowConfidence { confidence: 0.1 }),
            RetryDecision::ForceReview { exhausted: true, .. }
        ));
    }

    async fn processing_document(db: &Arc<dyn DatabaseBackend>, id: &str) -> Document {
        let mut doc = queued_document(db, id).await;
        assert!(db.claim_document(id).await.unwrap());
        doc.status = DocumentStatus::Processing;
        doc
    }

    fn scheduler(db: Arc<dyn DatabaseBackend>) -> RetryScheduler {
        RetryScheduler::new(
            db.clone(),
            policy(),
            review_router(db.clone()),
            AuditLog::new(db),
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn test_apply_schedules_and_sweep_wakes() {
        let (_dir, db) = test_backend().await;
        let doc = processing_document(&db, "doc-1").await;
        let scheduler = scheduler(db.clone());

        let outcome = scheduler.apply(&doc, timeout("e1")).await.unwrap();
        let next_retry_at = match outcome {
            CycleOutcome::RetryScheduled {
                strategy,
                next_retry_at,
            } => {
                assert_eq!(strategy, RetryStrategy::SameEngine);
                next_retry_at
            }
            other => panic!("unexpected outcome {other:?}"),
        };

        let stored = db.get_document("doc-1").await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::RetryScheduled);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.retry_engine.as_deref(), Some("e1"));

        let early = scheduler.sweep(Utc::now()).await.unwrap();
        assert!(early.woken.is_empty());

        let report = scheduler
            .sweep(next_retry_at + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(report.woken, vec!["doc-1".to_string()]);
        let stored = db.get_document("doc-1").await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Queued);
        assert_eq!(stored.retry_strategy, Some(RetryStrategy::SameEngine));
    }

    #[tokio::test]
    async fn test_apply_fails_when_budget_is_spent() {
        let (_dir, db) = test_backend().await;
        let mut doc = processing_document(&db, "doc-1").await;
        doc.retry_count = 3;
        let scheduler = scheduler(db.clone());

        let outcome = scheduler.apply(&doc, timeout("e1")).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Failed { .. }));

        let stored = db.get_document("doc-1").await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Failed);
        assert!(stored.error_message.unwrap().contains("e1 timed out"));
        assert!(stored.next_retry_at.is_none());

        let actions: Vec<_> = db
            .list_audit("doc-1")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert!(actions.contains(&AuditAction::RetriesExhausted));
        assert!(actions.contains(&AuditAction::DocumentFailed));
    }

    #[tokio::test]
    async fn test_low_confidence_after_preprocessing_forces_review() {
        let (_dir, db) = test_backend().await;
        let mut doc = processing_document(&db, "doc-1").await;
        doc.preprocessing_used = true;
        let scheduler = scheduler(db.clone());

        let outcome = scheduler
            .apply(&doc, FailureKind::LowConfidence { confidence: 0.1 })
            .await
            .unwrap();
        assert!(matches!(outcome, CycleOutcome::ForcedReview { .. }));

        let stored = db.get_document("doc-1").await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::ManualReviewRequired);
        assert!(stored.review_queued_at.is_some());
    }

    #[tokio::test]
    async fn test_cancelled_document_is_not_rescheduled() {
        let (_dir, db) = test_backend().await;
        let doc = processing_document(&db, "doc-1").await;
        db.cancel_document("doc-1").await.unwrap();

        let outcome = scheduler(db.clone())
            .apply(&doc, timeout("e1"))
            .await
            .unwrap();
        assert!(matches!(outcome, CycleOutcome::Cancelled));
        let stored = db.get_document("doc-1").await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_sweep_requeues_stale_documents() {
        let (_dir, db) = test_backend().await;
        queued_document(&db, "doc-1").await;
        let scheduler = scheduler(db.clone());

        let report = scheduler
            .sweep(Utc::now() + chrono::Duration::seconds(600))
            .await
            .unwrap();
        assert_eq!(report.requeued, vec!["doc-1".to_string()]);
        assert!(report.woken.is_empty());
    }
}
