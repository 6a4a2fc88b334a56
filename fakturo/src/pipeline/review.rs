use std::sync::Arc;

use chrono::Utc;
use nanoid::nanoid;
use serde_json::json;
use tracing::{info, warn};
use validator::Validate;

use crate::config::PipelineConfig;
use crate::db::DatabaseBackend;
use crate::error::{FakturoError, Result};
use crate::models::{
    AuditAction, AuditEntry, Disposition, Document, DocumentStatus, FieldMap, FieldValue,
    OcrResult, ReviewFeedback, ReviewSubmission,
};

use super::audit::{actor, AuditLog};
use super::downstream::{Downstream, InvoicePayload, ReviewNotice};
use super::registry::EngineRegistry;

pub const REASON_LOW_CONFIDENCE: &str = "confidence below threshold";
pub const REASON_RESULT_MISSING: &str = "no active result after interrupted routing";
pub const REASON_INTEGRATION_INTERRUPTED: &str = "invoice creation interrupted";

#[derive(Debug, Clone)]
pub struct ReviewThresholds {
    pub acceptance_threshold: f64,
    pub critical_fields: Vec<String>,
    pub critical_field_min_confidence: f64,
}

impl ReviewThresholds {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            acceptance_threshold: config.acceptance_threshold,
            critical_fields: config.critical_fields.clone(),
            critical_field_min_confidence: config.critical_field_min_confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReviewDecision {
    Accept,
    Review { reason: String },
}

/// Gates results into the manual review queue and closes reviews.
pub struct ReviewRouter {
    db: Arc<dyn DatabaseBackend>,
    registry: Arc<EngineRegistry>,
    downstream: Downstream,
    audit: AuditLog,
    thresholds: ReviewThresholds,
}

impl ReviewRouter {
    pub fn new(
        db: Arc<dyn DatabaseBackend>,
        registry: Arc<EngineRegistry>,
        downstream: Downstream,
        audit: AuditLog,
        thresholds: ReviewThresholds,
    ) -> Self {
        Self {
            db,
            registry,
            downstream,
            audit,
            thresholds,
        }
    }

    pub fn evaluate(&self, result: &OcrResult) -> ReviewDecision {
        if result.overall_confidence < self.thresholds.acceptance_threshold {
            return ReviewDecision::Review {
                reason: REASON_LOW_CONFIDENCE.to_string(),
            };
        }

        let missing: Vec<&str> = self
            .thresholds
            .critical_fields
            .iter()
            .filter(|name| {
                result
                    .fields
                    .get(name.as_str())
                    .map_or(true, |f| f.value.trim().is_empty())
            })
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return ReviewDecision::Review {
                reason: format!("missing critical fields: {}", missing.join(", ")),
            };
        }

        let weak: Vec<&str> = self
            .thresholds
            .critical_fields
            .iter()
            .filter(|name| {
                result.fields.get(name.as_str()).is_some_and(|f| {
                    f.confidence < self.thresholds.critical_field_min_confidence
                })
            })
            .map(String::as_str)
            .collect();
        if !weak.is_empty() {
            return ReviewDecision::Review {
                reason: format!("low confidence on critical fields: {}", weak.join(", ")),
            };
        }

        ReviewDecision::Accept
    }

    /// Route a freshly completed result. `doc` must be in `OcrCompleted`.
    /// Returns the status the document ended up in.
    pub async fn route(&self, doc: &Document, result: OcrResult) -> Result<DocumentStatus> {
        match self.evaluate(&result) {
            ReviewDecision::Review { reason } => {
                self.db
                    .update_disposition(&result.id, Disposition::NeedsReview)
                    .await?;
                self.queue_for_review(doc, &reason, false).await
            }
            ReviewDecision::Accept => {
                self.db
                    .update_disposition(&result.id, Disposition::Accepted)
                    .await?;
                self.integrate(doc, &result).await
            }
        }
    }

    /// Pick up a document an interrupted `route` left behind. `OcrCompleted`
    /// is routed again from its active result; `IntegrationProcessing` goes
    /// to review, since the invoice may already have been delivered.
    pub async fn resume(&self, doc: &Document) -> Result<DocumentStatus> {
        match doc.status {
            DocumentStatus::OcrCompleted => match self.db.active_result(&doc.id).await? {
                Some(result) => self.route(doc, result).await,
                None => self.queue_for_review(doc, REASON_RESULT_MISSING, true).await,
            },
            DocumentStatus::IntegrationProcessing => {
                self.queue_for_review(doc, REASON_INTEGRATION_INTERRUPTED, true)
                    .await
            }
            other => Ok(other),
        }
    }

    async fn integrate(&self, doc: &Document, result: &OcrResult) -> Result<DocumentStatus> {
        if !self
            .db
            .transition_status(
                &doc.id,
                DocumentStatus::OcrCompleted,
                DocumentStatus::IntegrationProcessing,
                None,
            )
            .await?
        {
            return self.current_status(&doc.id).await;
        }
        info!(doc_id = %doc.id, confidence = result.overall_confidence, "Result accepted; creating invoice");

        let payload = InvoicePayload {
            document_id: doc.id.clone(),
            filename: doc.filename.clone(),
            result_id: Some(result.id.clone()),
            fields: result.fields.clone(),
            overall_confidence: Some(result.overall_confidence),
            reviewed_by: None,
        };

        match self.downstream.invoices.submit(&payload).await {
            Ok(()) => {
                self.audit
                    .record(
                        AuditEntry::new(&doc.id, AuditAction::IntegrationSubmitted, actor::REVIEW_ROUTER)
                            .detail(json!({ "result_id": result.id })),
                    )
                    .await;
                if !self
                    .db
                    .transition_status(
                        &doc.id,
                        DocumentStatus::IntegrationProcessing,
                        DocumentStatus::Completed,
                        None,
                    )
                    .await?
                {
                    return self.current_status(&doc.id).await;
                }
                info!(doc_id = %doc.id, "Document completed");
                self.audit
                    .record(AuditEntry::new(
                        &doc.id,
                        AuditAction::DocumentCompleted,
                        actor::REVIEW_ROUTER,
                    ))
                    .await;
                Ok(DocumentStatus::Completed)
            }
            Err(e) => {
                warn!(doc_id = %doc.id, error = %e, "Invoice creation failed; routing to review");
                self.audit
                    .record(
                        AuditEntry::new(&doc.id, AuditAction::IntegrationFailed, actor::REVIEW_ROUTER)
                            .detail(json!({ "error": e.to_string() })),
                    )
                    .await;
                let mut current = doc.clone();
                current.status = DocumentStatus::IntegrationProcessing;
                self.queue_for_review(&current, &format!("invoice creation failed: {e}"), false)
                    .await
            }
        }
    }

    /// Put a document in `Processing` straight into the review queue.
    /// False when the document changed underneath (e.g. cancelled).
    pub async fn force_review(&self, doc: &Document, reason: &str) -> Result<bool> {
        let status = self.queue_for_review(doc, reason, true).await?;
        Ok(status == DocumentStatus::ManualReviewRequired)
    }

    async fn queue_for_review(
        &self,
        doc: &Document,
        reason: &str,
        forced: bool,
    ) -> Result<DocumentStatus> {
        let mut updated = doc.clone();
        updated.status = DocumentStatus::ManualReviewRequired;
        updated.review_reason = Some(reason.to_string());
        updated.review_queued_at = Some(Utc::now());
        updated.clear_retry_plan();

        if !self.db.save_document(&updated, doc.status).await? {
            return self.current_status(&doc.id).await;
        }

        info!(doc_id = %doc.id, reason = %reason, forced, "Document queued for manual review");
        self.audit
            .record(
                AuditEntry::new(&doc.id, AuditAction::ReviewQueued, actor::REVIEW_ROUTER)
                    .detail(json!({ "reason": reason, "forced": forced })),
            )
            .await;
        Ok(DocumentStatus::ManualReviewRequired)
    }

    /// Record a reviewer's corrections and close the document.
    /// Does not re-run OCR.
    pub async fn complete_review(
        &self,
        document_id: &str,
        submission: ReviewSubmission,
    ) -> Result<ReviewFeedback> {
        submission
            .validate()
            .map_err(|e| FakturoError::Validation(e.to_string()))?;

        let doc = self
            .db
            .get_document(document_id)
            .await?
            .ok_or_else(|| FakturoError::NotFound(format!("document {document_id}")))?;
        if doc.status != DocumentStatus::ManualReviewRequired {
            return Err(FakturoError::Conflict(format!(
                "document {document_id} is {} and not awaiting review",
                doc.status
            )));
        }

        let result = self.db.active_result(document_id).await?;
        let feedback = ReviewFeedback {
            id: nanoid!(),
            document_id: document_id.to_string(),
            result_id: result.as_ref().map(|r| r.id.clone()),
            reviewer: submission.reviewer.clone(),
            corrections: submission.corrections.clone(),
            accuracy_rating: submission.accuracy_rating,
            notes: submission.notes.clone(),
            time_spent_secs: submission.time_spent_secs,
            created_at: Utc::now(),
        };
        if !self.db.complete_review(&feedback).await? {
            return Err(FakturoError::Conflict(format!(
                "document {document_id} changed while the review was being completed"
            )));
        }

        if let Some(result) = &result {
            for engine in &result.engines {
                self.registry
                    .record_feedback(engine, submission.accuracy_rating)
                    .await;
            }
        }

        info!(doc_id = %document_id, reviewer = %submission.reviewer, "Review completed");
        self.audit
            .record(
                AuditEntry::new(document_id, AuditAction::ReviewCompleted, &submission.reviewer)
                    .detail(json!({
                        "feedback_id": feedback.id,
                        "corrections": submission.corrections.len(),
                        "accuracy_rating": submission.accuracy_rating,
                    })),
            )
            .await;

        self.forward(&doc, result.as_ref(), &feedback).await;
        Ok(feedback)
    }

    /// Hand corrected fields downstream. The review is already closed, so
    /// failures are logged and audited only.
    async fn forward(&self, doc: &Document, result: Option<&OcrResult>, feedback: &ReviewFeedback) {
        let mut fields: FieldMap = result.map(|r| r.fields.clone()).unwrap_or_default();
        for (name, value) in &feedback.corrections {
            fields.insert(name.clone(), FieldValue::new(value.clone(), 1.0));
        }

        let payload = InvoicePayload {
            document_id: doc.id.clone(),
            filename: doc.filename.clone(),
            result_id: result.map(|r| r.id.clone()),
            fields,
            overall_confidence: result.map(|r| r.overall_confidence),
            reviewed_by: Some(feedback.reviewer.clone()),
        };
        match self.downstream.invoices.submit(&payload).await {
            Ok(()) => {
                self.audit
                    .record(
                        AuditEntry::new(&doc.id, AuditAction::IntegrationSubmitted, actor::REVIEW_ROUTER)
                            .detail(json!({ "reviewed_by": feedback.reviewer })),
                    )
                    .await
            }
            Err(e) => {
                warn!(doc_id = %doc.id, error = %e, "Failed to forward reviewed invoice");
                self.audit
                    .record(
                        AuditEntry::new(&doc.id, AuditAction::IntegrationFailed, actor::REVIEW_ROUTER)
                            .detail(json!({ "error": e.to_string(), "reviewed_by": feedback.reviewer })),
                    )
                    .await
            }
        }

        let notice = ReviewNotice {
            document_id: doc.id.clone(),
            reviewer: feedback.reviewer.clone(),
            corrected_fields: feedback.corrections.keys().cloned().collect(),
            accuracy_rating: feedback.accuracy_rating,
            completed_at: feedback.created_at,
        };
        if let Err(e) = self.downstream.reviews.review_completed(&notice).await {
            warn!(doc_id = %doc.id, error = %e, "Failed to send review notification");
        }
    }

    /// Oldest first.
    pub async fn review_queue(&self, limit: u32) -> Result<Vec<Document>> {
        self.db
            .list_by_status(DocumentStatus::ManualReviewRequired, limit)
            .await
    }

    async fn current_status(&self, document_id: &str) -> Result<DocumentStatus> {
        let doc = self
            .db
            .get_document(document_id)
            .await?
            .ok_or_else(|| FakturoError::NotFound(format!("document {document_id}")))?;
        Ok(doc.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::downstream::{InvoiceSink, ReviewNotifier};
    use crate::pipeline::test_support::{defaults, queued_document, test_backend, ScriptedEngine};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        payloads: Mutex<Vec<InvoicePayload>>,
        notices: Mutex<Vec<ReviewNotice>>,
        fail: bool,
    }

    #[async_trait]
    impl InvoiceSink for Recorder {
        async fn submit(&self, payload: &InvoicePayload) -> Result<()> {
            if self.fail {
                return Err(FakturoError::Downstream("erp offline".into()));
            }
            self.payloads.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl ReviewNotifier for Recorder {
        async fn review_completed(&self, notice: &ReviewNotice) -> Result<()> {
            self.notices.lock().unwrap().push(notice.clone());
            Ok(())
        }
    }

    fn thresholds() -> ReviewThresholds {
        ReviewThresholds {
            acceptance_threshold: 0.8,
            critical_fields: vec!["invoice_number".into(), "gross_total".into()],
            critical_field_min_confidence: 0.5,
        }
    }

    fn result(doc_id: &str, fields: &[(&str, f64)], overall: f64) -> OcrResult {
        let fields: FieldMap = fields
            .iter()
            .map(|(n, c)| (n.to_string(), FieldValue::new("v", *c)))
            .collect();
        OcrResult::new(doc_id, "text".into(), fields, overall, vec!["e1".into()], false)
    }

    async fn setup(
        fail: bool,
    ) -> (
        tempfile::TempDir,
        Arc<dyn DatabaseBackend>,
        ReviewRouter,
        Arc<Recorder>,
    ) {
        let (dir, db) = test_backend().await;
        let registry = Arc::new(EngineRegistry::new(db.clone(), 0.5));
        registry
            .register(ScriptedEngine::new("e1", vec![]), defaults(1))
            .await
            .unwrap();
        let recorder = Arc::new(Recorder {
            fail,
            ..Default::default()
        });
        let downstream = Downstream {
            invoices: recorder.clone(),
            reviews: recorder.clone(),
        };
        let router = ReviewRouter::new(
            db.clone(),
            registry,
            downstream,
            AuditLog::new(db.clone()),
            thresholds(),
        );
        (dir, db, router, recorder)
    }

    async fn ocr_completed(db: &Arc<dyn DatabaseBackend>, id: &str, result: &OcrResult) -> Document {
        let mut doc = queued_document(db, id).await;
        db.claim_document(id).await.unwrap();
        db.transition_status(id, DocumentStatus::Processing, DocumentStatus::OcrCompleted, None)
            .await
            .unwrap();
        db.save_result(result).await.unwrap();
        doc.status = DocumentStatus::OcrCompleted;
        doc
    }

    #[tokio::test]
    async fn test_evaluate_reasons() {
        let (_dir, _db, router, _) = setup(false).await;

        assert_eq!(
            router.evaluate(&result("d", &[("invoice_number", 0.4)], 0.5)),
            ReviewDecision::Review {
                reason: "confidence below threshold".into()
            }
        );
        assert_eq!(
            router.evaluate(&result("d", &[("invoice_number", 0.9)], 0.9)),
            ReviewDecision::Review {
                reason: "missing critical fields: gross_total".into()
            }
        );
        assert_eq!(
            router.evaluate(&result("d", &[("invoice_number", 0.95), ("gross_total", 0.3)], 0.85)),
            ReviewDecision::Review {
                reason: "low confidence on critical fields: gross_total".into()
            }
        );
        assert_eq!(
            router.evaluate(&result("d", &[("invoice_number", 0.9), ("gross_total", 0.9)], 0.9)),
            ReviewDecision::Accept
        );
    }

    #[tokio::test]
    async fn test_accepted_result_completes_document() {
        let (_dir, db, router, recorder) = setup(false).await;
        let res = result("doc-1", &[("invoice_number", 0.9), ("gross_total", 0.9)], 0.9);
        let doc = ocr_completed(&db, "doc-1", &res).await;

        let status = router.route(&doc, res.clone()).await.unwrap();
        assert_eq!(status, DocumentStatus::Completed);
        assert_eq!(recorder.payloads.lock().unwrap().len(), 1);

        let active = db.active_result("doc-1").await.unwrap().unwrap();
        assert_eq!(active.disposition, Disposition::Accepted);
    }

    #[tokio::test]
    async fn test_low_confidence_goes_to_review() {
        let (_dir, db, router, recorder) = setup(false).await;
        let res = result("doc-1", &[("invoice_number", 0.4)], 0.5);
        let doc = ocr_completed(&db, "doc-1", &res).await;

        let status = router.route(&doc, res).await.unwrap();
        assert_eq!(status, DocumentStatus::ManualReviewRequired);
        assert!(recorder.payloads.lock().unwrap().is_empty());

        let stored = db.get_document("doc-1").await.unwrap().unwrap();
        assert_eq!(stored.review_reason.as_deref(), Some("confidence below threshold"));
        assert!(stored.review_queued_at.is_some());

        let queue = router.review_queue(10).await.unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_downstream_failure_routes_to_review() {
        let (_dir, db, router, _) = setup(true).await;
        let res = result("doc-1", &[("invoice_number", 0.9), ("gross_total", 0.9)], 0.9);
        let doc = ocr_completed(&db, "doc-1", &res).await;

        let status = router.route(&doc, res).await.unwrap();
        assert_eq!(status, DocumentStatus::ManualReviewRequired);
        let stored = db.get_document("doc-1").await.unwrap().unwrap();
        assert!(stored.review_reason.unwrap().contains("erp offline"));
    }

    #[tokio::test]
    async fn test_resume_reroutes_ocr_completed_from_active_result() {
        let (_dir, db, router, recorder) = setup(false).await;
        let res = result("doc-1", &[("invoice_number", 0.9), ("gross_total", 0.9)], 0.9);
        let doc = ocr_completed(&db, "doc-1", &res).await;

        let status = router.resume(&doc).await.unwrap();
        assert_eq!(status, DocumentStatus::Completed);
        assert_eq!(recorder.payloads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resume_without_result_or_mid_integration_goes_to_review() {
        let (_dir, db, router, recorder) = setup(false).await;

        let mut orphan = queued_document(&db, "doc-1").await;
        db.claim_document("doc-1").await.unwrap();
        db.transition_status("doc-1", DocumentStatus::Processing, DocumentStatus::OcrCompleted, None)
            .await
            .unwrap();
        orphan.status = DocumentStatus::OcrCompleted;
        assert_eq!(
            router.resume(&orphan).await.unwrap(),
            DocumentStatus::ManualReviewRequired
        );

        let res = result("doc-2", &[("invoice_number", 0.9), ("gross_total", 0.9)], 0.9);
        let mut submitting = ocr_completed(&db, "doc-2", &res).await;
        db.transition_status(
            "doc-2",
            DocumentStatus::OcrCompleted,
            DocumentStatus::IntegrationProcessing,
            None,
        )
        .await
        .unwrap();
        submitting.status = DocumentStatus::IntegrationProcessing;
        assert_eq!(
            router.resume(&submitting).await.unwrap(),
            DocumentStatus::ManualReviewRequired
        );
        assert!(recorder.payloads.lock().unwrap().is_empty());

        let stored = db.get_document("doc-2").await.unwrap().unwrap();
        assert_eq!(stored.review_reason.as_deref(), Some(REASON_INTEGRATION_INTERRUPTED));
        let stored = db.get_document("doc-1").await.unwrap().unwrap();
        assert_eq!(stored.review_reason.as_deref(), Some(REASON_RESULT_MISSING));
    }

    #[tokio::test]
    async fn test_complete_review_records_feedback_and_forwards() {
        let (_dir, db, router, recorder) = setup(false).await;
        let res = result("doc-1", &[("invoice_number", 0.4)], 0.5);
        let doc = ocr_completed(&db, "doc-1", &res).await;
        router.route(&doc, res.clone()).await.unwrap();

        let mut corrections = BTreeMap::new();
        corrections.insert("gross_total".to_string(), "123.00".to_string());
        let feedback = router
            .complete_review(
                "doc-1",
                ReviewSubmission {
                    reviewer: "anna".into(),
                    corrections,
                    accuracy_rating: Some(0.6),
                    notes: Some("total was smudged".into()),
                    time_spent_secs: Some(45),
                },
            )
            .await
            .unwrap();
        assert_eq!(feedback.result_id.as_deref(), Some(res.id.as_str()));

        let stored = db.get_document("doc-1").await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Completed);
        assert_eq!(stored.review_completed_by.as_deref(), Some("anna"));
        assert!(stored.review_completed_at.is_some());

        let payloads = recorder.payloads.lock().unwrap();
        assert_eq!(payloads[0].fields["gross_total"].value, "123.00");
        assert_eq!(payloads[0].reviewed_by.as_deref(), Some("anna"));
        assert_eq!(recorder.notices.lock().unwrap().len(), 1);

        let engine = db.get_engine("e1").await.unwrap().unwrap();
        assert_eq!(engine.stats.reviews_count, 1);
        assert_eq!(engine.stats.avg_review_accuracy, Some(0.6));

        assert_eq!(db.list_feedback("doc-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_completions_store_one_feedback() {
        let (_dir, db, router, recorder) = setup(false).await;
        let res = result("doc-1", &[("invoice_number", 0.4)], 0.5);
        let doc = ocr_completed(&db, "doc-1", &res).await;
        router.route(&doc, res).await.unwrap();

        let submission = |reviewer: &str| ReviewSubmission {
            reviewer: reviewer.into(),
            corrections: BTreeMap::new(),
            accuracy_rating: Some(0.9),
            notes: None,
            time_spent_secs: None,
        };
        let (first, second) = tokio::join!(
            router.complete_review("doc-1", submission("anna")),
            router.complete_review("doc-1", submission("bob")),
        );
        assert_eq!(first.is_ok() as u8 + second.is_ok() as u8, 1);

        let feedback = db.list_feedback("doc-1").await.unwrap();
        assert_eq!(feedback.len(), 1);
        let stored = db.get_document("doc-1").await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Completed);
        assert_eq!(stored.review_completed_by, Some(feedback[0].reviewer.clone()));
        assert_eq!(recorder.payloads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_review_leaves_no_feedback() {
        let (_dir, db, router, _) = setup(false).await;
        let res = result("doc-1", &[("invoice_number", 0.4)], 0.5);
        let doc = ocr_completed(&db, "doc-1", &res).await;
        router.route(&doc, res).await.unwrap();
        assert!(db.cancel_document("doc-1").await.unwrap());

        let err = router
            .complete_review(
                "doc-1",
                ReviewSubmission {
                    reviewer: "anna".into(),
                    corrections: BTreeMap::new(),
                    accuracy_rating: None,
                    notes: None,
                    time_spent_secs: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FakturoError::Conflict(_)));
        assert!(db.list_feedback("doc-1").await.unwrap().is_empty());
        let active = db.active_result("doc-1").await.unwrap().unwrap();
        assert_eq!(active.disposition, Disposition::NeedsReview);
    }

    #[tokio::test]
    async fn test_complete_review_requires_review_state() {
        let (_dir, db, router, _) = setup(false).await;
        queued_document(&db, "doc-1").await;

        let submission = ReviewSubmission {
            reviewer: "anna".into(),
            corrections: BTreeMap::new(),
            accuracy_rating: None,
            notes: None,
            time_spent_secs: None,
        };
        let err = router
            .complete_review("doc-1", submission.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, FakturoError::Conflict(_)));

        let err = router.complete_review("missing", submission).await.unwrap_err();
        assert!(matches!(err, FakturoError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_submission_is_rejected() {
        let (_dir, _db, router, _) = setup(false).await;
        let submission = ReviewSubmission {
            reviewer: String::new(),
            corrections: BTreeMap::new(),
            accuracy_rating: Some(2.0),
            notes: None,
            time_spent_secs: None,
        };
        let err = router.complete_review("doc-1", submission).await.unwrap_err();
        assert!(matches!(err, FakturoError::Validation(_)));
    }
}
