mod common;

use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fakturo::config::DownstreamConfig;
use fakturo::models::{AuditAction, DocumentStatus, ReviewSubmission};
use fakturo::pipeline::Downstream;

use common::{invoice, output, test_config, Step, TestPipeline};

async fn pipeline_with_webhooks(server: &MockServer) -> TestPipeline {
    let downstream = Downstream::from_config(&DownstreamConfig {
        invoice_webhook_url: Some(format!("{}/invoices", server.uri())),
        review_webhook_url: Some(format!("{}/reviews", server.uri())),
        timeout_secs: 5,
    })
    .expect("valid downstream config");
    TestPipeline::with(test_config(), downstream).await
}

fn submission(reviewer: &str, corrections: &[(&str, &str)]) -> ReviewSubmission {
    ReviewSubmission {
        reviewer: reviewer.to_string(),
        corrections: corrections
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
        accuracy_rating: Some(0.5),
        notes: None,
        time_spent_secs: Some(40),
    }
}

#[tokio::test]
async fn accepted_result_is_posted_to_invoice_webhook() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/invoices"))
        .and(body_partial_json(json!({
            "overall_confidence": 0.95,
            "reviewed_by": null
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let mut t = pipeline_with_webhooks(&server).await;
    t.engine("e1", 10, vec![Step::Output(invoice(0.95))]).await;

    let id = t.upload_png("fv-100.png").await;
    t.run_next_job().await;

    assert_eq!(t.status(&id).await, DocumentStatus::Completed);
}

#[tokio::test]
async fn webhook_failure_routes_document_to_review() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/invoices"))
        .respond_with(ResponseTemplate::new(500).set_body_string("erp offline"))
        .mount(&server)
        .await;

    let mut t = pipeline_with_webhooks(&server).await;
    t.engine("e1", 10, vec![Step::Output(invoice(0.95))]).await;

    let id = t.upload_png("fv-101.png").await;
    t.run_next_job().await;

    let doc = t.pipeline.status(&id).await.unwrap().document;
    assert_eq!(doc.status, DocumentStatus::ManualReviewRequired);
    let reason = doc.review_reason.unwrap();
    assert!(reason.starts_with("invoice creation failed"));
    assert!(reason.contains("erp offline"));

    let actions: Vec<_> = t
        .pipeline
        .audit_trail(&id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert!(actions.contains(&AuditAction::IntegrationFailed));
    assert!(actions.contains(&AuditAction::ReviewQueued));
}

#[tokio::test]
async fn completed_review_forwards_corrections_and_notifies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/invoices"))
        .and(body_partial_json(json!({
            "reviewed_by": "anna",
            "fields": { "gross_total": { "value": "1230.00", "confidence": 1.0 } }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/reviews"))
        .and(body_partial_json(json!({
            "reviewer": "anna",
            "corrected_fields": ["gross_total"]
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut t = pipeline_with_webhooks(&server).await;
    t.engine(
        "e1",
        10,
        vec![Step::Output(output(
            &[
                ("invoice_number", "FV/9", 0.6),
                ("issue_date", "2024-05-05", 0.6),
                ("gross_total", "1.23", 0.6),
            ],
            0.6,
        ))],
    )
    .await;

    let id = t.upload_png("fv-102.png").await;
    t.run_next_job().await;
    assert_eq!(t.status(&id).await, DocumentStatus::ManualReviewRequired);

    let feedback = t
        .pipeline
        .complete_review(&id, submission("anna", &[("gross_total", "1230.00")]))
        .await
        .unwrap();
    assert_eq!(feedback.reviewer, "anna");
    assert!(feedback.result_id.is_some());

    let doc = t.pipeline.status(&id).await.unwrap().document;
    assert_eq!(doc.status, DocumentStatus::Completed);
    assert_eq!(doc.review_completed_by.as_deref(), Some("anna"));
    assert!(t.pipeline.review_queue(10).await.unwrap().is_empty());

    let engine = t
        .pipeline
        .engines()
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.name == "e1")
        .unwrap();
    assert_eq!(engine.stats.documents_processed, 1);
    assert_eq!(engine.stats.reviews_count, 1);
    assert_eq!(engine.stats.avg_review_accuracy, Some(0.5));
}

#[tokio::test]
async fn second_review_completion_conflicts() {
    let mut t = TestPipeline::new().await;
    t.engine("e1", 10, vec![Step::Output(invoice(0.3))]).await;

    let id = t.upload_png("fv-103.png").await;
    t.run_next_job().await;

    // 0.3 is under the preprocessing threshold: the first cycle schedules a
    // preprocessing retry rather than a review.
    assert_eq!(t.status(&id).await, DocumentStatus::RetryScheduled);
    t.pipeline
        .sweep(chrono::Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    t.run_next_job().await;
    assert_eq!(t.status(&id).await, DocumentStatus::ManualReviewRequired);

    t.pipeline
        .complete_review(&id, submission("anna", &[]))
        .await
        .unwrap();
    let err = t
        .pipeline
        .complete_review(&id, submission("bob", &[]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not awaiting review"));
}
