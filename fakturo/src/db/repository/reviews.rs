use std::collections::BTreeMap;

use libsql::{params, Connection};

use crate::error::Result;
use crate::models::{Disposition, DocumentStatus, ReviewFeedback};

use super::parse_timestamp;

pub struct ReviewRepository;

impl ReviewRepository {
    pub async fn create(conn: &Connection, feedback: &ReviewFeedback) -> Result<()> {
        let corrections_json = serde_json::to_string(&feedback.corrections)?;

        conn.execute(
            r#"
            INSERT INTO review_feedback (
                id, document_id, result_id, reviewer, corrections, accuracy_rating,
                notes, time_spent_secs, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                feedback.id.clone(),
                feedback.document_id.clone(),
                feedback.result_id.clone(),
                feedback.reviewer.clone(),
                corrections_json,
                feedback.accuracy_rating,
                feedback.notes.clone(),
                feedback.time_spent_secs,
                feedback.created_at.to_rfc3339()
            ],
        )
        .await?;

        Ok(())
    }

    /// Close a review in one transaction: the document moves from
    /// `manual_review_required` to `completed`, the feedback row is written
    /// and the reviewed result is marked accepted. Returns false, writing
    /// nothing, when the document is no longer awaiting review.
    pub async fn complete(conn: &Connection, feedback: &ReviewFeedback) -> Result<bool> {
        let tx = conn.transaction().await?;

        let completed_at = feedback.created_at.to_rfc3339();
        let affected = tx
            .execute(
                "UPDATE documents
                 SET status = ?3, review_completed_at = ?4, review_completed_by = ?5, updated_at = ?4
                 WHERE id = ?1 AND status = ?2",
                params![
                    feedback.document_id.clone(),
                    DocumentStatus::ManualReviewRequired.to_string(),
                    DocumentStatus::Completed.to_string(),
                    completed_at,
                    feedback.reviewer.clone()
                ],
            )
            .await?;
        if affected == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::create(&tx, feedback).await?;

        if let Some(result_id) = &feedback.result_id {
            tx.execute(
                "UPDATE ocr_results SET disposition = ?2 WHERE id = ?1",
                params![result_id.clone(), Disposition::Accepted.to_string()],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    pub async fn list_for_document(
        conn: &Connection,
        document_id: &str,
    ) -> Result<Vec<ReviewFeedback>> {
        let mut rows = conn
            .query(
                r#"
                SELECT id, document_id, result_id, reviewer, corrections, accuracy_rating,
                       notes, time_spent_secs, created_at
                FROM review_feedback
                WHERE document_id = ?1
                ORDER BY created_at ASC
                "#,
                params![document_id],
            )
            .await?;

        let mut feedback = Vec::new();
        while let Some(row) = rows.next().await? {
            let corrections: BTreeMap<String, String> =
                serde_json::from_str(&row.get::<String>(4)?).unwrap_or_default();
            feedback.push(ReviewFeedback {
                id: row.get(0)?,
                document_id: row.get(1)?,
                result_id: row.get(2)?,
                reviewer: row.get(3)?,
                corrections,
                accuracy_rating: row.get(5)?,
                notes: row.get(6)?,
                time_spent_secs: row.get(7)?,
                created_at: parse_timestamp(&row.get::<String>(8)?),
            });
        }
        Ok(feedback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::{setup_test_db, DocumentRepository};
    use crate::models::Document;
    use chrono::Utc;

    fn feedback(id: &str, document_id: &str) -> ReviewFeedback {
        ReviewFeedback {
            id: id.to_string(),
            document_id: document_id.to_string(),
            result_id: None,
            reviewer: "anna".to_string(),
            corrections: BTreeMap::new(),
            accuracy_rating: Some(0.8),
            notes: None,
            time_spent_secs: None,
            created_at: Utc::now(),
        }
    }

    async fn document_in(conn: &Connection, id: &str, status: DocumentStatus) {
        let mut doc = Document::new(id.into(), format!("{id}.png"), "image/png".into(), 10);
        doc.status = status;
        DocumentRepository::create(conn, &doc, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_feedback_round_trip() {
        let conn = setup_test_db().await;
        let mut corrections = BTreeMap::new();
        corrections.insert("gross_total".to_string(), "123.00".to_string());

        let feedback = ReviewFeedback {
            id: "f1".to_string(),
            document_id: "d1".to_string(),
            result_id: None,
            reviewer: "anna".to_string(),
            corrections,
            accuracy_rating: Some(0.5),
            notes: Some("blurred total".to_string()),
            time_spent_secs: Some(75),
            created_at: Utc::now(),
        };
        ReviewRepository::create(&conn, &feedback).await.unwrap();

        let stored = ReviewRepository::list_for_document(&conn, "d1")
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].corrections["gross_total"], "123.00");
        assert_eq!(stored[0].time_spent_secs, Some(75));
    }

    #[tokio::test]
    async fn test_complete_closes_document_and_stores_feedback_together() {
        let conn = setup_test_db().await;
        document_in(&conn, "d1", DocumentStatus::ManualReviewRequired).await;

        assert!(ReviewRepository::complete(&conn, &feedback("f1", "d1"))
            .await
            .unwrap());

        let doc = DocumentRepository::get_by_id(&conn, "d1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(doc.review_completed_by.as_deref(), Some("anna"));
        assert!(doc.review_completed_at.is_some());
        assert_eq!(
            ReviewRepository::list_for_document(&conn, "d1")
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_complete_writes_nothing_when_not_awaiting_review() {
        let conn = setup_test_db().await;
        document_in(&conn, "d1", DocumentStatus::Completed).await;
        document_in(&conn, "d2", DocumentStatus::Cancelled).await;

        assert!(!ReviewRepository::complete(&conn, &feedback("f1", "d1"))
            .await
            .unwrap());
        assert!(!ReviewRepository::complete(&conn, &feedback("f2", "d2"))
            .await
            .unwrap());

        for id in ["d1", "d2"] {
            assert!(ReviewRepository::list_for_document(&conn, id)
                .await
                .unwrap()
                .is_empty());
        }
        let doc = DocumentRepository::get_by_id(&conn, "d2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Cancelled);
        assert!(doc.review_completed_by.is_none());
    }
}
