use chrono::{DateTime, Utc};
use libsql::{params, Connection};

use crate::error::{FakturoError, Result};
use crate::models::{Document, DocumentStatus, RetryStrategy};

use super::{parse_optional_timestamp, parse_timestamp};

const DOCUMENT_COLUMNS: &str = "id, filename, size_bytes, mime_type, content_sha256, uploaded_by, \
     status, retry_count, next_retry_at, retry_strategy, retry_engine, consecutive_failures, \
     preprocessing_used, preferred_engine, review_reason, review_queued_at, review_completed_at, \
     review_completed_by, error_message, uploaded_at, updated_at";

const TERMINAL_STATUSES: &str = "'completed', 'failed', 'cancelled', 'rejected'";

pub struct DocumentRepository;

impl DocumentRepository {
    /// Insert a document and, when given, its uploaded bytes in one transaction.
    pub async fn create(conn: &Connection, doc: &Document, content: Option<&[u8]>) -> Result<()> {
        let tx = conn.transaction().await?;

        tx.execute(
            &format!(
                "INSERT INTO documents ({DOCUMENT_COLUMNS}) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                    ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21
                )"
            ),
            params![
                doc.id.clone(),
                doc.filename.clone(),
                doc.size_bytes,
                doc.mime_type.clone(),
                doc.content_sha256.clone(),
                doc.uploaded_by.clone(),
                doc.status.to_string(),
                doc.retry_count as i64,
                doc.next_retry_at.map(|t| t.to_rfc3339()),
                doc.retry_strategy.map(|s| s.to_string()),
                doc.retry_engine.clone(),
                doc.consecutive_failures as i64,
                doc.preprocessing_used as i32,
                doc.preferred_engine.clone(),
                doc.review_reason.clone(),
                doc.review_queued_at.map(|t| t.to_rfc3339()),
                doc.review_completed_at.map(|t| t.to_rfc3339()),
                doc.review_completed_by.clone(),
                doc.error_message.clone(),
                doc.uploaded_at.to_rfc3339(),
                doc.updated_at.to_rfc3339(),
            ],
        )
        .await?;

        if let Some(bytes) = content {
            tx.execute(
                "INSERT INTO document_contents (document_id, content) VALUES (?1, ?2)",
                params![doc.id.clone(), bytes.to_vec()],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_by_id(conn: &Connection, id: &str) -> Result<Option<Document>> {
        let mut rows = conn
            .query(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
                params![id],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Self::row_to_document(&row)?))
        } else {
            Ok(None)
        }
    }

    pub async fn get_content(conn: &Connection, id: &str) -> Result<Option<Vec<u8>>> {
        let mut rows = conn
            .query(
                "SELECT content FROM document_contents WHERE document_id = ?1",
                params![id],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(row.get::<Vec<u8>>(0)?))
        } else {
            Ok(None)
        }
    }

    /// Atomically move a queued document to processing. Returns false when
    /// another worker got there first or the document is no longer queued.
    pub async fn claim(conn: &Connection, id: &str) -> Result<bool> {
        let affected = conn
            .execute(
                "UPDATE documents SET status = 'processing', updated_at = ?2
                 WHERE id = ?1 AND status = 'queued'",
                params![id, Utc::now().to_rfc3339()],
            )
            .await?;

        Ok(affected > 0)
    }

    /// Conditional status change. Returns false when the stored status is no
    /// longer `from`.
    pub async fn transition(
        conn: &Connection,
        id: &str,
        from: DocumentStatus,
        to: DocumentStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        if !from.can_transition_to(to) {
            return Err(FakturoError::InvalidTransition { from, to });
        }

        let affected = conn
            .execute(
                "UPDATE documents
                 SET status = ?3, error_message = COALESCE(?4, error_message), updated_at = ?5
                 WHERE id = ?1 AND status = ?2",
                params![
                    id,
                    from.to_string(),
                    to.to_string(),
                    error,
                    Utc::now().to_rfc3339()
                ],
            )
            .await?;

        Ok(affected > 0)
    }

    /// Persist every mutable field, guarded by the status the caller last observed.
    pub async fn save(conn: &Connection, doc: &Document, expected: DocumentStatus) -> Result<bool> {
        if expected != doc.status && !expected.can_transition_to(doc.status) {
            return Err(FakturoError::InvalidTransition {
                from: expected,
                to: doc.status,
            });
        }

        let affected = conn
            .execute(
                r#"
                UPDATE documents SET
                    status = ?3,
                    retry_count = ?4,
                    next_retry_at = ?5,
                    retry_strategy = ?6,
                    retry_engine = ?7,
                    consecutive_failures = ?8,
                    preprocessing_used = ?9,
                    preferred_engine = ?10,
                    review_reason = ?11,
                    review_queued_at = ?12,
                    review_completed_at = ?13,
                    review_completed_by = ?14,
                    error_message = ?15,
                    updated_at = ?16
                WHERE id = ?1 AND status = ?2
                "#,
                params![
                    doc.id.clone(),
                    expected.to_string(),
                    doc.status.to_string(),
                    doc.retry_count as i64,
                    doc.next_retry_at.map(|t| t.to_rfc3339()),
                    doc.retry_strategy.map(|s| s.to_string()),
                    doc.retry_engine.clone(),
                    doc.consecutive_failures as i64,
                    doc.preprocessing_used as i32,
                    doc.preferred_engine.clone(),
                    doc.review_reason.clone(),
                    doc.review_queued_at.map(|t| t.to_rfc3339()),
                    doc.review_completed_at.map(|t| t.to_rfc3339()),
                    doc.review_completed_by.clone(),
                    doc.error_message.clone(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await?;

        Ok(affected > 0)
    }

    /// Cancel unless the document already reached a terminal state.
    pub async fn cancel(conn: &Connection, id: &str) -> Result<bool> {
        let affected = conn
            .execute(
                &format!(
                    "UPDATE documents SET status = 'cancelled', next_retry_at = NULL, updated_at = ?2
                     WHERE id = ?1 AND status NOT IN ({TERMINAL_STATUSES})"
                ),
                params![id, Utc::now().to_rfc3339()],
            )
            .await?;

        Ok(affected > 0)
    }

    pub async fn list_by_status(
        conn: &Connection,
        status: DocumentStatus,
        limit: u32,
    ) -> Result<Vec<Document>> {
        let order = match status {
            DocumentStatus::ManualReviewRequired => "review_queued_at ASC, uploaded_at ASC",
            _ => "uploaded_at ASC",
        };
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE status = ?1 ORDER BY {order} LIMIT ?2"
                ),
                params![status.to_string(), limit as i64],
            )
            .await?;

        Self::collect(&mut rows).await
    }

    pub async fn list_due_retries(
        conn: &Connection,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Document>> {
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents
                     WHERE status = 'retry_scheduled' AND next_retry_at IS NOT NULL AND next_retry_at <= ?1
                     ORDER BY next_retry_at ASC LIMIT ?2"
                ),
                params![now.to_rfc3339(), limit as i64],
            )
            .await?;

        Self::collect(&mut rows).await
    }

    pub async fn list_stale_queued(
        conn: &Connection,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Document>> {
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents
                     WHERE status = 'queued' AND updated_at <= ?1
                     ORDER BY updated_at ASC LIMIT ?2"
                ),
                params![before.to_rfc3339(), limit as i64],
            )
            .await?;

        Self::collect(&mut rows).await
    }

    /// Documents sitting between stages (`uploaded`, `ocr_completed`,
    /// `integration_processing`) since before `before`. Nothing advances
    /// these on its own once the step that put them there has died.
    pub async fn list_stranded(
        conn: &Connection,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Document>> {
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents
                     WHERE status IN ('uploaded', 'ocr_completed', 'integration_processing')
                       AND updated_at <= ?1
                     ORDER BY updated_at ASC LIMIT ?2"
                ),
                params![before.to_rfc3339(), limit as i64],
            )
            .await?;

        Self::collect(&mut rows).await
    }

    /// Touch a queued document so the stale sweep leaves it alone for a while.
    pub async fn touch_queued(conn: &Connection, id: &str) -> Result<()> {
        conn.execute(
            "UPDATE documents SET updated_at = ?2 WHERE id = ?1 AND status = 'queued'",
            params![id, Utc::now().to_rfc3339()],
        )
        .await?;
        Ok(())
    }

    /// Return documents interrupted mid-cycle to the queue and close their
    /// dangling attempts. Returns the ids of recovered documents.
    pub async fn recover_interrupted(conn: &Connection) -> Result<Vec<String>> {
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction().await?;

        let mut ids = Vec::new();
        {
            let mut rows = tx
                .query("SELECT id FROM documents WHERE status = 'processing'", ())
                .await?;
            while let Some(row) = rows.next().await? {
                ids.push(row.get::<String>(0)?);
            }
        }

        tx.execute(
            "UPDATE extraction_attempts
             SET status = 'failed', error_message = 'interrupted', completed_at = ?1
             WHERE status = 'in_progress'",
            params![now.clone()],
        )
        .await?;

        tx.execute(
            "UPDATE documents SET status = 'queued', updated_at = ?1 WHERE status = 'processing'",
            params![now],
        )
        .await?;

        tx.commit().await?;
        Ok(ids)
    }

    pub async fn count_by_status(conn: &Connection) -> Result<Vec<(DocumentStatus, i64)>> {
        let mut rows = conn
            .query(
                "SELECT status, COUNT(*) FROM documents GROUP BY status ORDER BY status",
                (),
            )
            .await?;

        let mut counts = Vec::new();
        while let Some(row) = rows.next().await? {
            if let Ok(status) = row.get::<String>(0)?.parse::<DocumentStatus>() {
                counts.push((status, row.get::<i64>(1)?));
            }
        }
        Ok(counts)
    }

    async fn collect(rows: &mut libsql::Rows) -> Result<Vec<Document>> {
        let mut docs = Vec::new();
        while let Some(row) = rows.next().await? {
            docs.push(Self::row_to_document(&row)?);
        }
        Ok(docs)
    }

    fn row_to_document(row: &libsql::Row) -> Result<Document> {
        Ok(Document {
            id: row.get(0)?,
            filename: row.get(1)?,
            size_bytes: row.get(2)?,
            mime_type: row.get(3)?,
            content_sha256: row.get(4)?,
            uploaded_by: row.get(5)?,
            status: row
                .get::<String>(6)?
                .parse()
                .map_err(FakturoError::Internal)?,
            retry_count: row.get::<i64>(7)?.max(0) as u32,
            next_retry_at: parse_optional_timestamp(row.get(8)?),
            retry_strategy: row
                .get::<Option<String>>(9)?
                .and_then(|s| s.parse::<RetryStrategy>().ok()),
            retry_engine: row.get(10)?,
            consecutive_failures: row.get::<i64>(11)?.max(0) as u32,
            preprocessing_used: row.get::<i64>(12)? != 0,
            preferred_engine: row.get(13)?,
            review_reason: row.get(14)?,
            review_queued_at: parse_optional_timestamp(row.get(15)?),
            review_completed_at: parse_optional_timestamp(row.get(16)?),
            review_completed_by: row.get(17)?,
            error_message: row.get(18)?,
            uploaded_at: parse_timestamp(&row.get::<String>(19)?),
            updated_at: parse_timestamp(&row.get::<String>(20)?),
        })
    }
}
