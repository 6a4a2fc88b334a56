use chrono::Utc;
use libsql::{params, Connection};

use crate::error::{FakturoError, Result};
use crate::models::{AttemptStatus, ExtractionAttempt};

use super::{parse_optional_timestamp, parse_timestamp};

const ATTEMPT_COLUMNS: &str = "id, document_id, engine_name, step_type, ordinal, cycle, status, \
     input_snapshot, output_snapshot, duration_ms, confidence, error_message, started_at, completed_at";

pub struct AttemptRepository;

impl AttemptRepository {
    /// Open an in-progress attempt. Returns false when the document already
    /// has one in flight. The ordinal is assigned here and written back.
    pub async fn open(conn: &Connection, attempt: &mut ExtractionAttempt) -> Result<bool> {
        let input = attempt
            .input_snapshot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let inserted = conn
            .execute(
                r#"
                INSERT INTO extraction_attempts (
                    id, document_id, engine_name, step_type, ordinal, cycle, status,
                    input_snapshot, started_at
                )
                SELECT ?1, ?2, ?3, ?4,
                       (SELECT COALESCE(MAX(ordinal), 0) + 1 FROM extraction_attempts WHERE document_id = ?2),
                       ?5, 'in_progress', ?6, ?7
                WHERE NOT EXISTS (
                    SELECT 1 FROM extraction_attempts WHERE document_id = ?2 AND status = 'in_progress'
                )
                "#,
                params![
                    attempt.id.clone(),
                    attempt.document_id.clone(),
                    attempt.engine_name.clone(),
                    attempt.step_type.to_string(),
                    attempt.cycle as i64,
                    input,
                    attempt.started_at.to_rfc3339()
                ],
            )
            .await?;

        if inserted == 0 {
            return Ok(false);
        }

        attempt.status = AttemptStatus::InProgress;
        attempt.ordinal = Self::ordinal_of(conn, &attempt.id).await?;
        Ok(true)
    }

    /// Close an in-progress attempt with its final status and snapshots.
    /// Completed attempts are never rewritten.
    pub async fn complete(conn: &Connection, attempt: &ExtractionAttempt) -> Result<bool> {
        if attempt.status == AttemptStatus::InProgress {
            return Err(FakturoError::Validation(format!(
                "Attempt {} must carry a final status",
                attempt.id
            )));
        }

        let output = attempt
            .output_snapshot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let affected = conn
            .execute(
                r#"
                UPDATE extraction_attempts SET
                    status = ?2,
                    output_snapshot = ?3,
                    duration_ms = ?4,
                    confidence = ?5,
                    error_message = ?6,
                    completed_at = ?7
                WHERE id = ?1 AND status = 'in_progress'
                "#,
                params![
                    attempt.id.clone(),
                    attempt.status.to_string(),
                    output,
                    attempt.duration_ms,
                    attempt.confidence,
                    attempt.error_message.clone(),
                    attempt
                        .completed_at
                        .unwrap_or_else(Utc::now)
                        .to_rfc3339()
                ],
            )
            .await?;

        Ok(affected > 0)
    }

    /// Insert an attempt that is already complete, such as a merge or
    /// preprocessing step that never waits on an engine.
    pub async fn record(conn: &Connection, attempt: &mut ExtractionAttempt) -> Result<()> {
        let input = attempt
            .input_snapshot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let output = attempt
            .output_snapshot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            r#"
            INSERT INTO extraction_attempts (
                id, document_id, engine_name, step_type, ordinal, cycle, status,
                input_snapshot, output_snapshot, duration_ms, confidence, error_message,
                started_at, completed_at
            )
            VALUES (
                ?1, ?2, ?3, ?4,
                (SELECT COALESCE(MAX(ordinal), 0) + 1 FROM extraction_attempts WHERE document_id = ?2),
                ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13
            )
            "#,
            params![
                attempt.id.clone(),
                attempt.document_id.clone(),
                attempt.engine_name.clone(),
                attempt.step_type.to_string(),
                attempt.cycle as i64,
                attempt.status.to_string(),
                input,
                output,
                attempt.duration_ms,
                attempt.confidence,
                attempt.error_message.clone(),
                attempt.started_at.to_rfc3339(),
                attempt.completed_at.map(|t| t.to_rfc3339())
            ],
        )
        .await?;

        attempt.ordinal = Self::ordinal_of(conn, &attempt.id).await?;
        Ok(())
    }

    pub async fn list_for_document(
        conn: &Connection,
        document_id: &str,
    ) -> Result<Vec<ExtractionAttempt>> {
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ATTEMPT_COLUMNS} FROM extraction_attempts WHERE document_id = ?1 ORDER BY ordinal ASC"
                ),
                params![document_id],
            )
            .await?;

        let mut attempts = Vec::new();
        while let Some(row) = rows.next().await? {
            attempts.push(Self::row_to_attempt(&row)?);
        }
        Ok(attempts)
    }

    pub async fn count_for_document(conn: &Connection, document_id: &str) -> Result<i64> {
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM extraction_attempts WHERE document_id = ?1",
                params![document_id],
            )
            .await?;

        Ok(match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        })
    }

    async fn ordinal_of(conn: &Connection, id: &str) -> Result<i64> {
        let mut rows = conn
            .query(
                "SELECT ordinal FROM extraction_attempts WHERE id = ?1",
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Err(FakturoError::NotFound(format!("Attempt {id}"))),
        }
    }

    fn row_to_attempt(row: &libsql::Row) -> Result<ExtractionAttempt> {
        let parse_json = |value: Option<String>| {
            value.and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
        };

        Ok(ExtractionAttempt {
            id: row.get(0)?,
            document_id: row.get(1)?,
            engine_name: row.get(2)?,
            step_type: row
                .get::<String>(3)?
                .parse()
                .map_err(FakturoError::Internal)?,
            ordinal: row.get(4)?,
            cycle: row.get::<i64>(5)?.max(0) as u32,
            status: row
                .get::<String>(6)?
                .parse()
                .map_err(FakturoError::Internal)?,
            input_snapshot: parse_json(row.get(7)?),
            output_snapshot: parse_json(row.get(8)?),
            duration_ms: row.get(9)?,
            confidence: row.get(10)?,
            error_message: row.get(11)?,
            started_at: parse_timestamp(&row.get::<String>(12)?),
            completed_at: parse_optional_timestamp(row.get(13)?),
        })
    }
}
