use libsql::{params, Connection};

use crate::error::{FakturoError, Result};
use crate::models::{Disposition, FieldMap, OcrResult};

use super::parse_timestamp;

const RESULT_COLUMNS: &str = "id, document_id, raw_text, fields, overall_confidence, engines, \
     ensemble_used, disposition, superseded, created_at";

pub struct ResultRepository;

impl ResultRepository {
    /// Persist a result as the document's active one, superseding any prior.
    pub async fn save(conn: &Connection, result: &OcrResult) -> Result<()> {
        let fields_json = serde_json::to_string(&result.fields)?;
        let engines_json = serde_json::to_string(&result.engines)?;

        let tx = conn.transaction().await?;

        tx.execute(
            "UPDATE ocr_results SET superseded = 1 WHERE document_id = ?1 AND superseded = 0",
            params![result.document_id.clone()],
        )
        .await?;

        tx.execute(
            &format!(
                "INSERT INTO ocr_results ({RESULT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)"
            ),
            params![
                result.id.clone(),
                result.document_id.clone(),
                result.raw_text.clone(),
                fields_json,
                result.overall_confidence,
                engines_json,
                result.ensemble_used as i32,
                result.disposition.to_string(),
                result.created_at.to_rfc3339()
            ],
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_active(conn: &Connection, document_id: &str) -> Result<Option<OcrResult>> {
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {RESULT_COLUMNS} FROM ocr_results WHERE document_id = ?1 AND superseded = 0"
                ),
                params![document_id],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Self::row_to_result(&row)?))
        } else {
            Ok(None)
        }
    }

    pub async fn supersede(conn: &Connection, document_id: &str) -> Result<u64> {
        let affected = conn
            .execute(
                "UPDATE ocr_results SET superseded = 1 WHERE document_id = ?1 AND superseded = 0",
                params![document_id],
            )
            .await?;
        Ok(affected)
    }

    pub async fn update_disposition(
        conn: &Connection,
        result_id: &str,
        disposition: Disposition,
    ) -> Result<()> {
        conn.execute(
            "UPDATE ocr_results SET disposition = ?2 WHERE id = ?1",
            params![result_id, disposition.to_string()],
        )
        .await?;
        Ok(())
    }

    fn row_to_result(row: &libsql::Row) -> Result<OcrResult> {
        let fields: FieldMap = serde_json::from_str(&row.get::<String>(3)?)?;
        let engines: Vec<String> = serde_json::from_str(&row.get::<String>(5)?)?;

        Ok(OcrResult {
            id: row.get(0)?,
            document_id: row.get(1)?,
            raw_text: row.get(2)?,
            fields,
            overall_confidence: row.get(4)?,
            engines,
            ensemble_used: row.get::<i64>(6)? != 0,
            disposition: row
                .get::<String>(7)?
                .parse()
                .map_err(FakturoError::Internal)?,
            superseded: row.get::<i64>(8)? != 0,
            created_at: parse_timestamp(&row.get::<String>(9)?),
        })
    }
}
