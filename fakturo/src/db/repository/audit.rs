use libsql::{params, Connection};

use crate::error::{FakturoError, Result};
use crate::models::AuditEntry;

use super::parse_timestamp;

/// Append and read only.
pub struct AuditRepository;

impl AuditRepository {
    pub async fn append(conn: &Connection, entry: &AuditEntry) -> Result<()> {
        let detail = if entry.detail.is_null() {
            None
        } else {
            Some(serde_json::to_string(&entry.detail)?)
        };

        conn.execute(
            r#"
            INSERT INTO audit_log (id, document_id, attempt_id, action, actor, detail, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                entry.id.clone(),
                entry.document_id.clone(),
                entry.attempt_id.clone(),
                entry.action.to_string(),
                entry.actor.clone(),
                detail,
                entry.created_at.to_rfc3339()
            ],
        )
        .await?;

        Ok(())
    }

    /// Entries for a document in the order they were appended.
    pub async fn list_for_document(conn: &Connection, document_id: &str) -> Result<Vec<AuditEntry>> {
        let mut rows = conn
            .query(
                r#"
                SELECT id, document_id, attempt_id, action, actor, detail, created_at
                FROM audit_log
                WHERE document_id = ?1
                ORDER BY seq ASC
                "#,
                params![document_id],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            let detail = row
                .get::<Option<String>>(5)?
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(serde_json::Value::Null);

            entries.push(AuditEntry {
                id: row.get(0)?,
                document_id: row.get(1)?,
                attempt_id: row.get(2)?,
                action: row
                    .get::<String>(3)?
                    .parse()
                    .map_err(FakturoError::Internal)?,
                actor: row.get(4)?,
                detail,
                created_at: parse_timestamp(&row.get::<String>(6)?),
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::setup_test_db;
    use crate::models::AuditAction;
    use serde_json::json;

    #[tokio::test]
    async fn test_entries_keep_append_order() {
        let conn = setup_test_db().await;
        let actions = [
            AuditAction::DocumentAdmitted,
            AuditAction::DocumentQueued,
            AuditAction::DocumentClaimed,
            AuditAction::AttemptCompleted,
        ];
        for action in actions {
            let entry = AuditEntry::new("d1", action, "test").detail(json!({"n": 1}));
            AuditRepository::append(&conn, &entry).await.unwrap();
        }
        AuditRepository::append(&conn, &AuditEntry::new("d2", AuditAction::DocumentRejected, "test"))
            .await
            .unwrap();

        let entries = AuditRepository::list_for_document(&conn, "d1")
            .await
            .unwrap();
        let stored: Vec<AuditAction> = entries.iter().map(|e| e.action).collect();
        assert_eq!(stored, actions.to_vec());
        assert_eq!(entries[0].detail, json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_null_detail_round_trips() {
        let conn = setup_test_db().await;
        let entry = AuditEntry::new("d1", AuditAction::DocumentCancelled, "api").attempt("a1");
        AuditRepository::append(&conn, &entry).await.unwrap();

        let entries = AuditRepository::list_for_document(&conn, "d1")
            .await
            .unwrap();
        assert_eq!(entries[0].attempt_id.as_deref(), Some("a1"));
        assert!(entries[0].detail.is_null());
    }
}
