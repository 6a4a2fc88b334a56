use chrono::Utc;
use libsql::{params, Connection};

use crate::error::{FakturoError, Result};
use crate::models::{Engine, EngineDefaults, EngineStats, EngineType, Metadata};

use super::parse_timestamp;

const ENGINE_COLUMNS: &str = "name, engine_type, version, is_active, priority, config, \
     documents_processed, successes, avg_duration_ms, avg_confidence, success_rate, \
     reviews_count, avg_review_accuracy, created_at, updated_at";

pub struct EngineRepository;

impl EngineRepository {
    /// Insert a catalog row for a newly registered engine. An existing row is
    /// left untouched so operator edits and statistics survive restarts.
    pub async fn upsert_if_absent(
        conn: &Connection,
        name: &str,
        engine_type: EngineType,
        defaults: &EngineDefaults,
    ) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let config_json = serde_json::to_string(&defaults.config)?;

        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO engines (name, engine_type, version, is_active, priority, config, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    name,
                    engine_type.to_string(),
                    defaults.version.clone(),
                    defaults.is_active as i32,
                    defaults.priority,
                    config_json,
                    now
                ],
            )
            .await?;

        Ok(inserted > 0)
    }

    pub async fn get(conn: &Connection, name: &str) -> Result<Option<Engine>> {
        let mut rows = conn
            .query(
                &format!("SELECT {ENGINE_COLUMNS} FROM engines WHERE name = ?1"),
                params![name],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Self::row_to_engine(&row)?))
        } else {
            Ok(None)
        }
    }

    pub async fn list(conn: &Connection) -> Result<Vec<Engine>> {
        let mut rows = conn
            .query(
                &format!("SELECT {ENGINE_COLUMNS} FROM engines ORDER BY priority ASC, name ASC"),
                (),
            )
            .await?;

        let mut engines = Vec::new();
        while let Some(row) = rows.next().await? {
            engines.push(Self::row_to_engine(&row)?);
        }
        Ok(engines)
    }

    /// Active engines, lowest priority value first, ties broken by name.
    pub async fn list_active(conn: &Connection) -> Result<Vec<Engine>> {
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ENGINE_COLUMNS} FROM engines WHERE is_active = 1 ORDER BY priority ASC, name ASC"
                ),
                (),
            )
            .await?;

        let mut engines = Vec::new();
        while let Some(row) = rows.next().await? {
            engines.push(Self::row_to_engine(&row)?);
        }
        Ok(engines)
    }

    pub async fn set_active(conn: &Connection, name: &str, active: bool) -> Result<bool> {
        let affected = conn
            .execute(
                "UPDATE engines SET is_active = ?2, updated_at = ?3 WHERE name = ?1",
                params![name, active as i32, Utc::now().to_rfc3339()],
            )
            .await?;
        Ok(affected > 0)
    }

    pub async fn set_priority(conn: &Connection, name: &str, priority: i64) -> Result<bool> {
        let affected = conn
            .execute(
                "UPDATE engines SET priority = ?2, updated_at = ?3 WHERE name = ?1",
                params![name, priority, Utc::now().to_rfc3339()],
            )
            .await?;
        Ok(affected > 0)
    }

    /// Fold one invocation into the rolling statistics in a single statement
    /// so concurrent workers never lose an update. The first sample seeds
    /// each moving average.
    pub async fn record_outcome(
        conn: &Connection,
        name: &str,
        success: bool,
        duration_ms: i64,
        confidence: Option<f64>,
        smoothing: f64,
    ) -> Result<()> {
        conn.execute(
            r#"
            UPDATE engines SET
                avg_duration_ms = CASE
                    WHEN documents_processed = 0 THEN ?3
                    ELSE avg_duration_ms + ?5 * (?3 - avg_duration_ms)
                END,
                avg_confidence = CASE
                    WHEN ?4 IS NULL THEN avg_confidence
                    WHEN successes = 0 THEN ?4
                    ELSE avg_confidence + ?5 * (?4 - avg_confidence)
                END,
                success_rate = CAST(successes + ?2 AS REAL) / (documents_processed + 1),
                documents_processed = documents_processed + 1,
                successes = successes + ?2,
                updated_at = ?6
            WHERE name = ?1
            "#,
            params![
                name,
                success as i64,
                duration_ms as f64,
                if success { confidence } else { None },
                smoothing,
                Utc::now().to_rfc3339()
            ],
        )
        .await?;
        Ok(())
    }

    /// Fold a reviewer's accuracy rating into the engine's review statistics.
    pub async fn record_feedback(
        conn: &Connection,
        name: &str,
        accuracy: Option<f64>,
        smoothing: f64,
    ) -> Result<()> {
        conn.execute(
            r#"
            UPDATE engines SET
                avg_review_accuracy = CASE
                    WHEN ?2 IS NULL THEN avg_review_accuracy
                    WHEN avg_review_accuracy IS NULL THEN ?2
                    ELSE avg_review_accuracy + ?3 * (?2 - avg_review_accuracy)
                END,
                reviews_count = reviews_count + 1,
                updated_at = ?4
            WHERE name = ?1
            "#,
            params![name, accuracy, smoothing, Utc::now().to_rfc3339()],
        )
        .await?;
        Ok(())
    }

    fn row_to_engine(row: &libsql::Row) -> Result<Engine> {
        let config_json: Option<String> = row.get(5)?;
        let config: Metadata = config_json
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        Ok(Engine {
            name: row.get(0)?,
            engine_type: row
                .get::<String>(1)?
                .parse()
                .map_err(FakturoError::Internal)?,
            version: row.get(2)?,
            is_active: row.get::<i64>(3)? != 0,
            priority: row.get(4)?,
            config,
            stats: EngineStats {
                documents_processed: row.get(6)?,
                successes: row.get(7)?,
                avg_duration_ms: row.get(8)?,
                avg_confidence: row.get(9)?,
                success_rate: row.get(10)?,
                reviews_count: row.get(11)?,
                avg_review_accuracy: row.get(12)?,
            },
            created_at: parse_timestamp(&row.get::<String>(13)?),
            updated_at: parse_timestamp(&row.get::<String>(14)?),
        })
    }
}
