use libsql::Connection;

use crate::error::Result;

pub async fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Documents and their lifecycle
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            mime_type TEXT NOT NULL,
            content_sha256 TEXT,
            uploaded_by TEXT,
            status TEXT NOT NULL DEFAULT 'uploaded',
            retry_count INTEGER NOT NULL DEFAULT 0,
            next_retry_at TEXT,
            retry_strategy TEXT,
            retry_engine TEXT,
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            preprocessing_used INTEGER NOT NULL DEFAULT 0,
            preferred_engine TEXT,
            review_reason TEXT,
            review_queued_at TEXT,
            review_completed_at TEXT,
            review_completed_by TEXT,
            error_message TEXT,
            uploaded_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
        CREATE INDEX IF NOT EXISTS idx_documents_next_retry_at
            ON documents(next_retry_at) WHERE next_retry_at IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_documents_sha256 ON documents(content_sha256);

        -- Uploaded bytes, kept apart so status queries stay small
        CREATE TABLE IF NOT EXISTS document_contents (
            document_id TEXT PRIMARY KEY,
            content BLOB NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        );

        -- Engine catalog
        CREATE TABLE IF NOT EXISTS engines (
            name TEXT PRIMARY KEY,
            engine_type TEXT NOT NULL,
            version TEXT NOT NULL DEFAULT '1',
            is_active INTEGER NOT NULL DEFAULT 1,
            priority INTEGER NOT NULL DEFAULT 100,
            config TEXT DEFAULT '{}',
            documents_processed INTEGER NOT NULL DEFAULT 0,
            successes INTEGER NOT NULL DEFAULT 0,
            avg_duration_ms REAL NOT NULL DEFAULT 0,
            avg_confidence REAL NOT NULL DEFAULT 0,
            success_rate REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_engines_active_priority ON engines(is_active, priority);

        -- One row per engine invocation or pipeline step
        CREATE TABLE IF NOT EXISTS extraction_attempts (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            engine_name TEXT,
            step_type TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            cycle INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            input_snapshot TEXT,
            output_snapshot TEXT,
            duration_ms INTEGER,
            confidence REAL,
            error_message TEXT,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_attempts_document ON extraction_attempts(document_id, ordinal);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_attempts_one_in_flight
            ON extraction_attempts(document_id) WHERE status = 'in_progress';

        -- Results; at most one active per document
        CREATE TABLE IF NOT EXISTS ocr_results (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            raw_text TEXT NOT NULL DEFAULT '',
            fields TEXT NOT NULL DEFAULT '{}',
            overall_confidence REAL NOT NULL,
            engines TEXT NOT NULL DEFAULT '[]',
            ensemble_used INTEGER NOT NULL DEFAULT 0,
            disposition TEXT NOT NULL,
            superseded INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_results_one_active
            ON ocr_results(document_id) WHERE superseded = 0;

        CREATE TABLE IF NOT EXISTS review_feedback (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            result_id TEXT,
            reviewer TEXT NOT NULL,
            corrections TEXT NOT NULL DEFAULT '{}',
            accuracy_rating REAL,
            notes TEXT,
            time_spent_secs INTEGER,
            created_at TEXT NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE,
            FOREIGN KEY (result_id) REFERENCES ocr_results(id)
        );

        CREATE INDEX IF NOT EXISTS idx_review_feedback_document ON review_feedback(document_id);

        CREATE TABLE IF NOT EXISTS audit_log (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            document_id TEXT NOT NULL,
            attempt_id TEXT,
            action TEXT NOT NULL,
            actor TEXT NOT NULL,
            detail TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_log_document ON audit_log(document_id, seq);
        "#,
    )
    .await?;

    migrate_engine_review_columns(conn).await?;

    Ok(())
}

async fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let exists = conn
        .query(
            &format!("SELECT COUNT(*) FROM pragma_table_info('{table}') WHERE name = ?1"),
            libsql::params![column],
        )
        .await?
        .next()
        .await?
        .map(|row| row.get::<i64>(0).unwrap_or(0) > 0)
        .unwrap_or(false);
    Ok(exists)
}

/// Review statistics arrived after the first engine catalog release.
async fn migrate_engine_review_columns(conn: &Connection) -> Result<()> {
    if !column_exists(conn, "engines", "reviews_count").await? {
        tracing::info!("Migrating engines table: adding reviews_count column");
        conn.execute(
            "ALTER TABLE engines ADD COLUMN reviews_count INTEGER NOT NULL DEFAULT 0",
            (),
        )
        .await?;
    }

    if !column_exists(conn, "engines", "avg_review_accuracy").await? {
        tracing::info!("Migrating engines table: adding avg_review_accuracy column");
        conn.execute("ALTER TABLE engines ADD COLUMN avg_review_accuracy REAL", ())
            .await?;
    }

    Ok(())
}
