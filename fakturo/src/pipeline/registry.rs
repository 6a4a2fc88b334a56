use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::db::DatabaseBackend;
use crate::error::{FakturoError, Result};
use crate::models::{Engine, EngineDefaults, ExtractionAttempt};
use crate::ocr::OcrEngine;

const MAX_NAME_LEN: usize = 64;

/// A catalog row paired with the implementation registered under its name.
#[derive(Clone)]
pub struct ActiveEngine {
    pub record: Engine,
    pub engine: Arc<dyn OcrEngine>,
}

impl ActiveEngine {
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Per-engine `timeout_ms` from the catalog config, if set.
    pub fn timeout_override(&self) -> Option<Duration> {
        self.record
            .config
            .get("timeout_ms")
            .and_then(|v| v.as_u64())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

impl std::fmt::Debug for ActiveEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveEngine")
            .field("name", &self.record.name)
            .field("priority", &self.record.priority)
            .finish()
    }
}

/// Explicit catalog of engine implementations.
///
/// Implementations are registered in code; activation, priority and config
/// live in the `engines` table and are changed administratively. Statistics
/// updates are best effort.
pub struct EngineRegistry {
    db: Arc<dyn DatabaseBackend>,
    implementations: RwLock<HashMap<String, Arc<dyn OcrEngine>>>,
    smoothing: f64,
}

impl EngineRegistry {
    pub fn new(db: Arc<dyn DatabaseBackend>, smoothing: f64) -> Self {
        Self {
            db,
            implementations: RwLock::new(HashMap::new()),
            smoothing,
        }
    }

    /// Register an implementation and seed its catalog row if absent.
    /// Existing rows keep their administrative settings.
    pub async fn register(&self, engine: Arc<dyn OcrEngine>, defaults: EngineDefaults) -> Result<()> {
        let name = engine.name().to_string();
        validate_name(&name)?;

        let mut implementations = self.implementations.write().await;
        if implementations.contains_key(&name) {
            return Err(FakturoError::Configuration(format!(
                "engine '{name}' is already registered"
            )));
        }

        let defaults = EngineDefaults {
            version: engine.version().to_string(),
            ..defaults
        };
        let created = self
            .db
            .upsert_engine_if_absent(&name, engine.engine_type(), &defaults)
            .await?;

        info!(
            engine = %name,
            engine_type = %engine.engine_type(),
            available = engine.is_available(),
            seeded = created,
            "Registered OCR engine"
        );
        implementations.insert(name, engine);
        Ok(())
    }

    /// Active engines ordered by (priority, name).
    pub async fn list_active_engines_by_priority(&self) -> Result<Vec<ActiveEngine>> {
        let records = self.db.list_active_engines().await?;
        let implementations = self.implementations.read().await;

        records
            .into_iter()
            .map(|record| match implementations.get(&record.name) {
                Some(engine) => Ok(ActiveEngine {
                    engine: Arc::clone(engine),
                    record,
                }),
                None => Err(FakturoError::Configuration(format!(
                    "engine '{}' is active but has no registered implementation",
                    record.name
                ))),
            })
            .collect()
    }

    pub async fn resolve(&self, name: &str) -> Result<ActiveEngine> {
        let record = self.db.get_engine(name).await?.ok_or_else(|| {
            FakturoError::Configuration(format!("unknown engine '{name}'"))
        })?;
        if !record.is_active {
            return Err(FakturoError::Configuration(format!(
                "engine '{name}' is inactive"
            )));
        }

        let implementations = self.implementations.read().await;
        let engine = implementations.get(name).cloned().ok_or_else(|| {
            FakturoError::Configuration(format!("engine '{name}' has no registered implementation"))
        })?;

        Ok(ActiveEngine { record, engine })
    }

    pub async fn record_outcome(&self, engine: &str, attempt: &ExtractionAttempt) {
        let success = attempt.status.is_success();
        let result = self
            .db
            .record_engine_outcome(
                engine,
                success,
                attempt.duration_ms.unwrap_or(0),
                attempt.confidence,
                self.smoothing,
            )
            .await;
        if let Err(e) = result {
            warn!(engine = %engine, error = %e, "Failed to update engine statistics");
        }
    }

    pub async fn record_feedback(&self, engine: &str, accuracy: Option<f64>) {
        if let Err(e) = self
            .db
            .record_engine_feedback(engine, accuracy, self.smoothing)
            .await
        {
            warn!(engine = %engine, error = %e, "Failed to record review feedback statistics");
        }
    }

    pub async fn engines(&self) -> Result<Vec<Engine>> {
        self.db.list_engines().await
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(FakturoError::Configuration(format!(
            "engine name must be 1-{MAX_NAME_LEN} characters, got '{name}'"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(FakturoError::Configuration(format!(
            "engine name '{name}' may only contain letters, digits, '-' and '_'"
        )));
    }
    Ok(())
}
