use std::sync::Arc;

use crate::config::Config;
use crate::pipeline::Pipeline;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(config: Config, pipeline: Arc<Pipeline>) -> Self {
        Self {
            config: Arc::new(config),
            pipeline,
        }
    }
}

#[cfg(test)]
impl AppState {
    /// State over a fresh database in a temp dir, with no engines registered.
    pub(crate) async fn for_tests(
        api_keys: Vec<String>,
    ) -> (
        tempfile::TempDir,
        Self,
        tokio::sync::mpsc::Receiver<crate::pipeline::Job>,
    ) {
        use crate::config::DatabaseConfig;
        use crate::db::{Database, DatabaseBackend, LibSqlBackend};
        use crate::pipeline::{Downstream, EngineRegistry, JobQueue};

        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.server.api_keys = api_keys;
        config.database =
            DatabaseConfig::for_url(format!("file:{}", dir.path().join("api.db").display()));
        config.ingestion.max_upload_bytes = 1024;

        let db: Arc<dyn DatabaseBackend> =
            Arc::new(LibSqlBackend::new(Database::new(&config.database).await.unwrap()));
        let registry = Arc::new(EngineRegistry::new(db.clone(), 0.2));
        let (queue, receiver) = JobQueue::channel(16);
        let pipeline = Arc::new(Pipeline::new(
            db,
            registry,
            &config,
            Downstream::log_only(),
            queue,
        ));

        (dir, Self::new(config, pipeline), receiver)
    }
}
