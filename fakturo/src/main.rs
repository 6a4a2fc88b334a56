use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fakturo::api::{create_router, AppState};
use fakturo::config::Config;
use fakturo::db::{Database, DatabaseBackend, LibSqlBackend};
use fakturo::models::EngineDefaults;
use fakturo::ocr::{
    CompositeEngine, InvoiceFieldParser, OcrEngine, TesseractEngine, VisionApiEngine,
};
use fakturo::pipeline::{run_sweeper, Downstream, EngineRegistry, JobQueue, Pipeline, WorkerPool};

#[derive(Parser)]
#[command(name = "fakturo")]
#[command(about = "Self-hostable OCR pipeline for invoice documents")]
struct Args {
    /// Override WORKER_COUNT.
    #[arg(long)]
    workers: Option<usize>,

    /// Emit JSON logs (same as LOG_FORMAT=json).
    #[arg(long)]
    json_logs: bool,
}

const COMPOSITE_ENGINE: &str = "ensemble";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();

    init_tracing(args.json_logs);

    let mut config = Config::from_env();
    if let Some(workers) = args.workers {
        config.pipeline.worker_count = workers.max(1);
    }

    if config.server.api_keys.is_empty() {
        tracing::warn!(
            "FAKTURO_API_KEYS is not set; every endpoint except /health and the docs is locked"
        );
    }

    tracing::info!("Initializing database...");
    let raw_db = Database::new(&config.database).await?;
    let db: Arc<dyn DatabaseBackend> = Arc::new(LibSqlBackend::new(raw_db));

    let registry = Arc::new(EngineRegistry::new(db.clone(), config.pipeline.stats_smoothing));
    register_engines(&registry, &config).await?;

    let downstream = Downstream::from_config(&config.downstream)?;
    let (queue, receiver) = JobQueue::channel(config.pipeline.job_queue_capacity);
    let pipeline = Arc::new(Pipeline::new(db, registry, &config, downstream, queue));

    let recovered = pipeline.recover().await?;
    tracing::info!(enqueued = recovered, "Recovered pending documents");

    let cancel_token = CancellationToken::new();

    tracing::info!(
        workers = config.pipeline.worker_count,
        "Starting worker pool..."
    );
    let pool = WorkerPool::new(pipeline.clone(), config.pipeline.worker_count);
    let workers = tokio::spawn(pool.run(receiver, cancel_token.child_token()));

    tokio::spawn(run_sweeper(
        pipeline.clone(),
        Duration::from_secs(config.pipeline.sweep_interval_secs),
        cancel_token.child_token(),
    ));

    let state = AppState::new(config.clone(), pipeline.clone());
    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Fakturo starting on http://{}", addr);
    tracing::info!("  Health check: http://{}/api/v1/health", addr);
    tracing::info!("  API docs:     http://{}/api/v1/docs", addr);
    tracing::info!("  OpenAPI spec: http://{}/api/v1/openapi.json", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_token.clone()))
        .await?;

    cancel_token.cancel();
    tracing::info!("Waiting for in-flight documents...");
    if let Err(e) = workers.await {
        tracing::error!(error = %e, "Worker pool task ended abnormally");
    }

    if let Err(e) = pipeline.sync().await {
        tracing::error!(error = %e, "Final database sync failed");
    }
    tracing::info!("Fakturo stopped");

    Ok(())
}

fn init_tracing(json_flag: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fakturo=info,tower_http=debug".into());
    let json = json_flag
        || std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Register every engine this build can run. Catalog rows are only seeded
/// when absent, so administrative changes survive restarts.
async fn register_engines(registry: &EngineRegistry, config: &Config) -> anyhow::Result<()> {
    let parser = Arc::new(InvoiceFieldParser::new()?);
    let mut members: Vec<Arc<dyn OcrEngine>> = Vec::new();

    tracing::info!(languages = %config.ocr.languages, "Initializing Tesseract engine...");
    let tesseract = TesseractEngine::new(&config.ocr, parser.clone());
    if !tesseract.can_recognize_images() {
        tracing::warn!("Tesseract unavailable; only PDF text layers will be read");
    }
    let tesseract: Arc<dyn OcrEngine> = Arc::new(tesseract);
    registry
        .register(
            tesseract.clone(),
            EngineDefaults::with_priority(config.ocr.tesseract_priority),
        )
        .await?;
    members.push(tesseract);

    if config.ocr.vision_model.is_some() {
        match VisionApiEngine::new(&config.ocr, parser) {
            Ok(vision) => {
                tracing::info!(model = ?config.ocr.vision_model, "Vision engine enabled");
                let vision: Arc<dyn OcrEngine> = Arc::new(vision);
                registry
                    .register(
                        vision.clone(),
                        EngineDefaults::with_priority(config.ocr.vision_priority),
                    )
                    .await?;
                members.push(vision);
            }
            Err(e) => tracing::warn!(error = %e, "Vision engine not configured; skipping"),
        }
    }

    if members.len() > 1 {
        // Seeded inactive; enable through the catalog to run members side by side.
        let composite = Arc::new(CompositeEngine::new(COMPOSITE_ENGINE, members));
        let priority = config.ocr.tesseract_priority.min(config.ocr.vision_priority) - 1;
        let mut defaults = EngineDefaults::with_priority(priority);
        defaults.is_active = false;
        registry.register(composite, defaults).await?;
    }

    Ok(())
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping workers...");
    cancel_token.cancel();
}
