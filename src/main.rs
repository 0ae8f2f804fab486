use axum::{Extension, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use lecture_pipeline::{
    clients,
    config::AppConfig,
    db, handlers, middleware,
    store::{MemoryStore, MemoryStoreProvider, PgStoreProvider, StoreError, StoreProvider},
    AppState,
};

const JOB_RETENTION_HOURS: i64 = 24;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging()?;

    let config = AppConfig::from_env();
    tracing::info!("Configuration - {}", config.integration_summary());

    // Working directories for videos, audio, transcript backups and artifacts
    for dir in config.directories.all() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::warn!("Failed to create directory {}: {}", dir.display(), e);
        } else {
            tracing::info!("Directory ready: {}", dir.display());
        }
    }

    let provider = open_store(&config).await?;
    let collaborators = clients::build_collaborators(&config);
    let bind_addr = config.server.bind_addr.clone();

    let shared_state = Arc::new(AppState::new(config, provider, collaborators));
    tracing::info!("🎬 Batch job manager initialized");

    // Purge finished batch jobs once an hour
    let cleanup_manager = shared_state.job_manager.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            let removed = cleanup_manager.cleanup_old_jobs(JOB_RETENTION_HOURS).await;
            if removed > 0 {
                tracing::info!("🗑️ Removed {} finished batch jobs", removed);
            }
        }
    });

    let app = Router::new()
        .merge(handlers::api_routes())
        .layer(axum::middleware::from_fn(middleware::request_logging_middleware))
        .layer(CorsLayer::permissive())
        .layer(Extension(shared_state));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Postgres when DATABASE_URL is set, otherwise a process-local store.
async fn open_store(config: &AppConfig) -> Result<Arc<dyn StoreProvider>, StoreError> {
    match &config.database.url {
        Some(url) => {
            let pool = db::create_pool(url.expose(), &config.database).await?;
            tracing::info!("✅ Session store ready (PostgreSQL)");
            Ok(Arc::new(PgStoreProvider::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set. Sessions are kept in memory and lost on restart.");
            Ok(Arc::new(MemoryStoreProvider::new(MemoryStore::new())))
        }
    }
}

// Production-grade logging configuration
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,lecture_pipeline=trace,sqlx=info,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,lecture_pipeline=info,sqlx=warn,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        // JSON for log aggregation
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("🎓 Lecture pipeline starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Build mode: {}", if cfg!(debug_assertions) { "development" } else { "production" });
    tracing::info!("Log level: {}", log_level);

    Ok(())
}
