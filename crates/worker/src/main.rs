mod config;
mod retention_job;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use verso_core::audit::AuditSink;
use verso_core::transaction::AccessContext;
use verso_db::audit::TracingAuditSink;
use verso_db::comparison_cache::ComparisonCache;
use verso_db::config::EngineConfig;
use verso_db::engine::TransactionEngine;
use verso_db::retention::RetentionManager;
use verso_db::store::PgStore;

use config::WorkerConfig;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    // --- Configuration ---
    let config = WorkerConfig::from_env().expect("Invalid worker configuration");
    let engine_config = EngineConfig::from_env().expect("Invalid transaction engine configuration");
    tracing::info!(
        max_connections = config.max_connections,
        retention_interval_secs = config.retention_interval.as_secs(),
        isolation = %engine_config.default_isolation,
        "Loaded worker configuration"
    );

    // --- Database ---
    let pool = verso_db::create_pool(&config.database_url, config.max_connections)
        .await
        .expect("Failed to connect to database");
    verso_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    verso_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database ready");

    let engine = TransactionEngine::new(Arc::new(PgStore::new(pool)), engine_config);
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);

    if config.purge_comparisons_on_start {
        match ComparisonCache::new(engine.clone())
            .purge(&AccessContext::system())
            .await
        {
            Ok(purged) => tracing::info!(purged, "Comparison cache purged at start-up"),
            Err(e) => tracing::error!(error = %e, "Comparison cache purge failed"),
        }
    }

    // --- Retention job ---
    let cancel = CancellationToken::new();
    let retention = RetentionManager::new(engine, audit);
    let retention_handle = tokio::spawn(retention_job::run(
        retention,
        config.retention_interval,
        cancel.clone(),
    ));

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(30), retention_handle).await;
    tracing::info!("Worker stopped");
}

/// `LOG_FORMAT=json` switches to one JSON object per line.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "verso_worker=debug,verso_db=info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

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

/// Wait for Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
