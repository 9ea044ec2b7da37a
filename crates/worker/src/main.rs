use std::sync::Arc;

use anyhow::{Context, Result};
use contentgen_jobs::generation::{HttpGenerationClient, PostgresResultSink};
use contentgen_jobs::{PostgresJobStore, PostgresQueue, Scheduler};
use contentgen_worker::telemetry::{init_telemetry, level_filter, TelemetryConfig};
use contentgen_worker::WorkerSettings;
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv_path = dotenvy::dotenv().ok();

    // Filter comes from RUST_LOG, else LOG_LEVEL (default "info") for the contentgen crates
    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.log_filter.is_none() {
        telemetry_config.log_filter = Some(level_filter("info"));
    }
    let _telemetry_guard = init_telemetry(telemetry_config);

    if let Some(path) = dotenv_path {
        tracing::info!(path = %path.display(), "Loaded environment from .env file");
    }

    let settings = WorkerSettings::from_env().context("Invalid worker configuration")?;
    let scheduler_config = settings.scheduler;

    tracing::info!(
        worker_id = %scheduler_config.worker_id,
        queues = ?scheduler_config.enabled_kinds(),
        poll_interval_ms = scheduler_config.poll_interval.as_millis() as u64,
        visibility_timeout_secs = scheduler_config.visibility_timeout().as_secs(),
        "contentgen-worker starting..."
    );

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&settings.database_url)
        .await
        .context("Failed to connect to database")?;

    if settings.run_migrations {
        sqlx::migrate!()
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        tracing::info!("Database migrations applied");
    }

    let generator = HttpGenerationClient::new(settings.endpoints)
        .context("Failed to build generation client")?;

    let scheduler = Scheduler::new(
        Arc::new(PostgresQueue::new(pool.clone())),
        Arc::new(PostgresJobStore::new(pool.clone())),
        Arc::new(generator),
        Arc::new(PostgresResultSink::new(pool.clone())),
        scheduler_config,
    );

    let shutdown = scheduler.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Received shutdown signal");
        shutdown.cancel();
    });

    scheduler.run().await;

    pool.close().await;
    tracing::info!("Worker shutdown complete");
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
