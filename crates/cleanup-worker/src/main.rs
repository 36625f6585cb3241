//! Placement Cleanup Worker
//!
//! Periodically removes invitations that were never accepted:
//! 1. Connects to the database (and migrates if configured)
//! 2. Every `cleanup.interval_secs` deletes invitations older than
//!    `invitations.max_age_hours`
//! 3. Stops on Ctrl+C
//!
//! `cleanup-worker once` runs a single pass and exits.

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use placement_common::{
    clock::system_clock,
    config::AppConfig,
    db::{DbPool, Repository},
    metrics,
    tasks::CleanupWorker,
    VERSION,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level)),
        )
        .with_target(true)
        .json()
        .init();

    info!("Starting Placement Cleanup Worker v{}", VERSION);

    if config.observability.metrics_port != 0 {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.observability.metrics_port))
            .install()
            .context("failed to install metrics exporter")?;
    }
    metrics::register_metrics();

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    if config.database.run_migrations {
        db.migrate().await?;
    }

    let worker = CleanupWorker::new(
        Arc::new(Repository::new(db)),
        system_clock(),
        config.cleanup_interval(),
    )
    .with_max_age(
        config
            .invitation_max_age()
            .context("invalid invitation max age")?,
    );

    // Single pass mode
    if std::env::args().nth(1).as_deref() == Some("once") {
        match worker.run_once().await {
            Ok(removed) => {
                info!(removed, "Cleanup pass complete");
                return Ok(());
            }
            Err(e) => {
                error!(error = %e, "Cleanup pass failed");
                return Err(e.into());
            }
        }
    }

    if !config.cleanup.enabled {
        warn!("Cleanup disabled, waiting for shutdown signal...");
        tokio::signal::ctrl_c().await?;
        info!("Cleanup worker shutting down");
        return Ok(());
    }

    worker
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("Cleanup worker shutting down");
    Ok(())
}
