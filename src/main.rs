use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use chainwatch_detector::config::Config;
use chainwatch_detector::risk::runner::{DetectionRunner, RunOutcome};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    // Initialize structured logging (set RUST_LOG=info for output)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    tracing::info!("ChainWatch Detector starting");

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)?;
    tracing::info!(
        interval_secs = config.detection.interval_secs,
        seed = config.detection.seed,
        "Configuration loaded from {}",
        config_path
    );

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .map_err(|e| eyre::eyre!("Failed to connect to database: {}", e))?;

    tracing::info!("Connected to PostgreSQL");

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| eyre::eyre!("Failed to run migrations: {}", e))?;

    tracing::info!("Database migrations complete");

    let runner = DetectionRunner::new(pool.clone(), config.detection.clone());

    // Spawn API server
    if config.api.enabled {
        let api_pool = pool.clone();
        let api_runner = Arc::clone(&runner);
        let host = config.api.host.clone();
        let port = config.api.port;
        tokio::spawn(async move {
            if let Err(e) = chainwatch_detector::api::serve(api_pool, api_runner, &host, port).await
            {
                tracing::error!(error = %e, "API server failed");
            }
        });
    }

    // Create shutdown signal
    let shutdown = CancellationToken::new();

    // Spawn the detection scheduler. Triggers coalesce with any run already
    // started through the API thanks to the runner's single-flight token.
    let scheduler_shutdown = shutdown.clone();
    let scheduler_runner = Arc::clone(&runner);
    let interval_secs = config.detection.interval_secs.max(1);
    let scheduler = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = scheduler_shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match scheduler_runner.trigger().await {
                        RunOutcome::Completed(summary) => {
                            tracing::debug!(
                                wallets = summary.wallets_profiled,
                                alerts = summary.alerts_generated,
                                "Scheduled detection run finished"
                            );
                        }
                        RunOutcome::AlreadyRunning => {
                            tracing::debug!("Scheduled tick skipped, run already active");
                        }
                        RunOutcome::TimedOut => {
                            tracing::warn!("Scheduled detection run timed out");
                        }
                        RunOutcome::Failed(e) => {
                            tracing::warn!(error = %e, "Scheduled detection run failed, will retry next tick");
                        }
                    }
                }
            }
        }
    });

    tracing::info!("Detection scheduler started. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping...");
    shutdown.cancel();

    let _ = scheduler.await;

    tracing::info!("ChainWatch Detector stopped gracefully");
    Ok(())
}
