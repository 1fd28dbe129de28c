// Lifecycle server entry point

use anyhow::{Context, Result};
use lifecycle_durable::WakeScheduler;
use lifecycle_server::{build_executor, router, telemetry, AppState, ServerConfig};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    tracing::info!("lifecycle-server starting...");

    let config = ServerConfig::from_env().context("Invalid configuration")?;
    let executor = build_executor(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = WakeScheduler::new(executor.clone(), config.scheduler.clone(), shutdown_rx)
        .spawn();
    tracing::info!(
        min_interval = ?config.scheduler.min_interval,
        max_interval = ?config.scheduler.max_interval,
        "Wake scheduler started"
    );

    let app = router(AppState::new(executor));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Stopping wake scheduler");
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler.await {
        tracing::error!(error = %e, "wake scheduler task failed");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
