use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use banking_withdrawals::infrastructure::init::init_all_services;
use banking_withdrawals::infrastructure::logging::init_logging;
use banking_withdrawals::{create_router, AppConfig, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let _log_guards = init_logging(&config.logging)?;

    info!("Starting banking withdrawal service");

    let context = init_all_services(&config).await?;
    let app = create_router(AppState {
        withdrawal_service: context.withdrawal_service.clone(),
    });

    let addr = config.server.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    context.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
