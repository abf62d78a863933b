//! Harbor orchestrator
//!
//! Serves the gateway-facing HTTP API and reconciles the gateway process
//! inside the sandbox through the runtime control API.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use harbor_orchestrator::api::{self, AppState};
use harbor_orchestrator::config::Config;
use harbor_orchestrator::{GatewayManager, HttpRuntime};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing; RUST_LOG wins over HARBOR_LOG_LEVEL
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        listen_addr = %config.listen_addr,
        runtime_url = %config.runtime_url,
        startup_command = %config.gateway.startup_command,
        forwarded_vars = config.env.len(),
        "Configuration loaded"
    );

    let runtime = HttpRuntime::new(&config.runtime_url).context("failed to build runtime client")?;
    let manager = GatewayManager::new(Arc::new(runtime), config.env.clone(), config.gateway.clone());
    let app = api::create_router(AppState {
        manager: Arc::new(manager),
    });

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("HTTP server shutting down");
        })
        .await;

    match result {
        Ok(()) => info!("Orchestrator shutdown complete"),
        Err(e) => {
            error!(error = %e, "Server error");
            return Err(e.into());
        }
    }
    Ok(())
}
