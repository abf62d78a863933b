//! Sandbox entrypoint for the gateway.
//!
//! This binary is the container's startup command and is responsible for:
//! - Refusing to double-supervise when the gateway port already answers
//! - One-time cold-start setup (restore, onboarding, config patch, doctor)
//! - Background sync of state to remote storage
//! - Supervising the gateway process forever
//!
//! Every crash-triggered re-invocation finds the setup marker and skips
//! straight to supervision.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{info, warn};

mod bootstrap;
mod command;
mod config;
mod doctor;
mod error;
mod gate;
mod logging;
mod onboard;
mod patch;
mod probe;
mod restore;
mod setup;
mod storage;
mod supervisor;
mod sync;

use config::EntrypointConfig;
use gate::{SetupGate, StartKind};
use storage::{ObjectStore, RcloneStore};
use supervisor::{GatewayLauncher, Supervisor};
use sync::SyncLoop;

/// Entrypoint version (semver).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Operations log path.
pub const OPS_LOG_PATH: &str = "/tmp/harbor-init.log";

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    if let Err(e) = logging::init(OPS_LOG_PATH) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::from(1);
    }

    let config = EntrypointConfig::from_env();
    info!(
        version = VERSION,
        port = config.gateway_port,
        storage = config.storage.is_some(),
        "gateway-init starting"
    );

    let store: Option<Arc<dyn ObjectStore>> = config
        .storage
        .as_ref()
        .map(|_| Arc::new(RcloneStore::new(&config)) as Arc<dyn ObjectStore>);

    if boot(&config, store.clone()).await.is_none() {
        return ExitCode::SUCCESS;
    }

    if let Some(store) = store {
        SyncLoop::new(store, config.paths.clone(), config.timeouts.sync_interval).spawn();
    }

    let supervisor = Supervisor::new(GatewayLauncher::new(&config), &config);
    match supervisor.run().await {}
}

/// Port guard, then the setup gate.
///
/// Returns `None` without touching any state when a gateway already answers
/// on the port; the caller exits instead of supervising a second one.
async fn boot(
    config: &EntrypointConfig,
    store: Option<Arc<dyn ObjectStore>>,
) -> Option<StartKind> {
    if probe::is_listening(config.gateway_port, config.timeouts.port_guard).await {
        info!(
            port = config.gateway_port,
            "gateway already listening, not starting another"
        );
        return None;
    }
    Some(prepare(config, store).await)
}

/// Run the cold path if this container has not completed it yet.
async fn prepare(config: &EntrypointConfig, store: Option<Arc<dyn ObjectStore>>) -> StartKind {
    let gate = SetupGate::new(&config.paths);
    let kind = gate.check();

    match kind {
        StartKind::Warm => info!("setup already complete, starting gateway"),
        StartKind::Cold => {
            setup::cold_start(config, store).await;
            match gate.mark_complete() {
                Ok(true) => info!("setup marker written"),
                Ok(false) => warn!("no config after setup, cold path will run again next start"),
                Err(e) => warn!(error = %e, "failed to write setup marker"),
            }
        }
    }

    kind
}
