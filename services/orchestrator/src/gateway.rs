//! Gateway reconciliation.
//!
//! [`GatewayManager::ensure_gateway`] converges the sandbox to exactly one
//! reachable gateway:
//!
//! 1. Find a live process whose command line looks like the gateway
//! 2. Probe its port; reuse it if it answers, otherwise kill it
//! 3. Start the entrypoint and wait for the port with the cold-start timeout
//!
//! Transient host resets are retried with a fixed delay. Concurrent callers
//! share one manager; no lock is held across runtime calls, so racing
//! callers may both start a gateway and the in-container port guard
//! resolves the duplicate.

use std::sync::Arc;
use std::time::Duration;

use harbor_reconcile::RetryPolicy;
use tracing::{debug, info, warn};

use crate::cache::ProcessCache;
use crate::env::EnvironmentBundle;
use crate::error::OrchestratorError;
use crate::runtime::{ContainerRuntime, GatewayProcess, ProcessLogs, ProcessStatus};

/// Command-line fragments that identify the gateway or its entrypoint.
const GATEWAY_SIGNATURES: &[&str] = &["gateway-init", "openclaw gateway"];

/// Command-line fragments of short-lived CLI invocations that are not the gateway.
const CLI_SIGNATURES: &[&str] = &[
    "openclaw gateway call",
    "openclaw gateway status",
    "openclaw devices",
    "openclaw onboard",
    "openclaw --version",
];

/// Whether a command line belongs to the gateway rather than a CLI call.
pub fn is_gateway_command(command: &str) -> bool {
    GATEWAY_SIGNATURES.iter().any(|s| command.contains(s))
        && !CLI_SIGNATURES.iter().any(|s| command.contains(s))
}

/// Reconciliation settings.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Command that launches the in-container entrypoint.
    pub startup_command: String,

    /// Port the gateway listens on.
    pub port: u16,

    /// Liveness probe timeout for an existing process.
    pub probe_timeout: Duration,

    /// Port wait after a fresh start (covers the full cold path).
    pub startup_timeout: Duration,

    /// Transient-failure retry policy.
    pub retry: RetryPolicy,

    /// Lifetime of the discovered-process cache.
    pub cache_ttl: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            startup_command: "/usr/local/bin/gateway-init".to_string(),
            port: 18789,
            probe_timeout: Duration::from_secs(15),
            startup_timeout: Duration::from_secs(180),
            retry: RetryPolicy::default(),
            cache_ttl: crate::cache::DEFAULT_PROCESS_TTL,
        }
    }
}

/// Keeps one gateway running in the sandbox.
pub struct GatewayManager {
    runtime: Arc<dyn ContainerRuntime>,
    env: EnvironmentBundle,
    settings: GatewaySettings,
    cache: ProcessCache,
}

impl GatewayManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        env: EnvironmentBundle,
        settings: GatewaySettings,
    ) -> Self {
        let cache = ProcessCache::new(settings.cache_ttl);
        Self {
            runtime,
            env,
            settings,
            cache,
        }
    }

    /// Return a reachable gateway, starting one if necessary.
    pub async fn ensure_gateway(&self) -> Result<GatewayProcess, OrchestratorError> {
        let retry = self.settings.retry;
        let mut attempt = 1;

        loop {
            match self.ensure_once().await {
                Ok(process) => return Ok(process),
                Err(e) if e.is_transient() && retry.should_retry(attempt) => {
                    warn!(
                        attempt,
                        max_attempts = retry.max_attempts,
                        delay_secs = retry.delay.as_secs(),
                        error = %e,
                        "transient runtime failure, retrying"
                    );
                    tokio::time::sleep(retry.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempt, error = %e, reason = e.reason_code(), "ensure_gateway failed");
                    return Err(e);
                }
            }
        }
    }

    async fn ensure_once(&self) -> Result<GatewayProcess, OrchestratorError> {
        if let Some(existing) = self.find_existing().await? {
            match self
                .runtime
                .wait_for_port(&existing.id, self.settings.port, self.settings.probe_timeout)
                .await
            {
                Ok(()) => {
                    debug!(id = %existing.id, "reusing running gateway");
                    return Ok(existing);
                }
                Err(e) if e.is_transient() => return Err(e.into()),
                Err(e) => {
                    warn!(id = %existing.id, error = %e, "gateway unresponsive, replacing it");
                    self.kill(&existing.id).await;
                }
            }
        }

        self.start_fresh().await
    }

    /// Find a live gateway process, preferring one already running.
    pub async fn find_existing(&self) -> Result<Option<GatewayProcess>, OrchestratorError> {
        if let Some(cached) = self.cache.get().await {
            return Ok(Some(cached));
        }

        let processes = self.runtime.list_processes().await?;
        let candidates: Vec<GatewayProcess> = processes
            .into_iter()
            .filter(|p| p.status.is_live() && is_gateway_command(&p.command))
            .collect();

        let found = candidates
            .iter()
            .find(|p| p.status == ProcessStatus::Running)
            .or_else(|| candidates.first())
            .cloned();

        if let Some(process) = &found {
            debug!(id = %process.id, status = ?process.status, "found gateway process");
            self.cache.put(process.clone()).await;
        }
        Ok(found)
    }

    async fn start_fresh(&self) -> Result<GatewayProcess, OrchestratorError> {
        info!(
            command = %self.settings.startup_command,
            vars = self.env.len(),
            "starting gateway entrypoint"
        );

        let process = self
            .runtime
            .start_process(&self.settings.startup_command, &self.env)
            .await
            .map_err(OrchestratorError::LaunchFailed)?;
        self.cache.invalidate().await;

        match self
            .runtime
            .wait_for_port(&process.id, self.settings.port, self.settings.startup_timeout)
            .await
        {
            Ok(()) => {
                info!(id = %process.id, port = self.settings.port, "gateway is reachable");
                Ok(process)
            }
            Err(e) => {
                let logs = match self.runtime.process_logs(&process.id).await {
                    Ok(logs) => logs,
                    Err(log_err) => {
                        warn!(id = %process.id, error = %log_err, "could not fetch gateway logs");
                        ProcessLogs::default()
                    }
                };
                Err(OrchestratorError::Unreachable {
                    process_id: process.id,
                    port: self.settings.port,
                    reason: e.to_string(),
                    stdout: logs.stdout,
                    stderr: logs.stderr,
                })
            }
        }
    }

    async fn kill(&self, id: &str) {
        if let Err(e) = self.runtime.kill_process(id).await {
            warn!(id, error = %e, "failed to kill gateway process");
        }
        self.cache.invalidate().await;
    }

    /// Kill the current gateway (if any) and bring up a fresh one.
    pub async fn restart(&self) -> Result<GatewayProcess, OrchestratorError> {
        if let Some(existing) = self.find_existing().await? {
            info!(id = %existing.id, "restarting gateway");
            self.kill(&existing.id).await;
        }
        self.cache.invalidate().await;
        self.ensure_gateway().await
    }

    /// Every process the runtime reports.
    pub async fn processes(&self) -> Result<Vec<GatewayProcess>, OrchestratorError> {
        Ok(self.runtime.list_processes().await?)
    }

    /// The current gateway and its captured output.
    pub async fn gateway_logs(
        &self,
    ) -> Result<Option<(GatewayProcess, ProcessLogs)>, OrchestratorError> {
        let Some(process) = self.find_existing().await? else {
            return Ok(None);
        };
        let logs = self.runtime.process_logs(&process.id).await?;
        Ok(Some((process, logs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/usr/local/bin/gateway-init", true)]
    #[case("openclaw gateway --port 18789 --verbose", true)]
    #[case("openclaw gateway call health", false)]
    #[case("openclaw gateway status", false)]
    #[case("openclaw devices list", false)]
    #[case("openclaw onboard --non-interactive", false)]
    #[case("openclaw --version", false)]
    #[case("rclone sync /root/clawd r2:bucket/workspace/", false)]
    fn test_gateway_signature(#[case] command: &str, #[case] expected: bool) {
        assert_eq!(is_gateway_command(command), expected);
    }
}
