//! Cold-path step runner.
//!
//! The cold path is a fixed sequence of named steps. Each step returns a
//! [`StepOutcome`]; errors are logged as warnings and the sequence carries on,
//! so the gateway starts even when every step fails.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::config::EntrypointConfig;
use crate::error::InitError;
use crate::storage::{self, ObjectStore};
use crate::{bootstrap, doctor, onboard, patch, restore};

/// Result of a single cold-path step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Ok,
    Skipped(String),
    Warning(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub name: &'static str,
    pub outcome: StepOutcome,
}

/// Runs steps in order, recording each outcome.
#[derive(Debug, Default)]
pub struct StepRunner {
    reports: Vec<StepReport>,
}

impl StepRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one step. Errors become [`StepOutcome::Warning`].
    pub async fn step<Fut>(&mut self, name: &'static str, fut: Fut) -> &StepOutcome
    where
        Fut: Future<Output = anyhow::Result<StepOutcome>>,
    {
        let started = Instant::now();
        let outcome = match fut.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = e
                    .downcast_ref::<InitError>()
                    .map(InitError::reason_code)
                    .unwrap_or("step_failed");
                let message = format!("{e:#}");
                warn!(step = name, reason, error = %message, "setup step failed");
                StepOutcome::Warning(message)
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            StepOutcome::Ok => info!(step = name, elapsed_ms, "setup step complete"),
            StepOutcome::Skipped(reason) => info!(step = name, reason = %reason, "setup step skipped"),
            StepOutcome::Warning(message) => {
                warn!(step = name, elapsed_ms, message = %message, "setup step finished with warnings")
            }
        }

        self.reports.push(StepReport { name, outcome });
        &self.reports[self.reports.len() - 1].outcome
    }

    pub fn into_reports(self) -> Vec<StepReport> {
        self.reports
    }
}

/// Run the full cold path.
pub async fn cold_start(
    config: &EntrypointConfig,
    store: Option<Arc<dyn ObjectStore>>,
) -> Vec<StepReport> {
    let mut runner = StepRunner::new();

    runner
        .step("storage_credentials", storage::write_credentials(config))
        .await;
    runner.step("restore", restore::run(config, store)).await;
    runner.step("onboard", onboard::run(config)).await;
    runner.step("config_patch", patch::run(config)).await;
    runner.step("doctor", doctor::run(config)).await;
    runner.step("workspace_bootstrap", bootstrap::run(config)).await;

    let reports = runner.into_reports();
    let warnings = reports
        .iter()
        .filter(|r| matches!(r.outcome, StepOutcome::Warning(_)))
        .count();
    info!(steps = reports.len(), warnings, "cold start setup finished");
    reports
}
