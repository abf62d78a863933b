//! Cold-start restore from remote storage.
//!
//! Config, workspace and skills are restored by three independent tasks
//! joined under one hard deadline. When the deadline passes the remaining
//! tasks are aborted (their transfer processes are killed on drop) and the
//! entrypoint carries on with whatever landed locally.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

use crate::config::{
    EntrypointConfig, CONFIG_FILE_NAME, LEGACY_CONFIG_FILE_NAME, REMOTE_CONFIG_PREFIX,
    REMOTE_LEGACY_CONFIG_PREFIX, REMOTE_SKILLS_PREFIX, REMOTE_WORKSPACE_PREFIX,
};
use crate::error::InitError;
use crate::setup::StepOutcome;
use crate::storage::ObjectStore;

/// What is being restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreTarget {
    Config,
    Workspace,
    Skills,
}

impl fmt::Display for RestoreTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreTarget::Config => write!(f, "config"),
            RestoreTarget::Workspace => write!(f, "workspace"),
            RestoreTarget::Skills => write!(f, "skills"),
        }
    }
}

/// Result of restoring one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Data was copied down.
    Restored,
    /// Nothing to restore remotely.
    Absent,
    /// The restore failed.
    Failed(String),
    /// The deadline passed before the restore finished.
    TimedOut,
}

/// Per-target restore results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub config: RestoreOutcome,
    pub workspace: RestoreOutcome,
    pub skills: RestoreOutcome,
}

impl Default for RestoreReport {
    fn default() -> Self {
        Self {
            config: RestoreOutcome::TimedOut,
            workspace: RestoreOutcome::TimedOut,
            skills: RestoreOutcome::TimedOut,
        }
    }
}

impl RestoreReport {
    fn set(&mut self, target: RestoreTarget, outcome: RestoreOutcome) {
        match target {
            RestoreTarget::Config => self.config = outcome,
            RestoreTarget::Workspace => self.workspace = outcome,
            RestoreTarget::Skills => self.skills = outcome,
        }
    }

    fn outcomes(&self) -> [(RestoreTarget, &RestoreOutcome); 3] {
        [
            (RestoreTarget::Config, &self.config),
            (RestoreTarget::Workspace, &self.workspace),
            (RestoreTarget::Skills, &self.skills),
        ]
    }

    /// Targets that did not end as `Restored` or `Absent`.
    pub fn problems(&self) -> Vec<String> {
        self.outcomes()
            .into_iter()
            .filter_map(|(target, outcome)| match outcome {
                RestoreOutcome::Failed(e) => Some(format!("{target}: {e}")),
                RestoreOutcome::TimedOut => Some(format!("{target}: timed out")),
                _ => None,
            })
            .collect()
    }
}

/// Cold-path step: restore from storage if it is configured.
pub async fn run(
    config: &EntrypointConfig,
    store: Option<Arc<dyn ObjectStore>>,
) -> anyhow::Result<StepOutcome> {
    let Some(store) = store else {
        return Ok(StepOutcome::Skipped("remote storage not configured".into()));
    };

    let paths = &config.paths;
    let report = restore_all(
        store,
        paths.config_dir.clone(),
        paths.workspace_dir.clone(),
        paths.skills_dir.clone(),
        config.timeouts.restore,
    )
    .await;

    let problems = report.problems();
    if problems.is_empty() {
        Ok(StepOutcome::Ok)
    } else {
        Ok(StepOutcome::Warning(problems.join("; ")))
    }
}

/// Restore all three targets concurrently, bounded by `deadline`.
pub async fn restore_all(
    store: Arc<dyn ObjectStore>,
    config_dir: PathBuf,
    workspace_dir: PathBuf,
    skills_dir: PathBuf,
    deadline: Duration,
) -> RestoreReport {
    let started = Instant::now();
    let mut tasks = JoinSet::new();

    tasks.spawn({
        let store = Arc::clone(&store);
        async move {
            let result = restore_config(store.as_ref(), &config_dir).await;
            (RestoreTarget::Config, result)
        }
    });
    tasks.spawn({
        let store = Arc::clone(&store);
        async move {
            let result = restore_prefix(store.as_ref(), REMOTE_WORKSPACE_PREFIX, &workspace_dir).await;
            (RestoreTarget::Workspace, result)
        }
    });
    tasks.spawn({
        let store = Arc::clone(&store);
        async move {
            let result = restore_prefix(store.as_ref(), REMOTE_SKILLS_PREFIX, &skills_dir).await;
            (RestoreTarget::Skills, result)
        }
    });

    let mut report = RestoreReport::default();
    let deadline_at = started + deadline;

    loop {
        match timeout_at(deadline_at, tasks.join_next()).await {
            Ok(Some(Ok((target, result)))) => {
                let outcome = match result {
                    Ok(outcome) => outcome,
                    Err(e) => RestoreOutcome::Failed(e.to_string()),
                };
                match &outcome {
                    RestoreOutcome::Failed(e) => {
                        warn!(target = %target, error = %e, "restore failed")
                    }
                    other => info!(target = %target, outcome = ?other, "restore finished"),
                }
                report.set(target, outcome);
            }
            Ok(Some(Err(e))) => {
                // Panicked task: its slot stays TimedOut, which is reported as a problem.
                warn!(error = %e, "restore task failed to complete");
            }
            Ok(None) => break,
            Err(_) => {
                warn!(
                    deadline_secs = deadline.as_secs(),
                    remaining = tasks.len(),
                    "restore deadline exceeded, aborting outstanding restores"
                );
                tasks.abort_all();
                break;
            }
        }
    }

    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "restore complete"
    );
    report
}

/// Restore the config directory, falling back to the legacy layout.
async fn restore_config(
    store: &dyn ObjectStore,
    config_dir: &Path,
) -> Result<RestoreOutcome, InitError> {
    let listing = store.list(REMOTE_CONFIG_PREFIX).await?;
    if listing.iter().any(|entry| entry == CONFIG_FILE_NAME) {
        store.copy_down(REMOTE_CONFIG_PREFIX, config_dir).await?;
        return Ok(RestoreOutcome::Restored);
    }

    let legacy = store.list(REMOTE_LEGACY_CONFIG_PREFIX).await?;
    if legacy.iter().any(|entry| entry == LEGACY_CONFIG_FILE_NAME) {
        info!("restoring config from legacy layout");
        store
            .copy_down(REMOTE_LEGACY_CONFIG_PREFIX, config_dir)
            .await?;
        adopt_legacy_config(config_dir).await?;
        return Ok(RestoreOutcome::Restored);
    }

    Ok(RestoreOutcome::Absent)
}

/// Rename the legacy artifact to the primary name unless the primary exists.
///
/// A hard link fails atomically when the target exists, so a primary
/// artifact created concurrently is never overwritten.
async fn adopt_legacy_config(config_dir: &Path) -> Result<(), InitError> {
    let legacy = config_dir.join(LEGACY_CONFIG_FILE_NAME);
    let primary = config_dir.join(CONFIG_FILE_NAME);

    match tokio::fs::hard_link(&legacy, &primary).await {
        Ok(()) => {
            tokio::fs::remove_file(&legacy).await?;
            info!(path = %primary.display(), "adopted legacy config");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            info!("primary config already present, keeping it");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn restore_prefix(
    store: &dyn ObjectStore,
    prefix: &str,
    local: &Path,
) -> Result<RestoreOutcome, InitError> {
    if store.list(prefix).await?.is_empty() {
        return Ok(RestoreOutcome::Absent);
    }
    store.copy_down(prefix, local).await?;
    Ok(RestoreOutcome::Restored)
}
