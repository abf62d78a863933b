//! Background sync to remote storage.
//!
//! Every interval the loop looks for files changed since the last successful
//! cycle and, only if there are any, mirrors config, workspace and skills to
//! storage. Each target is transferred even if another fails. The sync
//! marker's mtime is the change cursor: it is advanced to
//! the cycle's start time only when all three transfers succeed.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::{
    Paths, REMOTE_CONFIG_PREFIX, REMOTE_SKILLS_PREFIX, REMOTE_WORKSPACE_PREFIX,
};
use crate::error::InitError;
use crate::storage::ObjectStore;

const CONFIG_EXCLUDES: &[&str] = &["*.lock", "*.log", "*.tmp", ".git/**"];
const WORKSPACE_EXCLUDES: &[&str] = &["skills/**", ".git/**", "node_modules/**"];
const SKILLS_EXCLUDES: &[&str] = &[];

/// Path components never considered for change detection.
const IGNORED_COMPONENTS: &[&str] = &[".git", "node_modules"];

/// Result of one sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing changed; no transfer was attempted.
    NoChanges,
    /// All targets synced; carries the number of changed files.
    Synced(usize),
}

pub struct SyncLoop {
    store: Arc<dyn ObjectStore>,
    paths: Paths,
    interval: Duration,
}

impl SyncLoop {
    pub fn new(store: Arc<dyn ObjectStore>, paths: Paths, interval: Duration) -> Self {
        Self {
            store,
            paths,
            interval,
        }
    }

    /// Detach the loop. It never finishes on its own.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "sync loop started");
            loop {
                tokio::time::sleep(self.interval).await;
                match self.run_cycle().await {
                    Ok(CycleOutcome::NoChanges) => debug!("no changes to sync"),
                    Ok(CycleOutcome::Synced(changed)) => info!(changed, "sync complete"),
                    Err(e) => warn!(
                        error = %e,
                        reason = e.reason_code(),
                        "sync failed, will retry next cycle"
                    ),
                }
            }
        })
    }

    /// Run one cycle: detect changes, transfer, advance the cursor.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, InitError> {
        let cycle_start = SystemTime::now();

        let roots = [self.paths.config_dir.clone(), self.paths.workspace_dir.clone()];
        let marker = self.paths.sync_marker.clone();
        let changed =
            tokio::task::spawn_blocking(move || changed_files(&roots, &marker).len())
                .await
                .map_err(std::io::Error::other)?;

        if changed == 0 {
            return Ok(CycleOutcome::NoChanges);
        }
        debug!(changed, "changes detected, syncing");

        let mut targets = vec![
            (&self.paths.config_dir, REMOTE_CONFIG_PREFIX, CONFIG_EXCLUDES),
            (&self.paths.workspace_dir, REMOTE_WORKSPACE_PREFIX, WORKSPACE_EXCLUDES),
        ];
        if self.paths.skills_dir.is_dir() {
            targets.push((&self.paths.skills_dir, REMOTE_SKILLS_PREFIX, SKILLS_EXCLUDES));
        }

        let mut first_error = None;
        for (local, prefix, excludes) in targets {
            if let Err(e) = self.store.sync_up(local, prefix, excludes).await {
                warn!(prefix, error = %e, reason = e.reason_code(), "target sync failed");
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        advance_marker(&self.paths.sync_marker, cycle_start)?;
        let stamp: DateTime<Utc> = cycle_start.into();
        tokio::fs::write(&self.paths.last_sync_file, stamp.to_rfc3339()).await?;

        Ok(CycleOutcome::Synced(changed))
    }
}

fn is_ignored(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| IGNORED_COMPONENTS.contains(&name))
        .unwrap_or(false)
}

/// Files under `roots` modified after the marker's mtime. A missing marker
/// means every file counts.
pub fn changed_files(roots: &[PathBuf], marker: &Path) -> Vec<PathBuf> {
    let since = std::fs::metadata(marker).and_then(|m| m.modified()).ok();

    roots
        .iter()
        .filter(|root| root.is_dir())
        .flat_map(|root| {
            WalkDir::new(root)
                .into_iter()
                .filter_entry(|e| !is_ignored(e))
                .filter_map(|e| e.ok())
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| match since {
            None => true,
            Some(since) => e
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(|modified| modified > since)
                .unwrap_or(true),
        })
        .map(|e| e.into_path())
        .collect()
}

/// Set the marker's mtime to `at`, creating it if needed.
fn advance_marker(marker: &Path, at: SystemTime) -> std::io::Result<()> {
    if let Some(parent) = marker.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::options().create(true).append(true).open(marker)?;
    file.set_modified(at)
}
