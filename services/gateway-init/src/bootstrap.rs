//! Workspace bootstrap.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::EntrypointConfig;
use crate::setup::StepOutcome;

/// Copy the tree at `src` into `dst`, returning the number of files copied.
///
/// Existing files in `dst` are left alone unless `overwrite` is set.
pub fn copy_tree(src: &Path, dst: &Path, overwrite: bool) -> io::Result<usize> {
    let mut copied = 0;

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if target.exists() && !overwrite {
                debug!(path = %target.display(), "keeping existing file");
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Cold-path step: make sure the workspace exists and seed it from the template.
pub async fn run(config: &EntrypointConfig) -> anyhow::Result<StepOutcome> {
    let paths = &config.paths;
    tokio::fs::create_dir_all(&paths.workspace_dir).await?;
    tokio::fs::create_dir_all(&paths.skills_dir).await?;

    if !paths.workspace_template.is_dir() {
        return Ok(StepOutcome::Skipped("no workspace template".into()));
    }

    let src = paths.workspace_template.clone();
    let dst = paths.workspace_dir.clone();
    let copied = tokio::task::spawn_blocking(move || copy_tree(&src, &dst, false)).await??;

    info!(copied, "workspace seeded from template");
    Ok(StepOutcome::Ok)
}
