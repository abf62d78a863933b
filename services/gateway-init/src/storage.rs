//! Remote object storage access.
//!
//! Restore and sync talk to storage through the [`ObjectStore`] trait. The
//! production implementation shells out to `rclone` against an `r2:` remote
//! whose definition is written by [`write_credentials`].

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::command::run_bounded;
use crate::config::{EntrypointConfig, StorageCredentials};
use crate::error::InitError;
use crate::setup::StepOutcome;

/// Name of the rclone remote.
const REMOTE_NAME: &str = "r2";

/// Flags passed to every transfer.
const TRANSFER_FLAGS: &[&str] = &[
    "--transfers=16",
    "--fast-list",
    "--s3-no-check-bucket",
    "--contimeout=10s",
    "--timeout=30s",
    "--retries=3",
];

/// Upper bound for a single rclone invocation. The restore deadline cuts
/// this short on cold start.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Remote object storage operations. Prefixes are relative to the bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List entry names directly under `prefix`. A missing prefix lists as empty.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, InitError>;

    /// Copy everything under `prefix` into `local`.
    async fn copy_down(&self, prefix: &str, local: &Path) -> Result<(), InitError>;

    /// Mirror `local` onto `prefix`, skipping `excludes` globs.
    async fn sync_up(&self, local: &Path, prefix: &str, excludes: &[&str])
        -> Result<(), InitError>;
}

/// rclone-backed store.
pub struct RcloneStore {
    bin: String,
    bucket: String,
    config_path: String,
}

impl RcloneStore {
    /// Create a store for the configured bucket.
    pub fn new(config: &EntrypointConfig) -> Self {
        Self {
            bin: config.rclone_bin.clone(),
            bucket: config.bucket.clone(),
            config_path: config.paths.rclone_config.display().to_string(),
        }
    }

    fn remote(&self, prefix: &str) -> String {
        format!("{}:{}/{}", REMOTE_NAME, self.bucket, prefix)
    }

    fn base_args(&self, subcommand: &str) -> Vec<String> {
        vec![
            subcommand.to_string(),
            format!("--config={}", self.config_path),
        ]
    }
}

#[async_trait]
impl ObjectStore for RcloneStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, InitError> {
        let mut args = self.base_args("lsf");
        args.push(self.remote(prefix));

        match run_bounded(&self.bin, &args, TRANSFER_TIMEOUT).await {
            Ok(out) => Ok(parse_listing(&out.stdout)),
            Err(InitError::CommandFailed { stderr, .. }) if is_missing_directory(&stderr) => {
                debug!(prefix, "remote prefix does not exist");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn copy_down(&self, prefix: &str, local: &Path) -> Result<(), InitError> {
        tokio::fs::create_dir_all(local).await?;

        let mut args = self.base_args("copy");
        args.push(self.remote(prefix));
        args.push(local.display().to_string());
        args.extend(TRANSFER_FLAGS.iter().map(|f| f.to_string()));

        run_bounded(&self.bin, &args, TRANSFER_TIMEOUT).await?;
        Ok(())
    }

    async fn sync_up(
        &self,
        local: &Path,
        prefix: &str,
        excludes: &[&str],
    ) -> Result<(), InitError> {
        let mut args = self.base_args("sync");
        args.push(local.display().to_string());
        args.push(self.remote(prefix));
        args.extend(TRANSFER_FLAGS.iter().map(|f| f.to_string()));
        args.extend(excludes.iter().map(|e| format!("--exclude={e}")));

        run_bounded(&self.bin, &args, TRANSFER_TIMEOUT).await?;
        Ok(())
    }
}

/// Split `lsf` output into entry names (directories keep their trailing `/`).
pub fn parse_listing(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_missing_directory(stderr: &str) -> bool {
    stderr.contains("directory not found")
}

/// Render the rclone remote definition for R2.
pub fn render_remote_config(creds: &StorageCredentials) -> String {
    format!(
        "[{REMOTE_NAME}]\n\
         type = s3\n\
         provider = Cloudflare\n\
         access_key_id = {}\n\
         secret_access_key = {}\n\
         endpoint = https://{}.r2.cloudflarestorage.com\n\
         acl = private\n\
         no_check_bucket = true\n",
        creds.access_key_id, creds.secret_access_key, creds.account_id
    )
}

/// Write the rclone remote definition (mode 0600).
pub async fn write_credentials(config: &EntrypointConfig) -> anyhow::Result<StepOutcome> {
    let Some(creds) = &config.storage else {
        return Ok(StepOutcome::Skipped("remote storage not configured".into()));
    };

    let path = &config.paths.rclone_config;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, render_remote_config(creds)).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    Ok(StepOutcome::Ok)
}
