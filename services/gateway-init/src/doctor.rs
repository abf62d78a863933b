//! Doctor fix with snapshot and rollback.
//!
//! The automated repair may rewrite the config. Before it runs the current
//! bytes are snapshotted; afterwards the result must still be a JSON object
//! and must not contain any protected secret that the snapshot did not
//! already contain. A violating result is replaced by the snapshot.

use std::future::Future;
use std::path::Path;

use serde_json::Value;
use tracing::{info, warn};

use crate::command::run_bounded;
use crate::config::EntrypointConfig;
use crate::setup::StepOutcome;

/// What happened to the guarded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    /// The mutation's result was kept.
    Kept,
    /// The mutation's result violated a rule and the snapshot was restored.
    RolledBack(String),
}

/// Check the post-mutation document against the pre-mutation snapshot.
pub fn validate(
    before: Option<&[u8]>,
    after: &[u8],
    protected: &[String],
) -> Result<(), String> {
    let document: Value =
        serde_json::from_slice(after).map_err(|e| format!("config is no longer valid JSON: {e}"))?;
    if !document.is_object() {
        return Err("config root is no longer an object".to_string());
    }

    let before = before.map(String::from_utf8_lossy).unwrap_or_default();
    let after = String::from_utf8_lossy(after);
    let leaked = protected
        .iter()
        .filter(|secret| !secret.is_empty())
        .filter(|secret| after.contains(secret.as_str()) && !before.contains(secret.as_str()))
        .count();

    if leaked > 0 {
        return Err(format!("{leaked} secret value(s) written into config"));
    }
    Ok(())
}

/// Run `mutate` against `path`, rolling back if the result fails validation.
pub async fn guarded_mutation<F, Fut>(
    path: &Path,
    protected: &[String],
    mutate: F,
) -> anyhow::Result<GuardOutcome>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let snapshot = match tokio::fs::read(path).await {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    let mutation = mutate().await;

    let after = match tokio::fs::read(path).await {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    let verdict = match &after {
        Some(after) => validate(snapshot.as_deref(), after, protected),
        None if snapshot.is_some() => Err("config was removed".to_string()),
        None => Ok(()),
    };

    match verdict {
        Ok(()) => {
            mutation?;
            Ok(GuardOutcome::Kept)
        }
        Err(reason) => {
            warn!(path = %path.display(), reason = %reason, "rolling back config mutation");
            match &snapshot {
                Some(bytes) => tokio::fs::write(path, bytes).await?,
                None => tokio::fs::remove_file(path).await?,
            }
            if let Err(e) = mutation {
                warn!(error = %e, "mutation also reported an error");
            }
            Ok(GuardOutcome::RolledBack(reason))
        }
    }
}

/// Cold-path step: `doctor --fix --non-interactive` under the guard.
pub async fn run(config: &EntrypointConfig) -> anyhow::Result<StepOutcome> {
    let path = config.paths.config_file();
    if !path.is_file() {
        return Ok(StepOutcome::Skipped("no config to repair".into()));
    }

    let args: Vec<String> = ["doctor", "--fix", "--non-interactive"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let protected = config.protected_secrets();

    let outcome = guarded_mutation(&path, &protected, || async {
        run_bounded(&config.gateway_bin, &args, config.timeouts.doctor).await?;
        Ok(())
    })
    .await?;

    match outcome {
        GuardOutcome::Kept => {
            info!("doctor fix applied");
            Ok(StepOutcome::Ok)
        }
        GuardOutcome::RolledBack(reason) => Ok(StepOutcome::Warning(format!(
            "doctor result rejected: {reason}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn secrets() -> Vec<String> {
        vec!["sk-ant-secret".to_string(), "tg-token".to_string()]
    }

    #[test]
    fn test_validate_accepts_object() {
        assert!(validate(Some(b"{}"), br#"{"a":1}"#, &secrets()).is_ok());
    }

    #[test]
    fn test_validate_rejects_non_object() {
        assert!(validate(Some(b"{}"), b"[1,2]", &secrets()).is_err());
        assert!(validate(Some(b"{}"), b"{ truncated", &secrets()).is_err());
    }

    #[test]
    fn test_validate_rejects_new_secret() {
        let err = validate(Some(b"{}"), br#"{"key":"sk-ant-secret"}"#, &secrets()).unwrap_err();
        assert!(err.contains("1 secret"));
        assert!(!err.contains("sk-ant-secret"));
    }

    #[test]
    fn test_validate_allows_existing_secret() {
        let before = br#"{"channels":{"telegram":{"botToken":"tg-token"}}}"#;
        let after = br#"{"channels":{"telegram":{"botToken":"tg-token","enabled":true}}}"#;
        assert!(validate(Some(before), after, &secrets()).is_ok());
    }

    #[tokio::test]
    async fn test_guard_keeps_valid_result() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("openclaw.json");
        fs::write(&path, "{}").unwrap();

        let target = path.clone();
        let outcome = guarded_mutation(&path, &secrets(), || async move {
            tokio::fs::write(&target, r#"{"fixed":true}"#).await?;
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(outcome, GuardOutcome::Kept);
        assert_eq!(fs::read_to_string(&path).unwrap(), r#"{"fixed":true}"#);
    }

    #[tokio::test]
    async fn test_guard_rolls_back_leak() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("openclaw.json");
        fs::write(&path, r#"{"original":true}"#).unwrap();

        let target = path.clone();
        let outcome = guarded_mutation(&path, &secrets(), || async move {
            tokio::fs::write(&target, r#"{"apiKey":"sk-ant-secret"}"#).await?;
            Ok(())
        })
        .await
        .unwrap();

        assert!(matches!(outcome, GuardOutcome::RolledBack(_)));
        assert_eq!(fs::read_to_string(&path).unwrap(), r#"{"original":true}"#);
    }

    #[tokio::test]
    async fn test_guard_rolls_back_corruption_even_on_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("openclaw.json");
        fs::write(&path, "{}").unwrap();

        let target = path.clone();
        let outcome = guarded_mutation(&path, &secrets(), || async move {
            tokio::fs::write(&target, "garbage").await?;
            anyhow::bail!("tool crashed")
        })
        .await
        .unwrap();

        assert!(matches!(outcome, GuardOutcome::RolledBack(_)));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_guard_propagates_error_when_file_is_intact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("openclaw.json");
        fs::write(&path, "{}").unwrap();

        let result = guarded_mutation(&path, &secrets(), || async {
            anyhow::bail!("doctor failed")
        })
        .await;
        assert!(result.is_err());
    }
}
