//! Cold/warm start decision.

use std::path::PathBuf;

use chrono::Utc;
use tracing::info;

use crate::config::Paths;

/// Which startup path the entrypoint takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartKind {
    /// Setup already ran in this container; go straight to supervision.
    Warm,
    /// Run the full setup sequence first.
    Cold,
}

/// Setup marker plus the config artifact it vouches for.
#[derive(Debug, Clone)]
pub struct SetupGate {
    marker: PathBuf,
    config_file: PathBuf,
}

impl SetupGate {
    pub fn new(paths: &Paths) -> Self {
        Self {
            marker: paths.setup_marker.clone(),
            config_file: paths.config_file(),
        }
    }

    /// Both the marker and the config must exist for a warm start.
    pub fn check(&self) -> StartKind {
        let marker = self.marker.is_file();
        let config = self.config_file.is_file();

        if marker && config {
            StartKind::Warm
        } else {
            info!(marker, config, "setup incomplete, taking cold path");
            StartKind::Cold
        }
    }

    /// Record that the cold path finished.
    ///
    /// The marker is only written when the config artifact exists, so a
    /// setup that produced no config is retried on the next start.
    pub fn mark_complete(&self) -> std::io::Result<bool> {
        if !self.config_file.is_file() {
            return Ok(false);
        }
        if let Some(parent) = self.marker.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.marker, Utc::now().to_rfc3339())?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn gate_in(root: &std::path::Path) -> (SetupGate, Paths) {
        let paths = Paths::under(root);
        fs::create_dir_all(&paths.config_dir).unwrap();
        (SetupGate::new(&paths), paths)
    }

    #[test]
    fn test_fresh_container_is_cold() {
        let dir = tempdir().unwrap();
        let (gate, _) = gate_in(dir.path());
        assert_eq!(gate.check(), StartKind::Cold);
    }

    #[test]
    fn test_marker_and_config_is_warm() {
        let dir = tempdir().unwrap();
        let (gate, paths) = gate_in(dir.path());
        fs::write(paths.config_file(), "{}").unwrap();

        assert!(gate.mark_complete().unwrap());
        assert_eq!(gate.check(), StartKind::Warm);
    }

    #[test]
    fn test_lost_config_with_marker_is_cold() {
        let dir = tempdir().unwrap();
        let (gate, paths) = gate_in(dir.path());
        fs::write(paths.config_file(), "{}").unwrap();
        gate.mark_complete().unwrap();

        fs::remove_file(paths.config_file()).unwrap();
        assert_eq!(gate.check(), StartKind::Cold);
    }

    #[test]
    fn test_marker_not_written_without_config() {
        let dir = tempdir().unwrap();
        let (gate, paths) = gate_in(dir.path());

        assert!(!gate.mark_complete().unwrap());
        assert!(!paths.setup_marker.exists());
    }

    #[test]
    fn test_marker_records_time() {
        let dir = tempdir().unwrap();
        let (gate, paths) = gate_in(dir.path());
        fs::write(paths.config_file(), "{}").unwrap();
        gate.mark_complete().unwrap();

        let written = fs::read_to_string(&paths.setup_marker).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&written).is_ok());
    }
}
