//! Error types for the entrypoint.

use std::time::Duration;

use thiserror::Error;

/// Entrypoint errors with standardized reason codes.
#[derive(Debug, Error)]
pub enum InitError {
    /// Could not spawn an external tool.
    #[error("spawn_failed: {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// An external tool exited unsuccessfully.
    #[error("command_failed: {program} exited with {code:?}: {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// A bounded operation ran out of time.
    #[error("timeout: {operation} did not finish within {after:?}")]
    Timeout { operation: String, after: Duration },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl InitError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            InitError::SpawnFailed { .. } => "spawn_failed",
            InitError::CommandFailed { .. } => "command_failed",
            InitError::Timeout { .. } => "timeout",
            InitError::Io(_) => "io_error",
            InitError::Json(_) => "json_error",
        }
    }
}
