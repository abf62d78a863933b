//! Error types for the orchestrator.

use thiserror::Error;

/// Message fragments that identify a transient host-level reset.
pub const TRANSIENT_PATTERNS: &[&str] = &["Durable Object reset", "Network connection lost"];

/// Whether an error message carries a transient reset signature.
pub fn is_transient_message(message: &str) -> bool {
    TRANSIENT_PATTERNS.iter().any(|p| message.contains(p))
}

/// Errors talking to the sandbox runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The request never produced a response.
    #[error("runtime request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The runtime answered with a non-success status.
    #[error("runtime returned {status}: {body}")]
    Api { status: u16, body: String },

    /// Nothing accepted connections on the port in time.
    #[error("port {port} did not open within {timeout_ms}ms")]
    PortTimeout { port: u16, timeout_ms: u64 },

    /// The referenced process does not exist.
    #[error("process not found: {0}")]
    NotFound(String),
}

impl RuntimeError {
    pub fn is_transient(&self) -> bool {
        is_transient_message(&self.to_string())
    }
}

/// Errors surfaced by gateway reconciliation.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The runtime failed while discovering or probing processes.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// The startup entrypoint could not be launched.
    #[error("failed to launch gateway entrypoint: {0}")]
    LaunchFailed(#[source] RuntimeError),

    /// A freshly started gateway never became reachable.
    #[error("gateway {process_id} did not become reachable on port {port}: {reason}")]
    Unreachable {
        process_id: String,
        port: u16,
        reason: String,
        stdout: String,
        stderr: String,
    },
}

impl OrchestratorError {
    /// Transient errors are retried by `ensure_gateway`.
    pub fn is_transient(&self) -> bool {
        is_transient_message(&self.to_string())
    }

    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            OrchestratorError::Runtime(_) => "runtime_error",
            OrchestratorError::LaunchFailed(_) => "launch_failed",
            OrchestratorError::Unreachable { .. } => "gateway_unreachable",
        }
    }

    /// Captured process output, when the failure has any.
    pub fn captured_output(&self) -> Option<(&str, &str)> {
        match self {
            OrchestratorError::Unreachable { stdout, stderr, .. } => {
                Some((stdout.as_str(), stderr.as_str()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Durable Object reset because its code was updated", true)]
    #[case("Error: Network connection lost.", true)]
    #[case("connection refused", false)]
    #[case("durable object reset", false)]
    fn test_transient_patterns(#[case] message: &str, #[case] expected: bool) {
        assert_eq!(is_transient_message(message), expected);
    }

    #[test]
    fn test_launch_failure_carries_source_message() {
        let err = OrchestratorError::LaunchFailed(RuntimeError::Api {
            status: 500,
            body: "Network connection lost".to_string(),
        });
        assert!(err.is_transient());
        assert_eq!(err.reason_code(), "launch_failed");
        assert!(err.captured_output().is_none());
    }

    #[test]
    fn test_unreachable_exposes_output() {
        let err = OrchestratorError::Unreachable {
            process_id: "proc-1".to_string(),
            port: 18789,
            reason: "port 18789 did not open within 180000ms".to_string(),
            stdout: "booting".to_string(),
            stderr: "EADDRINUSE".to_string(),
        };
        assert!(!err.is_transient());
        assert_eq!(err.captured_output(), Some(("booting", "EADDRINUSE")));
    }
}
