//! Sandbox runtime interface and mock implementation.
//!
//! The runtime interface abstracts the process primitives the sandbox
//! exposes:
//! - Listing, starting and killing processes
//! - Fetching captured output
//! - Waiting for a TCP port to accept connections
//!
//! A scriptable mock implementation is provided for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::env::EnvironmentBundle;
use crate::error::RuntimeError;

/// Lifecycle status of a runtime process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Starting,
    Running,
    Exited,
}

impl ProcessStatus {
    /// Map a runtime status string. Anything unknown counts as exited.
    pub fn from_runtime(status: &str) -> Self {
        match status {
            "starting" => ProcessStatus::Starting,
            "running" => ProcessStatus::Running,
            _ => ProcessStatus::Exited,
        }
    }

    /// Whether a process in this state can still become or be the gateway.
    pub fn is_live(&self) -> bool {
        matches!(self, ProcessStatus::Starting | ProcessStatus::Running)
    }
}

/// A process owned by the sandbox runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayProcess {
    pub id: String,
    pub command: String,
    pub status: ProcessStatus,
}

/// Captured process output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessLogs {
    pub stdout: String,
    pub stderr: String,
}

/// Sandbox runtime interface.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List every process the runtime knows about.
    async fn list_processes(&self) -> Result<Vec<GatewayProcess>, RuntimeError>;

    /// Start `command` with exactly the variables in `env`.
    async fn start_process(
        &self,
        command: &str,
        env: &EnvironmentBundle,
    ) -> Result<GatewayProcess, RuntimeError>;

    /// Kill a process.
    async fn kill_process(&self, id: &str) -> Result<(), RuntimeError>;

    /// Fetch a process's captured output.
    async fn process_logs(&self, id: &str) -> Result<ProcessLogs, RuntimeError>;

    /// Wait until `port` accepts TCP connections, up to `timeout`.
    async fn wait_for_port(&self, id: &str, port: u16, timeout: Duration)
        -> Result<(), RuntimeError>;
}

#[derive(Debug, Clone)]
struct MockProcess {
    process: GatewayProcess,
    reachable: bool,
    logs: ProcessLogs,
}

#[derive(Debug, Default)]
struct MockState {
    processes: Vec<MockProcess>,
    start_failures: VecDeque<String>,
    last_env: Option<EnvironmentBundle>,
    starts: u64,
    kills: Vec<String>,
}

/// Mock runtime for testing and development.
pub struct MockRuntime {
    /// Counter for generating process IDs.
    process_counter: AtomicU64,

    /// Whether started processes open their port.
    start_reachable: bool,

    state: Mutex<MockState>,
}

impl MockRuntime {
    /// Create a mock runtime whose started processes become reachable.
    pub fn new() -> Self {
        Self {
            process_counter: AtomicU64::new(0),
            start_reachable: true,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Create a mock runtime whose started processes never open their port.
    pub fn unreachable() -> Self {
        Self {
            start_reachable: false,
            ..Self::new()
        }
    }

    /// Seed an existing process.
    pub fn with_process(self, command: &str, status: ProcessStatus, reachable: bool) -> Self {
        let id = self.next_process_id();
        self.lock().processes.push(MockProcess {
            process: GatewayProcess {
                id,
                command: command.to_string(),
                status,
            },
            reachable,
            logs: ProcessLogs::default(),
        });
        self
    }

    /// Fail the next start with an API error carrying `message`.
    pub fn fail_next_start(&self, message: &str) {
        self.lock().start_failures.push_back(message.to_string());
    }

    /// Number of successful starts.
    pub fn starts(&self) -> u64 {
        self.lock().starts
    }

    /// IDs of killed processes, in order.
    pub fn kills(&self) -> Vec<String> {
        self.lock().kills.clone()
    }

    /// Environment passed to the most recent start.
    pub fn last_env(&self) -> Option<EnvironmentBundle> {
        self.lock().last_env.clone()
    }

    fn next_process_id(&self) -> String {
        let counter = self.process_counter.fetch_add(1, Ordering::SeqCst);
        format!("proc_{:08x}", counter)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_processes(&self) -> Result<Vec<GatewayProcess>, RuntimeError> {
        let processes = self
            .lock()
            .processes
            .iter()
            .map(|p| p.process.clone())
            .collect();
        Ok(processes)
    }

    async fn start_process(
        &self,
        command: &str,
        env: &EnvironmentBundle,
    ) -> Result<GatewayProcess, RuntimeError> {
        if let Some(body) = self.lock().start_failures.pop_front() {
            return Err(RuntimeError::Api { status: 500, body });
        }

        let process = GatewayProcess {
            id: self.next_process_id(),
            command: command.to_string(),
            status: ProcessStatus::Starting,
        };
        info!(id = %process.id, command, vars = env.len(), "[MOCK] Starting process");

        let mut state = self.lock();
        state.starts += 1;
        state.last_env = Some(env.clone());
        state.processes.push(MockProcess {
            process: process.clone(),
            reachable: self.start_reachable,
            logs: ProcessLogs {
                stdout: format!("[MOCK] {command} started\n"),
                stderr: if self.start_reachable {
                    String::new()
                } else {
                    "[MOCK] gateway failed to bind\n".to_string()
                },
            },
        });

        Ok(process)
    }

    async fn kill_process(&self, id: &str) -> Result<(), RuntimeError> {
        debug!(id, "[MOCK] Killing process");
        let mut state = self.lock();
        state.kills.push(id.to_string());
        let entry = state
            .processes
            .iter_mut()
            .find(|p| p.process.id == id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        entry.process.status = ProcessStatus::Exited;
        entry.reachable = false;
        Ok(())
    }

    async fn process_logs(&self, id: &str) -> Result<ProcessLogs, RuntimeError> {
        self.lock()
            .processes
            .iter()
            .find(|p| p.process.id == id)
            .map(|p| p.logs.clone())
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    async fn wait_for_port(
        &self,
        id: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        let reachable = {
            let mut state = self.lock();
            let entry = state
                .processes
                .iter_mut()
                .find(|p| p.process.id == id)
                .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
            if entry.reachable {
                entry.process.status = ProcessStatus::Running;
            }
            entry.reachable
        };

        if reachable {
            return Ok(());
        }

        tokio::time::sleep(timeout).await;
        Err(RuntimeError::PortTimeout {
            port,
            timeout_ms: timeout.as_millis() as u64,
        })
    }
}
