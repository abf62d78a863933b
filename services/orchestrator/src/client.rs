//! Sandbox runtime HTTP client.
//!
//! Implements [`ContainerRuntime`] against the sandbox control API:
//! - `GET /processes`, `POST /processes`
//! - `POST /processes/{id}/kill`, `GET /processes/{id}/logs`
//! - `POST /processes/{id}/wait-for-port` (408 means the port never opened)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::env::EnvironmentBundle;
use crate::error::RuntimeError;
use crate::runtime::{ContainerRuntime, GatewayProcess, ProcessLogs, ProcessStatus};

/// Timeout for ordinary runtime requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Slack added to a port wait so the runtime reports the timeout first.
const PORT_WAIT_SLACK: Duration = Duration::from_secs(5);

/// Process record as the runtime reports it.
#[derive(Debug, Deserialize)]
struct ProcessRecord {
    id: String,
    command: String,
    status: String,
}

impl From<ProcessRecord> for GatewayProcess {
    fn from(record: ProcessRecord) -> Self {
        GatewayProcess {
            id: record.id,
            command: record.command,
            status: ProcessStatus::from_runtime(&record.status),
        }
    }
}

#[derive(Debug, Serialize)]
struct StartProcessRequest<'a> {
    command: &'a str,
    env: &'a EnvironmentBundle,
}

#[derive(Debug, Serialize)]
struct WaitForPortRequest {
    port: u16,
    mode: &'static str,
    timeout_ms: u64,
}

/// Runtime client over HTTP.
pub struct HttpRuntime {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRuntime {
    /// Create a client for the runtime at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, RuntimeError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response, RuntimeError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!(status = %status, body = %body, "Failed to {}", what);
        Err(RuntimeError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ContainerRuntime for HttpRuntime {
    async fn list_processes(&self) -> Result<Vec<GatewayProcess>, RuntimeError> {
        let response = self.client.get(self.url("/processes")).send().await?;
        let response = Self::check(response, "list processes").await?;

        let records: Vec<ProcessRecord> = response.json().await?;
        debug!(count = records.len(), "Listed processes");
        Ok(records.into_iter().map(GatewayProcess::from).collect())
    }

    async fn start_process(
        &self,
        command: &str,
        env: &EnvironmentBundle,
    ) -> Result<GatewayProcess, RuntimeError> {
        debug!(command, vars = env.len(), "Starting process");
        let response = self
            .client
            .post(self.url("/processes"))
            .json(&StartProcessRequest { command, env })
            .send()
            .await?;
        let response = Self::check(response, "start process").await?;

        let record: ProcessRecord = response.json().await?;
        Ok(record.into())
    }

    async fn kill_process(&self, id: &str) -> Result<(), RuntimeError> {
        let response = self
            .client
            .post(self.url(&format!("/processes/{id}/kill")))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RuntimeError::NotFound(id.to_string()));
        }
        Self::check(response, "kill process").await?;
        Ok(())
    }

    async fn process_logs(&self, id: &str) -> Result<ProcessLogs, RuntimeError> {
        let response = self
            .client
            .get(self.url(&format!("/processes/{id}/logs")))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RuntimeError::NotFound(id.to_string()));
        }
        let response = Self::check(response, "fetch process logs").await?;
        Ok(response.json().await?)
    }

    async fn wait_for_port(
        &self,
        id: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        let timeout_ms = timeout.as_millis() as u64;
        let response = self
            .client
            .post(self.url(&format!("/processes/{id}/wait-for-port")))
            .json(&WaitForPortRequest {
                port,
                mode: "tcp",
                timeout_ms,
            })
            .timeout(timeout + PORT_WAIT_SLACK)
            .send()
            .await?;

        if response.status() == StatusCode::REQUEST_TIMEOUT {
            return Err(RuntimeError::PortTimeout { port, timeout_ms });
        }
        Self::check(response, "wait for port").await?;
        Ok(())
    }
}
