//! Configuration for the orchestrator.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::env::EnvironmentBundle;
use crate::gateway::GatewaySettings;

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP API binds to.
    pub listen_addr: SocketAddr,

    /// Sandbox runtime control API URL.
    pub runtime_url: String,

    /// Reconciliation settings.
    pub gateway: GatewaySettings,

    /// Environment forwarded to the entrypoint.
    pub env: EnvironmentBundle,

    /// Log level used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let listen_addr = var("HARBOR_LISTEN_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8790".to_string())
            .parse::<SocketAddr>()
            .context("HARBOR_LISTEN_ADDR is not a socket address")?;

        let runtime_url =
            var("HARBOR_RUNTIME_URL").unwrap_or_else(|| "http://127.0.0.1:8080".to_string());

        let mut gateway = GatewaySettings::default();
        if let Some(command) = var("HARBOR_STARTUP_COMMAND") {
            gateway.startup_command = command;
        }
        if let Some(port) = var("HARBOR_GATEWAY_PORT") {
            gateway.port = port
                .parse::<u16>()
                .context("HARBOR_GATEWAY_PORT is not a port number")?;
        }
        if let Some(secs) = var("HARBOR_STARTUP_TIMEOUT_SECS") {
            let secs = secs
                .parse::<u64>()
                .context("HARBOR_STARTUP_TIMEOUT_SECS is not a number of seconds")?;
            gateway.startup_timeout = Duration::from_secs(secs);
        }

        let log_level = var("HARBOR_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            listen_addr,
            runtime_url,
            gateway,
            env: EnvironmentBundle::from_lookup(&lookup),
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.listen_addr.port(), 8790);
        assert_eq!(config.gateway.port, 18789);
        assert_eq!(config.gateway.probe_timeout, Duration::from_secs(15));
        assert_eq!(config.gateway.startup_timeout, Duration::from_secs(180));
        assert_eq!(config.gateway.retry.max_attempts, 4);
        assert_eq!(config.log_level, "info");
        assert!(config.env.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("HARBOR_LISTEN_ADDR", "0.0.0.0:9000"),
            ("HARBOR_STARTUP_COMMAND", "/opt/harbor/gateway-init"),
            ("HARBOR_RUNTIME_URL", "http://runtime:7000"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
        ])
        .unwrap();
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.gateway.startup_command, "/opt/harbor/gateway-init");
        assert_eq!(config.runtime_url, "http://runtime:7000");
        assert_eq!(config.env.get("ANTHROPIC_API_KEY"), Some("sk-ant"));
    }

    #[test]
    fn test_log_level_and_timeout_overrides() {
        let config = config_from(&[
            ("HARBOR_LOG_LEVEL", "debug"),
            ("HARBOR_STARTUP_TIMEOUT_SECS", "240"),
            ("HARBOR_GATEWAY_PORT", "18800"),
        ])
        .unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.gateway.startup_timeout, Duration::from_secs(240));
        assert_eq!(config.gateway.port, 18800);
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(config_from(&[("HARBOR_LISTEN_ADDR", "not-an-addr")]).is_err());
        assert!(config_from(&[("HARBOR_GATEWAY_PORT", "http")]).is_err());

        let err = config_from(&[("HARBOR_STARTUP_TIMEOUT_SECS", "3m")]).unwrap_err();
        assert!(err.to_string().contains("HARBOR_STARTUP_TIMEOUT_SECS"));
    }
}
