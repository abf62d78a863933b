//! Non-interactive onboarding for containers without a config.

use tracing::info;

use crate::command::run_bounded;
use crate::config::{AiGatewayCredentials, AuthCredentials, EntrypointConfig};
use crate::setup::StepOutcome;

/// Authentication mode passed to onboarding, in precedence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChoice {
    AiGateway {
        api_key: String,
        account_id: String,
        gateway_id: String,
    },
    Anthropic(String),
    OpenAi(String),
    None,
}

impl AuthChoice {
    /// Pick the first credential set that is available.
    pub fn select(auth: &AuthCredentials) -> Self {
        if let Some(AiGatewayCredentials {
            api_key: Some(api_key),
            account_id,
            gateway_id,
        }) = &auth.ai_gateway
        {
            return AuthChoice::AiGateway {
                api_key: api_key.clone(),
                account_id: account_id.clone(),
                gateway_id: gateway_id.clone(),
            };
        }
        if let Some(key) = &auth.anthropic_api_key {
            return AuthChoice::Anthropic(key.clone());
        }
        if let Some(key) = &auth.openai_api_key {
            return AuthChoice::OpenAi(key.clone());
        }
        AuthChoice::None
    }

    /// Name used in logs; never the secret itself.
    pub fn label(&self) -> &'static str {
        match self {
            AuthChoice::AiGateway { .. } => "cloudflare-ai-gateway-api-key",
            AuthChoice::Anthropic(_) => "apiKey",
            AuthChoice::OpenAi(_) => "openai-api-key",
            AuthChoice::None => "none",
        }
    }

    pub fn args(&self) -> Vec<String> {
        let pairs: Vec<(&str, &str)> = match self {
            AuthChoice::AiGateway {
                api_key,
                account_id,
                gateway_id,
            } => vec![
                ("--auth-choice", "cloudflare-ai-gateway-api-key"),
                ("--cloudflare-ai-gateway-account-id", account_id.as_str()),
                ("--cloudflare-ai-gateway-gateway-id", gateway_id.as_str()),
                ("--cloudflare-ai-gateway-api-key", api_key.as_str()),
            ],
            AuthChoice::Anthropic(key) => {
                vec![("--auth-choice", "apiKey"), ("--anthropic-api-key", key.as_str())]
            }
            AuthChoice::OpenAi(key) => vec![
                ("--auth-choice", "openai-api-key"),
                ("--openai-api-key", key.as_str()),
            ],
            AuthChoice::None => Vec::new(),
        };

        pairs
            .into_iter()
            .flat_map(|(flag, value)| [flag.to_string(), value.to_string()])
            .collect()
    }
}

/// Full onboarding argument list.
pub fn onboard_args(config: &EntrypointConfig, auth: &AuthChoice) -> Vec<String> {
    let mut args: Vec<String> = [
        "onboard",
        "--non-interactive",
        "--accept-risk",
        "--mode",
        "local",
        "--workspace",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    args.push(config.paths.workspace_dir.display().to_string());
    args.push("--gateway-port".to_string());
    args.push(config.gateway_port.to_string());
    args.extend(
        [
            "--gateway-bind",
            "lan",
            "--skip-channels",
            "--skip-skills",
            "--skip-health",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.extend(auth.args());
    args
}

/// Cold-path step: onboard unless a config already exists.
pub async fn run(config: &EntrypointConfig) -> anyhow::Result<StepOutcome> {
    if config.paths.config_file().is_file() {
        return Ok(StepOutcome::Skipped("config already present".into()));
    }

    let auth = AuthChoice::select(&config.auth);
    info!(auth_choice = auth.label(), "running onboarding");

    tokio::fs::create_dir_all(&config.paths.config_dir).await?;
    run_bounded(
        &config.gateway_bin,
        &onboard_args(config, &auth),
        config.timeouts.onboard,
    )
    .await?;

    if config.paths.config_file().is_file() {
        Ok(StepOutcome::Ok)
    } else {
        Ok(StepOutcome::Warning(
            "onboarding finished without writing a config".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Paths;
    use rstest::rstest;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn creds(gateway: bool, anthropic: bool, openai: bool) -> AuthCredentials {
        AuthCredentials {
            ai_gateway: gateway.then(|| AiGatewayCredentials {
                api_key: Some("gw-key".to_string()),
                account_id: "acct".to_string(),
                gateway_id: "gw".to_string(),
            }),
            anthropic_api_key: anthropic.then(|| "sk-ant".to_string()),
            openai_api_key: openai.then(|| "sk-oai".to_string()),
        }
    }

    #[rstest]
    #[case(true, true, true, "cloudflare-ai-gateway-api-key")]
    #[case(false, true, true, "apiKey")]
    #[case(false, false, true, "openai-api-key")]
    #[case(false, false, false, "none")]
    fn test_auth_precedence(
        #[case] gateway: bool,
        #[case] anthropic: bool,
        #[case] openai: bool,
        #[case] expected: &str,
    ) {
        let choice = AuthChoice::select(&creds(gateway, anthropic, openai));
        assert_eq!(choice.label(), expected);
    }

    #[test]
    fn test_auth_args() {
        let args = AuthChoice::Anthropic("sk-ant".to_string()).args();
        assert_eq!(
            args,
            vec!["--auth-choice", "apiKey", "--anthropic-api-key", "sk-ant"]
        );
        assert!(AuthChoice::None.args().is_empty());

        let args = AuthChoice::select(&creds(true, false, false)).args();
        assert_eq!(args.len(), 8);
        assert_eq!(args[1], "cloudflare-ai-gateway-api-key");
    }

    #[test]
    fn test_gateway_ids_without_key_fall_through() {
        let mut auth = creds(true, true, false);
        if let Some(gw) = auth.ai_gateway.as_mut() {
            gw.api_key = None;
        }
        assert_eq!(AuthChoice::select(&auth).label(), "apiKey");
    }

    #[test]
    fn test_onboard_args_without_credentials() {
        let config = EntrypointConfig::from_lookup(|_| None);
        let args = onboard_args(&config, &AuthChoice::None);

        assert_eq!(args[0], "onboard");
        assert!(args.contains(&"--non-interactive".to_string()));
        assert!(args.contains(&"18789".to_string()));
        assert!(args.contains(&"/root/clawd".to_string()));
        assert!(!args.contains(&"--auth-choice".to_string()));
    }

    #[tokio::test]
    async fn test_skipped_when_config_exists() {
        let dir = tempdir().unwrap();
        let mut config = EntrypointConfig::from_lookup(|_| None);
        config.paths = Paths::under(dir.path());
        fs::create_dir_all(&config.paths.config_dir).unwrap();
        fs::write(config.paths.config_file(), "{}").unwrap();
        config.gateway_bin = "/nonexistent/openclaw".to_string();

        let outcome = run(&config).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn test_runs_gateway_binary() {
        let dir = tempdir().unwrap();
        let mut config = EntrypointConfig::from_lookup(|_| None);
        config.paths = Paths::under(dir.path());

        let script = dir.path().join("fake-openclaw");
        let config_file = config.paths.config_file();
        fs::write(
            &script,
            format!("#!/bin/sh\necho \"$@\" > {0}.args\necho '{{}}' > {0}\n", config_file.display()),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        config.gateway_bin = script.display().to_string();

        let outcome = run(&config).await.unwrap();
        assert_eq!(outcome, StepOutcome::Ok);

        let recorded = fs::read_to_string(format!("{}.args", config_file.display())).unwrap();
        assert!(recorded.starts_with("onboard --non-interactive"));
    }

    #[tokio::test]
    async fn test_failure_is_an_error() {
        let dir = tempdir().unwrap();
        let mut config = EntrypointConfig::from_lookup(|_| None);
        config.paths = Paths::under(dir.path());
        config.gateway_bin = "false".to_string();

        assert!(run(&config).await.is_err());
    }
}
