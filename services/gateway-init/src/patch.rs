//! Deterministic config patch.
//!
//! [`patch_document`] merges environment-derived settings into whatever
//! document exists (restored, onboarded or empty). It only ever sets keys,
//! so applying it twice yields the same document.

use std::path::Path;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::{EntrypointConfig, FALLBACK_GATEWAY_TOKEN};
use crate::setup::StepOutcome;

/// Proxy range the sandbox runtime forwards from.
const TRUSTED_PROXY: &str = "10.1.0.0";

const AI_GATEWAY_CONTEXT_WINDOW: u64 = 131_072;
const AI_GATEWAY_MAX_TOKENS: u64 = 8_192;

const DEFAULT_DM_POLICY: &str = "pairing";

/// Borrow `parent[key]` as an object, replacing any non-object value.
fn object_at<'a>(parent: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    let slot = parent
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(map) => map,
        _ => unreachable!("slot was just made an object"),
    }
}

/// Apply every merge to `document`.
pub fn patch_document(document: Value, config: &EntrypointConfig) -> Value {
    let mut root = match document {
        Value::Object(map) => map,
        other => {
            debug!(kind = ?other, "config root is not an object, starting fresh");
            Map::new()
        }
    };

    {
        let defaults = object_at(object_at(&mut root, "agents"), "defaults");
        defaults.insert(
            "workspace".to_string(),
            json!(config.paths.workspace_dir.display().to_string()),
        );
    }

    {
        let gateway = object_at(&mut root, "gateway");
        gateway.insert("port".to_string(), json!(config.gateway_port));
        gateway.insert("mode".to_string(), json!("local"));
        gateway.insert("bind".to_string(), json!("lan"));
        gateway.insert("trustedProxies".to_string(), json!([TRUSTED_PROXY]));

        let token = config
            .gateway_token
            .as_deref()
            .unwrap_or(FALLBACK_GATEWAY_TOKEN);
        object_at(gateway, "auth").insert("token".to_string(), json!(token));

        let control_ui = object_at(gateway, "controlUi");
        control_ui.insert("allowInsecureAuth".to_string(), json!(true));
        if config.dev_mode {
            control_ui.insert("dangerouslyDisableDeviceAuth".to_string(), json!(true));
        }
    }

    apply_ai_gateway_model(&mut root, config);
    apply_channels(&mut root, config);

    Value::Object(root)
}

fn apply_ai_gateway_model(root: &mut Map<String, Value>, config: &EntrypointConfig) {
    let Some(target) = config.ai_gateway_model.as_deref() else {
        return;
    };
    let Some((provider, model_id)) = target.split_once('/') else {
        warn!(model = target, "ignoring AI gateway model without provider prefix");
        return;
    };
    if provider.is_empty() || model_id.is_empty() {
        warn!(model = target, "ignoring malformed AI gateway model");
        return;
    }
    let Some(gw) = &config.auth.ai_gateway else {
        warn!("AI gateway model set without account and gateway id");
        return;
    };

    let provider_name = format!("cf-ai-gw-{provider}");
    let api = if provider == "anthropic" {
        "anthropic-messages"
    } else {
        "openai-completions"
    };

    let mut entry = Map::new();
    entry.insert(
        "baseUrl".to_string(),
        json!(format!(
            "https://gateway.ai.cloudflare.com/v1/{}/{}/{}",
            gw.account_id, gw.gateway_id, provider
        )),
    );
    if let Some(key) = &gw.api_key {
        entry.insert("apiKey".to_string(), json!(key));
    }
    entry.insert("api".to_string(), json!(api));
    entry.insert(
        "models".to_string(),
        json!([{
            "id": model_id,
            "name": model_id,
            "contextWindow": AI_GATEWAY_CONTEXT_WINDOW,
            "maxTokens": AI_GATEWAY_MAX_TOKENS,
        }]),
    );

    object_at(object_at(root, "models"), "providers")
        .insert(provider_name.clone(), Value::Object(entry));

    let model = object_at(object_at(object_at(root, "agents"), "defaults"), "model");
    model.insert(
        "primary".to_string(),
        json!(format!("{provider_name}/{model_id}")),
    );
}

fn apply_channels(root: &mut Map<String, Value>, config: &EntrypointConfig) {
    let channels = &config.channels;
    if channels.telegram.is_none() && channels.discord.is_none() && channels.slack.is_none() {
        return;
    }
    let target = object_at(root, "channels");

    if let Some(telegram) = &channels.telegram {
        let policy = telegram.dm_policy.as_deref().unwrap_or(DEFAULT_DM_POLICY);
        let mut entry = json!({
            "botToken": telegram.bot_token,
            "enabled": true,
            "dmPolicy": policy,
        });
        if policy == "open" {
            entry["allowFrom"] = json!(["*"]);
        }
        target.insert("telegram".to_string(), entry);
    }

    if let Some(discord) = &channels.discord {
        let policy = discord.dm_policy.as_deref().unwrap_or(DEFAULT_DM_POLICY);
        target.insert(
            "discord".to_string(),
            json!({
                "token": discord.bot_token,
                "enabled": true,
                "dm": { "policy": policy },
            }),
        );
    }

    if let Some(slack) = &channels.slack {
        target.insert(
            "slack".to_string(),
            json!({
                "botToken": slack.bot_token,
                "appToken": slack.app_token,
                "enabled": true,
            }),
        );
    }
}

/// Read the artifact; missing or unparseable content becomes `{}`.
pub async fn read_document(path: &Path) -> Value {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "config is not valid JSON, starting fresh");
            json!({})
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => json!({}),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read config, starting fresh");
            json!({})
        }
    }
}

/// Cold-path step: patch the config artifact in place.
pub async fn run(config: &EntrypointConfig) -> anyhow::Result<StepOutcome> {
    let path = config.paths.config_file();
    let document = read_document(&path).await;
    let patched = patch_document(document, config);

    tokio::fs::create_dir_all(&config.paths.config_dir).await?;
    let mut bytes = serde_json::to_vec_pretty(&patched)?;
    bytes.push(b'\n');
    tokio::fs::write(&path, bytes).await?;

    Ok(StepOutcome::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Paths;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn config_from(vars: &[(&str, &str)]) -> EntrypointConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EntrypointConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_empty_document_gets_gateway_settings() {
        let patched = patch_document(json!({}), &config_from(&[]));

        assert_eq!(patched["gateway"]["port"], 18789);
        assert_eq!(patched["gateway"]["mode"], "local");
        assert_eq!(patched["gateway"]["bind"], "lan");
        assert_eq!(patched["gateway"]["trustedProxies"], json!(["10.1.0.0"]));
        assert_eq!(patched["gateway"]["auth"]["token"], FALLBACK_GATEWAY_TOKEN);
        assert_eq!(patched["gateway"]["controlUi"]["allowInsecureAuth"], true);
        assert!(patched["gateway"]["controlUi"]
            .get("dangerouslyDisableDeviceAuth")
            .is_none());
        assert_eq!(patched["agents"]["defaults"]["workspace"], "/root/clawd");
        assert!(patched.get("channels").is_none());
    }

    #[test]
    fn test_patch_is_idempotent() {
        let config = config_from(&[
            ("OPENCLAW_GATEWAY_TOKEN", "tok"),
            ("OPENCLAW_DEV_MODE", "true"),
            ("TELEGRAM_BOT_TOKEN", "tg"),
            ("TELEGRAM_DM_POLICY", "open"),
            ("DISCORD_BOT_TOKEN", "dc"),
            ("CLOUDFLARE_AI_GATEWAY_API_KEY", "k"),
            ("CF_AI_GATEWAY_ACCOUNT_ID", "a"),
            ("CF_AI_GATEWAY_GATEWAY_ID", "g"),
            ("CF_AI_GATEWAY_MODEL", "anthropic/claude-sonnet"),
        ]);
        let existing = json!({"agents": {"list": [1, 2]}, "custom": {"kept": true}});

        let once = patch_document(existing, &config);
        let twice = patch_document(once.clone(), &config);
        assert_eq!(once, twice);
        assert_eq!(once["custom"]["kept"], true);
        assert_eq!(once["agents"]["list"], json!([1, 2]));
    }

    #[test]
    fn test_non_object_intermediates_are_replaced() {
        let existing = json!({"gateway": "broken", "agents": {"defaults": 7}});
        let patched = patch_document(existing, &config_from(&[]));
        assert_eq!(patched["gateway"]["bind"], "lan");
        assert_eq!(patched["agents"]["defaults"]["workspace"], "/root/clawd");

        let patched = patch_document(json!([1, 2, 3]), &config_from(&[]));
        assert!(patched.is_object());
    }

    #[test]
    fn test_dev_mode_disables_device_auth() {
        let patched = patch_document(json!({}), &config_from(&[("OPENCLAW_DEV_MODE", "1")]));
        assert_eq!(
            patched["gateway"]["controlUi"]["dangerouslyDisableDeviceAuth"],
            true
        );
    }

    #[test]
    fn test_ai_gateway_model() {
        let config = config_from(&[
            ("CLOUDFLARE_AI_GATEWAY_API_KEY", "key"),
            ("CF_AI_GATEWAY_ACCOUNT_ID", "acct"),
            ("CF_AI_GATEWAY_GATEWAY_ID", "gw"),
            ("CF_AI_GATEWAY_MODEL", "workers-ai/@cf/meta/llama"),
        ]);
        let patched = patch_document(json!({}), &config);

        let provider = &patched["models"]["providers"]["cf-ai-gw-workers-ai"];
        assert_eq!(provider["api"], "openai-completions");
        assert_eq!(provider["apiKey"], "key");
        assert_eq!(
            provider["baseUrl"],
            "https://gateway.ai.cloudflare.com/v1/acct/gw/workers-ai"
        );
        assert_eq!(provider["models"][0]["id"], "@cf/meta/llama");
        assert_eq!(provider["models"][0]["contextWindow"], 131072);
        assert_eq!(provider["models"][0]["maxTokens"], 8192);
        assert_eq!(
            patched["agents"]["defaults"]["model"]["primary"],
            "cf-ai-gw-workers-ai/@cf/meta/llama"
        );
    }

    #[test]
    fn test_ai_gateway_model_without_key() {
        let config = config_from(&[
            ("CF_AI_GATEWAY_ACCOUNT_ID", "acct"),
            ("CF_AI_GATEWAY_GATEWAY_ID", "gw"),
            ("CF_AI_GATEWAY_MODEL", "openai/gpt-4o"),
        ]);
        let patched = patch_document(json!({}), &config);

        let provider = &patched["models"]["providers"]["cf-ai-gw-openai"];
        assert_eq!(
            provider["baseUrl"],
            "https://gateway.ai.cloudflare.com/v1/acct/gw/openai"
        );
        assert!(provider.get("apiKey").is_none());
        assert_eq!(
            patched["agents"]["defaults"]["model"]["primary"],
            "cf-ai-gw-openai/gpt-4o"
        );
    }

    #[test]
    fn test_anthropic_model_uses_messages_api() {
        let config = config_from(&[
            ("CLOUDFLARE_AI_GATEWAY_API_KEY", "key"),
            ("CF_AI_GATEWAY_ACCOUNT_ID", "acct"),
            ("CF_AI_GATEWAY_GATEWAY_ID", "gw"),
            ("CF_AI_GATEWAY_MODEL", "anthropic/claude"),
        ]);
        let patched = patch_document(json!({}), &config);
        assert_eq!(
            patched["models"]["providers"]["cf-ai-gw-anthropic"]["api"],
            "anthropic-messages"
        );
    }

    #[test]
    fn test_model_without_slash_is_ignored() {
        let config = config_from(&[
            ("CLOUDFLARE_AI_GATEWAY_API_KEY", "key"),
            ("CF_AI_GATEWAY_ACCOUNT_ID", "acct"),
            ("CF_AI_GATEWAY_GATEWAY_ID", "gw"),
            ("CF_AI_GATEWAY_MODEL", "claude"),
        ]);
        let patched = patch_document(json!({}), &config);
        assert!(patched.get("models").is_none());
    }

    #[test]
    fn test_channels() {
        let config = config_from(&[
            ("TELEGRAM_BOT_TOKEN", "tg"),
            ("TELEGRAM_DM_POLICY", "open"),
            ("DISCORD_BOT_TOKEN", "dc"),
            ("SLACK_BOT_TOKEN", "xoxb"),
            ("SLACK_APP_TOKEN", "xapp"),
        ]);
        let patched = patch_document(json!({}), &config);
        let channels = &patched["channels"];

        assert_eq!(channels["telegram"]["botToken"], "tg");
        assert_eq!(channels["telegram"]["dmPolicy"], "open");
        assert_eq!(channels["telegram"]["allowFrom"], json!(["*"]));
        assert_eq!(channels["discord"]["token"], "dc");
        assert_eq!(channels["discord"]["dm"]["policy"], "pairing");
        assert_eq!(channels["slack"]["appToken"], "xapp");
        assert_eq!(channels["slack"]["enabled"], true);
    }

    #[tokio::test]
    async fn test_run_replaces_unparseable_file() {
        let dir = tempdir().unwrap();
        let mut config = config_from(&[]);
        config.paths = Paths::under(dir.path());
        std::fs::create_dir_all(&config.paths.config_dir).unwrap();
        std::fs::write(config.paths.config_file(), "{ not json").unwrap();

        let outcome = run(&config).await.unwrap();
        assert_eq!(outcome, StepOutcome::Ok);

        let written: Value =
            serde_json::from_slice(&std::fs::read(config.paths.config_file()).unwrap()).unwrap();
        assert_eq!(written["gateway"]["port"], 18789);
    }

    #[tokio::test]
    async fn test_run_creates_missing_file() {
        let dir = tempdir().unwrap();
        let mut config = config_from(&[]);
        config.paths = Paths::under(dir.path());

        run(&config).await.unwrap();
        assert!(config.paths.config_file().is_file());
    }
}
