//! Entrypoint configuration.
//!
//! Every environment variable the entrypoint honours is read exactly once,
//! here, into an [`EntrypointConfig`] that is passed down to the setup steps,
//! the sync loop and the supervisor. Empty variables count as unset.

use std::path::{Path, PathBuf};
use std::time::Duration;

use harbor_reconcile::CrashPolicy;

/// Port the gateway listens on.
pub const GATEWAY_PORT: u16 = 18789;

/// Main configuration artifact inside the config directory.
pub const CONFIG_FILE_NAME: &str = "openclaw.json";

/// Config artifact name used by the legacy storage layout.
pub const LEGACY_CONFIG_FILE_NAME: &str = "clawdbot.json";

/// Remote prefixes, relative to the bucket.
pub const REMOTE_CONFIG_PREFIX: &str = "openclaw/";
pub const REMOTE_LEGACY_CONFIG_PREFIX: &str = "clawdbot/";
pub const REMOTE_WORKSPACE_PREFIX: &str = "workspace/";
pub const REMOTE_SKILLS_PREFIX: &str = "skills/";

/// Environment variable that would make the gateway enforce token auth itself.
pub const GATEWAY_TOKEN_ENV: &str = "OPENCLAW_GATEWAY_TOKEN";

/// Token written into the config when none is provided.
pub const FALLBACK_GATEWAY_TOKEN: &str = "harbor-internal-token";

const DEFAULT_BUCKET: &str = "moltbot-data";

/// Complete entrypoint configuration.
#[derive(Debug, Clone)]
pub struct EntrypointConfig {
    /// Filesystem layout.
    pub paths: Paths,

    /// Gateway executable (also used for `onboard` and `doctor`).
    pub gateway_bin: String,

    /// Object-storage transfer tool.
    pub rclone_bin: String,

    /// Gateway port.
    pub gateway_port: u16,

    /// Remote-storage credentials; `None` disables restore and sync.
    pub storage: Option<StorageCredentials>,

    /// Bucket holding the backups.
    pub bucket: String,

    /// Model provider credentials.
    pub auth: AuthCredentials,

    /// Token written into the gateway config.
    pub gateway_token: Option<String>,

    /// Relax device auth on the control UI.
    pub dev_mode: bool,

    /// `provider/model-id` routed through the AI gateway.
    pub ai_gateway_model: Option<String>,

    /// Chat channel credentials.
    pub channels: ChannelCredentials,

    /// Step timeouts and loop intervals.
    pub timeouts: Timeouts,

    /// Supervisor restart policy.
    pub crash_policy: CrashPolicy,
}

/// Filesystem layout used by the entrypoint.
#[derive(Debug, Clone)]
pub struct Paths {
    pub config_dir: PathBuf,
    pub workspace_dir: PathBuf,
    pub skills_dir: PathBuf,

    /// Written once the cold path has completed.
    pub setup_marker: PathBuf,

    /// Modification time marks the last successful sync cycle.
    pub sync_marker: PathBuf,

    /// Human-readable timestamp of the last successful sync.
    pub last_sync_file: PathBuf,

    /// rclone remote definitions.
    pub rclone_config: PathBuf,

    /// Files seeded into a fresh workspace.
    pub workspace_template: PathBuf,

    /// Lock files cleared before every gateway start.
    pub lock_files: Vec<PathBuf>,
}

impl Paths {
    /// Main configuration artifact.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    /// Layout rooted at `root`, used by tests and local runs.
    pub fn under(root: &Path) -> Self {
        let config_dir = root.join("config");
        let workspace_dir = root.join("workspace");
        Self {
            skills_dir: workspace_dir.join("skills"),
            setup_marker: root.join(".setup-complete"),
            sync_marker: root.join(".sync-marker"),
            last_sync_file: root.join(".last-sync"),
            rclone_config: root.join("rclone.conf"),
            workspace_template: root.join("template"),
            lock_files: vec![root.join("gateway.lock"), config_dir.join("gateway.lock")],
            config_dir,
            workspace_dir,
        }
    }
}

impl Default for Paths {
    fn default() -> Self {
        let config_dir = PathBuf::from("/root/.openclaw");
        Self {
            workspace_dir: PathBuf::from("/root/clawd"),
            skills_dir: PathBuf::from("/root/clawd/skills"),
            setup_marker: PathBuf::from("/tmp/.harbor-setup-complete"),
            sync_marker: PathBuf::from("/tmp/.harbor-sync-marker"),
            last_sync_file: PathBuf::from("/tmp/.harbor-last-sync"),
            rclone_config: PathBuf::from("/root/.config/rclone/rclone.conf"),
            workspace_template: PathBuf::from("/opt/harbor/workspace-template"),
            lock_files: vec![
                PathBuf::from("/tmp/openclaw-gateway.lock"),
                config_dir.join("gateway.lock"),
            ],
            config_dir,
        }
    }
}

/// R2 credentials for the transfer tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub account_id: String,
}

/// AI gateway account. Routing needs only the ids; onboarding through the
/// gateway also needs the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiGatewayCredentials {
    pub api_key: Option<String>,
    pub account_id: String,
    pub gateway_id: String,
}

/// Model provider credentials, in onboarding precedence order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthCredentials {
    pub ai_gateway: Option<AiGatewayCredentials>,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramCredentials {
    pub bot_token: String,
    pub dm_policy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscordCredentials {
    pub bot_token: String,
    pub dm_policy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackCredentials {
    pub bot_token: String,
    pub app_token: String,
}

/// Chat channel credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelCredentials {
    pub telegram: Option<TelegramCredentials>,
    pub discord: Option<DiscordCredentials>,
    pub slack: Option<SlackCredentials>,
}

/// Step timeouts and loop intervals.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Hard bound on the whole concurrent restore.
    pub restore: Duration,

    /// Bound on non-interactive onboarding.
    pub onboard: Duration,

    /// Bound on the doctor fix.
    pub doctor: Duration,

    /// Sleep between sync cycles.
    pub sync_interval: Duration,

    /// Connect timeout for the "already listening" guard.
    pub port_guard: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            restore: Duration::from_secs(60),
            onboard: Duration::from_secs(60),
            doctor: Duration::from_secs(60),
            sync_interval: Duration::from_secs(30),
            port_guard: Duration::from_secs(1),
        }
    }
}

impl EntrypointConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let storage = match (
            var("R2_ACCESS_KEY_ID"),
            var("R2_SECRET_ACCESS_KEY"),
            var("CF_ACCOUNT_ID"),
        ) {
            (Some(access_key_id), Some(secret_access_key), Some(account_id)) => {
                Some(StorageCredentials {
                    access_key_id,
                    secret_access_key,
                    account_id,
                })
            }
            _ => None,
        };

        let ai_gateway = match (var("CF_AI_GATEWAY_ACCOUNT_ID"), var("CF_AI_GATEWAY_GATEWAY_ID")) {
            (Some(account_id), Some(gateway_id)) => Some(AiGatewayCredentials {
                api_key: var("CLOUDFLARE_AI_GATEWAY_API_KEY"),
                account_id,
                gateway_id,
            }),
            _ => None,
        };

        let telegram = var("TELEGRAM_BOT_TOKEN").map(|bot_token| TelegramCredentials {
            bot_token,
            dm_policy: var("TELEGRAM_DM_POLICY"),
        });

        let discord = var("DISCORD_BOT_TOKEN").map(|bot_token| DiscordCredentials {
            bot_token,
            dm_policy: var("DISCORD_DM_POLICY"),
        });

        let slack = match (var("SLACK_BOT_TOKEN"), var("SLACK_APP_TOKEN")) {
            (Some(bot_token), Some(app_token)) => Some(SlackCredentials {
                bot_token,
                app_token,
            }),
            _ => None,
        };

        let dev_mode = var("OPENCLAW_DEV_MODE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            paths: Paths::default(),
            gateway_bin: var("HARBOR_GATEWAY_BIN").unwrap_or_else(|| "openclaw".to_string()),
            rclone_bin: var("HARBOR_RCLONE_BIN").unwrap_or_else(|| "rclone".to_string()),
            gateway_port: GATEWAY_PORT,
            storage,
            bucket: var("R2_BUCKET_NAME").unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
            auth: AuthCredentials {
                ai_gateway,
                anthropic_api_key: var("ANTHROPIC_API_KEY"),
                openai_api_key: var("OPENAI_API_KEY"),
            },
            gateway_token: var(GATEWAY_TOKEN_ENV),
            dev_mode,
            ai_gateway_model: var("CF_AI_GATEWAY_MODEL"),
            channels: ChannelCredentials {
                telegram,
                discord,
                slack,
            },
            timeouts: Timeouts::default(),
            crash_policy: CrashPolicy::default(),
        }
    }

    /// Secrets that must never be introduced into the config in plaintext
    /// by an automated repair.
    pub fn protected_secrets(&self) -> Vec<String> {
        let mut secrets = Vec::new();
        if let Some(gw) = &self.auth.ai_gateway {
            secrets.extend(gw.api_key.clone());
        }
        secrets.extend(self.auth.anthropic_api_key.clone());
        secrets.extend(self.auth.openai_api_key.clone());
        if let Some(t) = &self.channels.telegram {
            secrets.push(t.bot_token.clone());
        }
        if let Some(d) = &self.channels.discord {
            secrets.push(d.bot_token.clone());
        }
        if let Some(s) = &self.channels.slack {
            secrets.push(s.bot_token.clone());
            secrets.push(s.app_token.clone());
        }
        secrets
    }
}
