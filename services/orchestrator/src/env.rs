//! Environment passed to the startup entrypoint.

use std::collections::BTreeMap;

use serde::Serialize;

/// Variables forwarded unchanged.
const PASSTHROUGH: &[&str] = &[
    "ANTHROPIC_API_KEY",
    "OPENAI_API_KEY",
    "CLOUDFLARE_AI_GATEWAY_API_KEY",
    "CF_AI_GATEWAY_ACCOUNT_ID",
    "CF_AI_GATEWAY_GATEWAY_ID",
    "CF_AI_GATEWAY_MODEL",
    "R2_ACCESS_KEY_ID",
    "R2_SECRET_ACCESS_KEY",
    "R2_BUCKET_NAME",
    "CF_ACCOUNT_ID",
    "TELEGRAM_BOT_TOKEN",
    "TELEGRAM_DM_POLICY",
    "DISCORD_BOT_TOKEN",
    "DISCORD_DM_POLICY",
    "SLACK_BOT_TOKEN",
    "SLACK_APP_TOKEN",
];

/// Variables forwarded under the name the container expects.
const RENAMED: &[(&str, &str)] = &[
    ("MOLTBOT_GATEWAY_TOKEN", "OPENCLAW_GATEWAY_TOKEN"),
    ("DEV_MODE", "OPENCLAW_DEV_MODE"),
];

/// Immutable set of environment variables for one spawn.
///
/// A key is either present with a non-empty value or absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EnvironmentBundle {
    vars: BTreeMap<String, String>,
}

impl EnvironmentBundle {
    /// Collect the bundle through a variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let pairs = PASSTHROUGH
            .iter()
            .map(|key| (*key, *key))
            .chain(RENAMED.iter().copied());

        let vars = pairs
            .filter_map(|(source, target)| {
                lookup(source)
                    .filter(|v| !v.is_empty())
                    .map(|v| (target.to_string(), v))
            })
            .collect();

        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvironmentBundle {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let vars = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v): &(String, String)| !v.is_empty())
            .collect();
        Self { vars }
    }
}
