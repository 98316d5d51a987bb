//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.chatbridge/config.json`) and environment.
//! Bot credentials may be supplied either way; environment wins when set.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Bot credentials for the NLU service and the messaging platform.
    #[serde(default)]
    pub bot: BotConfig,

    /// NLU service endpoint.
    #[serde(default)]
    pub nlu: NluConfig,

    /// Messaging platform endpoint and token lifetime.
    #[serde(default)]
    pub messaging: MessagingConfig,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 15152).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    15152
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Credentials consumed by the bot. Immutable once the gateway starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    /// Language tag sent with every NLU query (default "en").
    #[serde(default = "default_apiai_lang")]
    pub apiai_lang: String,
    /// NLU client access token. Also the application part of the messaging endpoint id.
    #[serde(default)]
    pub apiai_access_token: String,
    /// Messaging service instance the grant is scoped to.
    #[serde(default)]
    pub service_sid: String,
    /// Account the token is issued for.
    #[serde(default)]
    pub account_sid: String,
    /// API signing key id (token issuer).
    #[serde(default)]
    pub signing_key_sid: String,
    /// API signing key secret (HMAC key).
    #[serde(default)]
    pub signing_key_secret: String,
    /// When true, raw webhook bodies are logged.
    #[serde(default)]
    pub dev_config: bool,
}

fn default_apiai_lang() -> String {
    "en".to_string()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            apiai_lang: default_apiai_lang(),
            apiai_access_token: String::new(),
            service_sid: String::new(),
            account_sid: String::new(),
            signing_key_sid: String::new(),
            signing_key_secret: String::new(),
            dev_config: false,
        }
    }
}

impl BotConfig {
    /// Names of required credentials that are empty, in config-key form.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        [
            ("apiaiAccessToken", &self.apiai_access_token),
            ("serviceSid", &self.service_sid),
            ("accountSid", &self.account_sid),
            ("signingKeySid", &self.signing_key_sid),
            ("signingKeySecret", &self.signing_key_secret),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
        .collect()
    }
}

/// NLU (api.ai) endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NluConfig {
    /// Base URL of the query API (default "https://api.api.ai/v1").
    #[serde(default = "default_nlu_base_url")]
    pub base_url: String,
    /// Protocol version passed as the `v` query parameter.
    #[serde(default = "default_nlu_protocol_version")]
    pub protocol_version: String,
}

fn default_nlu_base_url() -> String {
    "https://api.api.ai/v1".to_string()
}

fn default_nlu_protocol_version() -> String {
    "20150910".to_string()
}

impl Default for NluConfig {
    fn default() -> Self {
        Self {
            base_url: default_nlu_base_url(),
            protocol_version: default_nlu_protocol_version(),
        }
    }
}

/// Messaging platform settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagingConfig {
    /// Base URL of the chat service (default "https://chat.twilio.com").
    #[serde(default = "default_messaging_base_url")]
    pub base_url: String,
    /// Lifetime of issued access tokens in seconds (default 3600).
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

fn default_messaging_base_url() -> String {
    "https://chat.twilio.com".to_string()
}

fn default_token_ttl_secs() -> u64 {
    3600
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            base_url: default_messaging_base_url(),
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

/// Read an env var, trimmed; empty counts as unset.
fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Apply environment overrides to the bot credentials (env wins over the file).
pub fn apply_env_overrides(config: &mut Config) {
    let bot = &mut config.bot;
    let overrides: [(&str, &mut String); 6] = [
        ("APIAI_ACCESS_TOKEN", &mut bot.apiai_access_token),
        ("APIAI_LANG", &mut bot.apiai_lang),
        ("TWILIO_ACCOUNT_SID", &mut bot.account_sid),
        ("TWILIO_SERVICE_SID", &mut bot.service_sid),
        ("TWILIO_SIGNING_KEY_SID", &mut bot.signing_key_sid),
        ("TWILIO_SIGNING_KEY_SECRET", &mut bot.signing_key_secret),
    ];
    for (key, slot) in overrides {
        if let Some(v) = env_nonempty(key) {
            *slot = v;
        }
    }
    if let Some(v) = env_nonempty("CHATBRIDGE_DEV") {
        bot.dev_config = parse_flag(&v);
    }
}

fn parse_flag(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("CHATBRIDGE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".chatbridge").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Parse config JSON text. Does not apply environment overrides.
pub fn parse_config(s: &str) -> Result<Config> {
    serde_json::from_str(s).context("parsing config JSON")
}

/// Load config from the given path (or the default path). Missing file => default config.
/// Environment overrides are applied on top. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    apply_env_overrides(&mut config);
    Ok((config, path))
}
