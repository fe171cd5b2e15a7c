//! Configuration loading
//!
//! Reads the JSON5 config file, applies environment overrides and exposes a
//! redacted view for printing.

pub mod types;

pub use types::{Config, StoreConfig, Texts, ValidationError};

use serde_json::Value;
use std::path::{Path, PathBuf};

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "ROLLCALL_CONFIG_PATH";
/// Environment variable overriding `telegram.botToken`
pub const BOT_TOKEN_ENV: &str = "ROLLCALL_BOT_TOKEN";
/// Environment variable overriding `telegram.webhookUrl`
pub const WEBHOOK_URL_ENV: &str = "ROLLCALL_WEBHOOK_URL";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Resolve the config file path.
///
/// `ROLLCALL_CONFIG_PATH` wins; otherwise `<config dir>/rollcall/config.json5`.
pub fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rollcall")
        .join("config.json5")
}

/// Load the config at `path` and apply environment overrides.
/// A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let mut config = load_config_file(path)?;
    apply_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Load and validate the config needed to run the bot
pub fn load_validated_config(path: &Path) -> Result<Config, ConfigError> {
    let config = load_config(path)?;
    config.validate().map_err(|errors| {
        let details: Vec<String> = errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect();
        ConfigError::Invalid(details.join("; "))
    })?;
    Ok(config)
}

fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Config::default());
        }
        Err(e) => return Err(e.into()),
    };

    if raw.trim().is_empty() {
        return Ok(Config::default());
    }

    json5::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Apply environment overrides through `lookup`
pub fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(token) = lookup(BOT_TOKEN_ENV).filter(|v| !v.trim().is_empty()) {
        config.telegram.bot_token = token;
    }
    if let Some(url) = lookup(WEBHOOK_URL_ENV).filter(|v| !v.trim().is_empty()) {
        config.telegram.webhook_url = Some(url);
    }
}

/// Config as JSON with the bot token masked
pub fn redacted(config: &Config) -> Value {
    let mut value = serde_json::to_value(config).unwrap_or(Value::Null);
    if let Some(token) = value.pointer_mut("/telegram/botToken") {
        if token.as_str().is_some_and(|t| !t.is_empty()) {
            *token = Value::String("***".to_string());
        }
    }
    value
}
