//! Typed configuration structures
//!
//! Strongly-typed configuration with defaults for every field, so a missing
//! or partial config file still yields a usable [`Config`].

use crate::channels::telegram::TelegramConfig;
use crate::logging::LoggingConfig;
use crate::polls::MemberId;
use crate::server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Telegram bot settings
    pub telegram: TelegramConfig,

    /// Webhook listener settings
    pub server: ServerConfig,

    /// Poll record storage
    pub store: StoreConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Message texts shown in chats
    pub texts: Texts,
}

impl Config {
    /// Validate the settings required to run the bot
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.telegram.bot_token.trim().is_empty() {
            errors.push(ValidationError {
                path: "telegram.botToken".to_string(),
                message: "bot token is required".to_string(),
            });
        }

        if let Some(webhook_url) = &self.telegram.webhook_url {
            match url::Url::parse(webhook_url) {
                Ok(parsed) if parsed.scheme() == "https" => {}
                Ok(parsed) => errors.push(ValidationError {
                    path: "telegram.webhookUrl".to_string(),
                    message: format!("webhook must use https, got '{}'", parsed.scheme()),
                }),
                Err(e) => errors.push(ValidationError {
                    path: "telegram.webhookUrl".to_string(),
                    message: e.to_string(),
                }),
            }
        }

        if self.store.timeout_ms == 0 {
            errors.push(ValidationError {
                path: "store.timeoutMs".to_string(),
                message: "timeout must be greater than zero".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

/// Poll record storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// JSON file holding poll records (in-memory when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Bound on a single store call, in milliseconds
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            timeout_ms: 5_000,
        }
    }
}

/// Chat-facing message texts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Texts {
    /// Poll text sent on /start
    pub start: String,
    /// Poll text sent on /reset
    pub reset: String,
    /// Notice sent on /stop
    pub stop: String,
    /// Label of the join button
    pub button_yes: String,
    /// Label of the leave button
    pub button_no: String,
    /// Tap acknowledgement after joining
    pub joined: String,
    /// Tap acknowledgement after leaving
    pub left: String,
    /// Tap acknowledgement when the poll is gone
    pub poll_closed: String,
    /// Sent on /draw when nobody joined
    pub draw_empty: String,
    /// Sent on /draw; `{winner}` is replaced by the drawn member
    pub draw_winner: String,
}

impl Default for Texts {
    fn default() -> Self {
        Self {
            start: "Who's in? Tap below to join.".to_string(),
            reset: "Poll restarted. Tap below to join.".to_string(),
            stop: "Polls stopped for this chat. Send /start to begin again.".to_string(),
            button_yes: "I'm in".to_string(),
            button_no: "I'm out".to_string(),
            joined: "You're in!".to_string(),
            left: "You're out.".to_string(),
            poll_closed: "This poll is no longer active.".to_string(),
            draw_empty: "Nobody has joined yet.".to_string(),
            draw_winner: "The draw picked participant {winner}.".to_string(),
        }
    }
}

impl Texts {
    /// Draw announcement for `winner`
    pub fn render_draw_winner(&self, winner: MemberId) -> String {
        self.draw_winner.replace("{winner}", &winner.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.telegram.bot_token = "123:abc".to_string();
        config
    }

    #[test]
    fn test_default_config_requires_token() {
        let errors = Config::default().validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "telegram.botToken");
    }

    #[test]
    fn test_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_webhook_must_be_https() {
        let mut config = valid_config();
        config.telegram.webhook_url = Some("http://bot.example.com/".to_string());
        let errors = config.validate().unwrap_err();
        assert_eq!(errors[0].path, "telegram.webhookUrl");
        assert!(errors[0].message.contains("https"));

        config.telegram.webhook_url = Some("not a url".to_string());
        assert!(config.validate().is_err());

        config.telegram.webhook_url = Some("https://bot.example.com/".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_store_timeout_rejected() {
        let mut config = valid_config();
        config.store.timeout_ms = 0;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors[0].path, "store.timeoutMs");
    }

    #[test]
    fn test_partial_texts_keep_defaults() {
        let texts: Texts = serde_json::from_str(r#"{"start": "Training tonight?"}"#).unwrap();
        assert_eq!(texts.start, "Training tonight?");
        assert_eq!(texts.button_yes, Texts::default().button_yes);
    }

    #[test]
    fn test_render_draw_winner() {
        let texts = Texts {
            draw_winner: "Winner: {winner}!".to_string(),
            ..Default::default()
        };
        assert_eq!(texts.render_draw_winner(MemberId(77)), "Winner: 77!");
    }
}
