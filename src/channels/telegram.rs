//! Telegram Channel
//!
//! Telegram Bot API binding: update parsing for the webhook and the
//! messaging gateway used by the poll service.

use super::{GatewayError, GatewayResult, MessagingGateway};
use crate::commands::{Command, Inbound, Tap, TapAction};
use crate::polls::{ChatId, MemberId, MessageId};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Telegram channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelegramConfig {
    /// Bot token from BotFather
    pub bot_token: String,
    /// Public base URL for the webhook; the token is appended to it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Bot API base URL
    pub api_base: String,
    /// Timeout for a single API request, in seconds
    pub request_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            webhook_url: None,
            api_base: "https://api.telegram.org".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl TelegramConfig {
    /// Path the webhook listener serves updates on
    pub fn webhook_path(&self) -> String {
        format!("/{}", self.bot_token)
    }
}

/// Labels of the join/leave buttons
#[derive(Debug, Clone)]
pub struct PollButtons {
    pub join: String,
    pub leave: String,
}

/// Incoming update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Button tap on an inline keyboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

/// Bot API response envelope
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

impl Update {
    /// Route the update, if it carries a known command or button tap
    pub fn into_inbound(self) -> Option<Inbound> {
        if let Some(message) = self.message {
            let command = Command::parse(message.text.as_deref()?)?;
            return Some(Inbound::Command {
                chat_id: ChatId(message.chat.id),
                command,
            });
        }

        let query = self.callback_query?;
        let action = TapAction::parse(query.data.as_deref()?)?;
        let message = query.message?;
        Some(Inbound::Tap(Tap {
            id: query.id,
            chat_id: ChatId(message.chat.id),
            member_id: MemberId(query.from.id),
            message_id: Some(MessageId(message.message_id)),
            action,
        }))
    }
}

/// Telegram Bot API gateway
pub struct TelegramGateway {
    config: TelegramConfig,
    client: reqwest::Client,
    buttons: PollButtons,
}

impl TelegramGateway {
    /// Create a new Telegram gateway
    pub fn new(config: TelegramConfig, buttons: PollButtons) -> GatewayResult<Self> {
        if config.bot_token.trim().is_empty() {
            return Err(GatewayError::NotConfigured(
                "Bot token is required".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        Ok(Self {
            config,
            client,
            buttons,
        })
    }

    /// Fetch the bot's own account
    pub async fn get_me(&self) -> GatewayResult<User> {
        self.call("getMe", &json!({})).await
    }

    /// Register `<webhook_url><token>` as the update target
    pub async fn set_webhook(&self) -> GatewayResult<()> {
        let base = self.config.webhook_url.as_deref().ok_or_else(|| {
            GatewayError::NotConfigured("webhook URL is required".to_string())
        })?;
        let url = format!("{}{}", base, self.config.bot_token);

        let _: bool = self.call("setWebhook", &json!({ "url": url })).await?;
        tracing::info!(webhook = %base, "Telegram webhook registered");
        Ok(())
    }

    fn poll_keyboard(&self) -> InlineKeyboardMarkup {
        InlineKeyboardMarkup {
            inline_keyboard: vec![vec![
                InlineKeyboardButton {
                    text: self.buttons.join.clone(),
                    callback_data: TapAction::Join.callback_data().to_string(),
                },
                InlineKeyboardButton {
                    text: self.buttons.leave.clone(),
                    callback_data: TapAction::Leave.callback_data().to_string(),
                },
            ]],
        }
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: &Value) -> GatewayResult<R> {
        let url = format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            method
        );

        // Errors are stripped of the URL, it contains the token
        let response = self
            .client
            .post(&url)
            .json(params)
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.without_url().to_string()))?;
        let status = response.status();

        let body: ApiResponse<R> = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.without_url().to_string()))?;

        if !body.ok {
            return Err(GatewayError::Api {
                code: body.error_code.unwrap_or(i64::from(status.as_u16())),
                description: body.description.unwrap_or_default(),
            });
        }

        body.result
            .ok_or_else(|| GatewayError::InvalidResponse(format!("{} returned no result", method)))
    }
}

#[async_trait]
impl MessagingGateway for TelegramGateway {
    async fn send_poll_message(&self, chat_id: ChatId, text: &str) -> GatewayResult<MessageId> {
        tracing::debug!(chat_id = %chat_id, "Sending poll message");
        let message: Message = self
            .call(
                "sendMessage",
                &json!({
                    "chat_id": chat_id.0,
                    "text": text,
                    "reply_markup": self.poll_keyboard(),
                }),
            )
            .await?;
        Ok(MessageId(message.message_id))
    }

    async fn invalidate_poll_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> GatewayResult<()> {
        tracing::debug!(chat_id = %chat_id, message_id = %message_id, "Stripping poll controls");
        // Result is the edited message, or `true` for inline messages
        let _: Value = self
            .call(
                "editMessageReplyMarkup",
                &json!({
                    "chat_id": chat_id.0,
                    "message_id": message_id.0,
                    "reply_markup": { "inline_keyboard": [] },
                }),
            )
            .await?;
        Ok(())
    }

    async fn acknowledge_tap(&self, tap_id: &str, text: &str) -> GatewayResult<()> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                &json!({ "callback_query_id": tap_id, "text": text }),
            )
            .await?;
        Ok(())
    }

    async fn send_text(&self, chat_id: ChatId, text: &str) -> GatewayResult<MessageId> {
        tracing::debug!(chat_id = %chat_id, "Sending Telegram message");
        let message: Message = self
            .call("sendMessage", &json!({ "chat_id": chat_id.0, "text": text }))
            .await?;
        Ok(MessageId(message.message_id))
    }
}
