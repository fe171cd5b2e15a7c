//! Messaging Gateway
//!
//! Interface to the chat platform used by the poll service. Implementations
//! own the wire protocol; callers only see chat, message and tap ids.

use crate::polls::{ChatId, MessageId};
use async_trait::async_trait;
use std::sync::Arc;

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors that can occur while talking to the chat platform
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Gateway not configured: {0}")]
    NotConfigured(String),
}

/// Outbound operations on the chat platform
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Send a poll message carrying join/leave controls
    async fn send_poll_message(&self, chat_id: ChatId, text: &str) -> GatewayResult<MessageId>;

    /// Strip the controls from a poll message that is no longer current
    async fn invalidate_poll_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> GatewayResult<()>;

    /// Answer a button tap with a short notice to the tapping member
    async fn acknowledge_tap(&self, tap_id: &str, text: &str) -> GatewayResult<()>;

    /// Send a plain text message
    async fn send_text(&self, chat_id: ChatId, text: &str) -> GatewayResult<MessageId>;
}

/// Type-erased gateway for sharing across tasks
pub type DynGateway = Arc<dyn MessagingGateway>;
