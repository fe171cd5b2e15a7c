//! Channels
//!
//! Messaging gateway interface and the Telegram implementation.

pub mod gateway;
pub mod telegram;

pub use gateway::{DynGateway, GatewayError, GatewayResult, MessagingGateway};
pub use telegram::{PollButtons, TelegramConfig, TelegramGateway, Update};
