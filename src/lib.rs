//! rollcall library
//!
//! Attendance polls for Telegram group chats: per-chat poll state, the
//! Telegram gateway, the command router and the webhook server.

pub mod channels;
pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;
pub mod polls;
pub mod server;
