//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `start` (default) -- register the webhook and serve updates
//! - `config show|path` -- inspect configuration
//! - `version` -- print build/version info

use clap::{Parser, Subcommand};

/// Attendance poll bot for Telegram group chats.
#[derive(Parser, Debug)]
#[command(
    name = "rollcall",
    version = env!("CARGO_PKG_VERSION"),
    about = "Rollcall - attendance polls for Telegram group chats"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the bot (default when no subcommand is given).
    Start {
        /// Skip the setWebhook call (webhook registered out of band).
        #[arg(long)]
        no_register: bool,
    },

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Print version, build date, and git commit information.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the loaded configuration (bot token redacted) as JSON.
    Show,

    /// Print the resolved configuration file path.
    Path,
}

// ---------------------------------------------------------------------------
// Subcommand handlers
// ---------------------------------------------------------------------------

use crate::channels::{PollButtons, TelegramGateway};
use crate::commands::PollService;
use crate::config::{self, Config};
use crate::polls::{InMemoryPollStore, JsonFilePollStore, PollStateManager, PollStore};
use crate::server::{self, WebhookState};
use std::sync::Arc;
use std::time::Duration;

/// Run the `config show` subcommand.
pub fn handle_config_show() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config(&config::get_config_path())?;
    let pretty = serde_json::to_string_pretty(&config::redacted(&cfg))?;
    println!("{}", pretty);
    Ok(())
}

/// Run the `config path` subcommand.
pub fn handle_config_path() {
    println!("{}", config::get_config_path().display());
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("rollcall {}", env!("CARGO_PKG_VERSION"));
    println!("  commit: {}", env!("ROLLCALL_GIT_HASH"));
    println!("  built:  {}", env!("ROLLCALL_BUILD_DATE"));
}

/// Build the poll store selected by the config
pub async fn open_store(cfg: &Config) -> Result<Arc<dyn PollStore>, Box<dyn std::error::Error>> {
    match &cfg.store.path {
        Some(path) => {
            let store = JsonFilePollStore::open(path).await?;
            tracing::info!(path = %path.display(), "Using JSON poll store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("No store path configured, poll state will not survive restarts");
            Ok(Arc::new(InMemoryPollStore::new()))
        }
    }
}

/// Run the `start` subcommand: wire the service and serve the webhook.
pub async fn handle_start(cfg: Config, register_webhook: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(&cfg).await?;
    let manager = Arc::new(
        PollStateManager::new(store)
            .with_store_timeout(Duration::from_millis(cfg.store.timeout_ms)),
    );

    let gateway = Arc::new(TelegramGateway::new(
        cfg.telegram.clone(),
        PollButtons {
            join: cfg.texts.button_yes.clone(),
            leave: cfg.texts.button_no.clone(),
        },
    )?);

    let me = gateway.get_me().await?;
    tracing::info!(
        username = me.username.as_deref().unwrap_or("unknown"),
        "Authorized on Telegram"
    );

    if register_webhook {
        gateway.set_webhook().await?;
    }

    let service = Arc::new(PollService::new(manager, gateway, cfg.texts.clone()));
    let router = server::create_router(WebhookState { service }, &cfg.telegram.webhook_path());

    server::serve(&cfg.server, router, shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
