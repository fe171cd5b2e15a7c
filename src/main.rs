use clap::Parser;
use rollcall::cli::{self, Cli, Command, ConfigCommand};
use rollcall::{config, logging};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Start { no_register: false }) {
        Command::Start { no_register } => {
            let cfg = config::load_validated_config(&config::get_config_path())?;
            logging::init_logging(&cfg.logging)?;
            cli::handle_start(cfg, !no_register).await
        }
        Command::Config(ConfigCommand::Show) => cli::handle_config_show(),
        Command::Config(ConfigCommand::Path) => {
            cli::handle_config_path();
            Ok(())
        }
        Command::Version => {
            cli::handle_version();
            Ok(())
        }
    }
}
