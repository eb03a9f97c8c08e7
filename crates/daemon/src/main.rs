use std::sync::Arc;

use clap::Parser;

use ha_daemon::bootstrap;
use ha_daemon::cli::{load_config, run_schedule_command, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to run when no subcommand is given.
        None => {
            bootstrap::init_tracing();
            let config = load_config(&cli.config)?;
            bootstrap::run(Arc::new(config), false).await
        }
        Some(Command::Run { text }) => {
            bootstrap::init_tracing();
            let config = load_config(&cli.config)?;
            bootstrap::run(Arc::new(config), text).await
        }
        Some(Command::Schedule { command }) => {
            let config = load_config(&cli.config)?;
            run_schedule_command(&config, command).await
        }
        Some(Command::Version) => {
            println!("hearthd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
