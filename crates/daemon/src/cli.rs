//! Command-line interface.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};

use ha_domain::action::{CompletionMode, NewAction};
use ha_domain::config::Config;
use ha_store::ActionStore;

#[derive(Parser)]
#[command(name = "hearthd", about = "Always-on voice assistant daemon")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the daemon (default).
    Run {
        /// Console mode: type turns instead of speaking them.
        #[arg(long)]
        text: bool,
    },
    /// Inspect and edit the scheduled-action table.
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommand,
    },
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
pub enum ScheduleCommand {
    /// List all actions with status.
    List,
    /// Insert a one-off action.
    Add {
        /// Natural-language command for the completion oracle.
        command: String,
        /// Seconds from now until the trigger.
        #[arg(long, conflicts_with = "at")]
        in_secs: Option<i64>,
        /// Local trigger time, `YYYY-MM-DD HH:MM:SS`.
        #[arg(long)]
        at: Option<String>,
        /// one_shot | retry_until_acknowledged | retry_with_condition
        #[arg(long, default_value = "one_shot")]
        mode: String,
    },
    /// Delete an action by id.
    Rm { id: u64 },
}

/// Load the configuration, falling back to defaults when the file is absent.
pub fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let config = toml::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
            Ok(config)
        }
        Err(_) => {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            Ok(Config::default())
        }
    }
}

/// Handle `hearthd schedule ...`.
pub async fn run_schedule_command(
    config: &Config,
    command: ScheduleCommand,
) -> anyhow::Result<()> {
    let store = Arc::new(ActionStore::new(&config.workspace.state_path)?);
    match command {
        ScheduleCommand::List => {
            let actions = store.list_all().await;
            if actions.is_empty() {
                println!("no scheduled actions");
                return Ok(());
            }
            for action in actions {
                let recurring = if action.recurring {
                    format!(
                        " every {}s",
                        action.recurring_interval_seconds.unwrap_or_default()
                    )
                } else {
                    String::new()
                };
                println!(
                    "{:>4}  {:<10}  {}  attempts={}{}  {}",
                    action.id,
                    format!("{:?}", action.status).to_lowercase(),
                    action
                        .trigger_time
                        .with_timezone(&Local)
                        .format("%Y-%m-%d %H:%M:%S"),
                    action.attempt_count,
                    recurring,
                    action.command,
                );
            }
        }
        ScheduleCommand::Add {
            command,
            in_secs,
            at,
            mode,
        } => {
            let trigger_time = match (in_secs, at) {
                (Some(secs), _) => Utc::now() + chrono::Duration::seconds(secs),
                (None, Some(at)) => {
                    let naive = NaiveDateTime::parse_from_str(&at, "%Y-%m-%d %H:%M:%S")
                        .map_err(|e| anyhow::anyhow!("parsing --at: {e}"))?;
                    Local
                        .from_local_datetime(&naive)
                        .earliest()
                        .ok_or_else(|| anyhow::anyhow!("--at names a nonexistent local time"))?
                        .with_timezone(&Utc)
                }
                (None, None) => anyhow::bail!("one of --in-secs or --at is required"),
            };
            let completion_mode = match mode.as_str() {
                "one_shot" => CompletionMode::OneShot,
                "retry_until_acknowledged" => CompletionMode::RetryUntilAcknowledged,
                "retry_with_condition" => CompletionMode::RetryWithCondition,
                other => anyhow::bail!("unknown mode '{other}'"),
            };
            let id = store
                .insert(NewAction {
                    command,
                    trigger_time,
                    completion_mode,
                    ..Default::default()
                })
                .await?;
            println!("scheduled action {id}");
        }
        ScheduleCommand::Rm { id } => {
            if store.delete(id).await? {
                println!("deleted action {id}");
            } else {
                println!("no action with id {id}");
            }
        }
    }
    Ok(())
}
