//! Command-line interface for the Mapboard topology watcher.
#![forbid(unsafe_code)]

use std::time::Duration;

use clap::{Parser, Subcommand};
use mapboard_data::{
    ConnectionSettings,
    settings::{DEFAULT_PASSWORD, DEFAULT_USER},
};

mod error;
mod rebuild;
mod send_event;
mod watch;

pub use error::CliError;

use rebuild::{RebuildArgs, run_rebuild};
use send_event::{SendEventArgs, run_send_event};
use watch::{WatchArgs, run_watch};

const ARG_DATABASE: &str = "database";
const ARG_PROJECT: &str = "project";
const ARG_REBUILD_TIMEOUT_SECS: &str = "rebuild_timeout_secs";
const ARG_POLL_INTERVAL_MS: &str = "poll_interval_ms";
const ENV_WATCH_DATABASE: &str = "MAPBOARD_CMDS_WATCH_DATABASE";
const ENV_SEND_EVENT_DATABASE: &str = "MAPBOARD_CMDS_SEND_EVENT_DATABASE";
const ENV_REBUILD_PROJECT: &str = "MAPBOARD_CMDS_REBUILD_PROJECT";

/// Rebuild program and arguments used when none is configured.
const DEFAULT_REBUILD_COMMAND: &str = "mapboard-topology-manager update";

/// Run the CLI with the current process arguments and environment.
///
/// # Errors
///
/// Returns [`CliError`] when parsing, configuration or the command fails.
pub async fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    match cli.command {
        Command::Watch(args) => {
            run_watch(args).await?;
        }
        Command::SendEvent(args) => {
            let mut stdout = std::io::stdout().lock();
            run_send_event(args, &mut stdout).await?;
        }
        Command::Rebuild(args) => run_rebuild(args).await?,
    }
    Ok(())
}

#[derive(Debug, Parser)]
#[command(
    name = "mapboard-topology",
    about = "Keep Mapboard project topologies in step with their linework",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Listen for change notifications and rebuild topologies one at a time.
    Watch(WatchArgs),
    /// Publish an event on a database's `events` channel.
    SendEvent(SendEventArgs),
    /// Rebuild one project's topology and exit.
    Rebuild(RebuildArgs),
}

/// Connection options shared by every subcommand, after layering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ConnectionOverrides {
    postgres_user: Option<String>,
    postgres_password: Option<String>,
    postgres_host: Option<String>,
    db_port: Option<u16>,
    container_internal: Option<bool>,
    core_database: Option<String>,
}

impl ConnectionOverrides {
    fn into_settings(self) -> ConnectionSettings {
        let mut settings = ConnectionSettings::default().with_credentials(
            self.postgres_user.as_deref().unwrap_or(DEFAULT_USER),
            self.postgres_password.as_deref().unwrap_or(DEFAULT_PASSWORD),
        );
        if let Some(host) = self.postgres_host {
            settings = settings.with_host(host);
        }
        if let Some(port) = self.db_port {
            settings = settings.with_port(port);
        }
        if let Some(core_database) = self.core_database {
            settings = settings.with_core_database(core_database);
        }
        settings.with_container_internal(self.container_internal.unwrap_or(false))
    }
}

/// Turn an optional count of `unit`s into a duration, rejecting zero.
fn non_zero_duration(
    field: &'static str,
    value: Option<u64>,
    default: Duration,
    unit: fn(u64) -> Duration,
) -> Result<Duration, CliError> {
    match value {
        Some(0) => Err(CliError::ZeroDuration { field }),
        Some(count) => Ok(unit(count)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests;
