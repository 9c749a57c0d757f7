//! Watch command implementation.

use std::{sync::Arc, time::Duration};

use clap::Parser;
use log::{info, warn};
use mapboard_core::{
    ClientRegistry, Coordinator, CoordinatorConfig, CoordinatorReport,
    coordinator::{DEFAULT_POLL_INTERVAL, DEFAULT_REBUILD_TIMEOUT},
};
use mapboard_data::{
    CommandRebuild, ConnectionSettings, ListenerConfig, NotificationListener, PgProjectResolver,
};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    ARG_DATABASE, ARG_POLL_INTERVAL_MS, ARG_REBUILD_TIMEOUT_SECS, CliError, ConnectionOverrides,
    DEFAULT_REBUILD_COMMAND, ENV_WATCH_DATABASE, non_zero_duration,
};

/// CLI arguments for the `watch` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "watch",
    long_about = "Listen on the database's `events` channel and rebuild the \
                 topology of each changed project schema, one schema at a \
                 time. Connection settings can come from CLI flags, \
                 configuration files, or environment variables.",
    about = "Watch a database for topology changes"
)]
#[ortho_config(prefix = "MAPBOARD")]
pub(crate) struct WatchArgs {
    /// Database whose project schemas are watched.
    #[arg(value_name = "database")]
    #[serde(default)]
    pub(crate) database: Option<String>,
    /// PostgreSQL user.
    #[arg(long, value_name = "user")]
    #[serde(default)]
    pub(crate) postgres_user: Option<String>,
    /// PostgreSQL password; prefer the environment over the command line.
    #[arg(long, value_name = "password")]
    #[serde(default)]
    pub(crate) postgres_password: Option<String>,
    /// PostgreSQL host.
    #[arg(long, value_name = "host")]
    #[serde(default)]
    pub(crate) postgres_host: Option<String>,
    /// PostgreSQL port.
    #[arg(long, value_name = "port")]
    #[serde(default)]
    pub(crate) db_port: Option<u16>,
    /// Connect through the container network instead of the published port.
    #[arg(long, value_name = "bool")]
    #[serde(default)]
    pub(crate) container_internal: Option<bool>,
    /// Database holding the project registry.
    #[arg(long, value_name = "database")]
    #[serde(default)]
    pub(crate) core_database: Option<String>,
    /// Program (and arguments) that rebuilds one project's topology.
    #[arg(long, value_name = "command")]
    #[serde(default)]
    pub(crate) rebuild_command: Option<String>,
    /// Seconds a rebuild may run before it is killed.
    #[arg(long, value_name = "secs")]
    #[serde(default)]
    pub(crate) rebuild_timeout_secs: Option<u64>,
    /// Milliseconds between idle re-evaluations of the queue.
    #[arg(long, value_name = "ms")]
    #[serde(default)]
    pub(crate) poll_interval_ms: Option<u64>,
    /// Reconnect after losing the database connection.
    #[arg(long, value_name = "bool")]
    #[serde(default)]
    pub(crate) reconnect: Option<bool>,
}

impl WatchArgs {
    pub(crate) fn into_config(self) -> Result<WatchConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        WatchConfig::try_from(merged)
    }
}

/// Resolved `watch` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WatchConfig {
    /// Watched database.
    pub(crate) database: String,
    /// How to reach the cluster.
    pub(crate) connection: ConnectionSettings,
    /// Rebuild routine run for each changed schema.
    pub(crate) rebuild: CommandRebuild,
    /// Budget for one rebuild.
    pub(crate) rebuild_timeout: Duration,
    /// Idle re-evaluation interval.
    pub(crate) poll_interval: Duration,
    /// Whether the listener reconnects after connection loss.
    pub(crate) reconnect: bool,
}

impl TryFrom<WatchArgs> for WatchConfig {
    type Error = CliError;

    fn try_from(args: WatchArgs) -> Result<Self, Self::Error> {
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_WATCH_DATABASE,
        })?;
        let rebuild_timeout = non_zero_duration(
            ARG_REBUILD_TIMEOUT_SECS,
            args.rebuild_timeout_secs,
            DEFAULT_REBUILD_TIMEOUT,
            Duration::from_secs,
        )?;
        let poll_interval = non_zero_duration(
            ARG_POLL_INTERVAL_MS,
            args.poll_interval_ms,
            DEFAULT_POLL_INTERVAL,
            Duration::from_millis,
        )?;
        let command = args
            .rebuild_command
            .as_deref()
            .unwrap_or(DEFAULT_REBUILD_COMMAND);
        let rebuild = CommandRebuild::parse(command)?.with_timeout(rebuild_timeout);
        let connection = ConnectionOverrides {
            postgres_user: args.postgres_user,
            postgres_password: args.postgres_password,
            postgres_host: args.postgres_host,
            db_port: args.db_port,
            container_internal: args.container_internal,
            core_database: args.core_database,
        }
        .into_settings();

        Ok(Self {
            database,
            connection,
            rebuild,
            rebuild_timeout,
            poll_interval,
            reconnect: args.reconnect.unwrap_or(true),
        })
    }
}

async fn cancel_on_interrupt(shutdown: CancellationToken) {
    tokio::select! {
        () = shutdown.cancelled() => {}
        interrupted = tokio::signal::ctrl_c() => match interrupted {
            Ok(()) => {
                info!("Interrupted; finishing the current rebuild before exiting");
                shutdown.cancel();
            }
            Err(err) => warn!("Cannot listen for Ctrl-C: {err}"),
        },
    }
}

pub(crate) async fn run_watch(args: WatchArgs) -> Result<CoordinatorReport, CliError> {
    let config = args.into_config()?;
    watch(config).await
}

async fn watch(config: WatchConfig) -> Result<CoordinatorReport, CliError> {
    let resolver = PgProjectResolver::new(&config.connection)?;
    let clients = ClientRegistry::new(Arc::new(resolver), Arc::new(config.connection.clone()));
    let coordinator_config = CoordinatorConfig::new(config.database.as_str())
        .with_poll_interval(config.poll_interval)
        .with_rebuild_timeout(config.rebuild_timeout);
    let (coordinator, sender) =
        Coordinator::new(coordinator_config, clients, Arc::new(config.rebuild));

    let url = config.connection.connection_url(&config.database)?;
    let listener_config =
        ListenerConfig::new(url, config.database.as_str()).with_reconnect(config.reconnect);
    let listener = NotificationListener::new(listener_config, sender);

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_interrupt(shutdown.clone()));
    let coordinator_task = tokio::spawn(coordinator.run(shutdown.clone()));

    let listened = listener.run(shutdown.clone()).await;
    if listened.is_err() {
        shutdown.cancel();
    }
    let report = coordinator_task.await?;
    info!(
        "Watch finished: {} rebuilt, {} failed, {} skipped",
        report.completed.len(),
        report.failed.len(),
        report.skipped.len()
    );
    listened?;
    Ok(report)
}

#[cfg(test)]
pub(crate) fn watch_config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<WatchConfig, CliError> {
    let merged = WatchArgs::merge_from_layers(layers).map_err(CliError::from)?;
    WatchConfig::try_from(merged)
}
