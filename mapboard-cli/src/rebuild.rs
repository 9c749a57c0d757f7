//! One-shot rebuild command implementation.

use std::{sync::Arc, time::Duration};

use clap::Parser;
use log::info;
use mapboard_core::{
    ClientFactory, ProjectKey, ProjectResolver, RebuildError, TopologyRebuild,
    coordinator::DEFAULT_REBUILD_TIMEOUT,
};
use mapboard_data::{CommandRebuild, ConnectionSettings, PgProjectResolver};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{
    ARG_PROJECT, ARG_REBUILD_TIMEOUT_SECS, CliError, ConnectionOverrides,
    DEFAULT_REBUILD_COMMAND, ENV_REBUILD_PROJECT, non_zero_duration,
};

/// CLI arguments for the `rebuild` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "rebuild",
    long_about = "Look up a project by slug in the registry and rebuild its \
                 topology once, outside any watcher.",
    about = "Rebuild one project's topology"
)]
#[ortho_config(prefix = "MAPBOARD")]
pub(crate) struct RebuildArgs {
    /// Slug of the project to rebuild.
    #[arg(value_name = "project")]
    #[serde(default)]
    pub(crate) project: Option<String>,
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
    /// Seconds the rebuild may run before it is killed.
    #[arg(long, value_name = "secs")]
    #[serde(default)]
    pub(crate) rebuild_timeout_secs: Option<u64>,
}

impl RebuildArgs {
    pub(crate) fn into_config(self) -> Result<RebuildConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        RebuildConfig::try_from(merged)
    }
}

/// Resolved `rebuild` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RebuildConfig {
    pub(crate) project: String,
    pub(crate) connection: ConnectionSettings,
    pub(crate) rebuild: CommandRebuild,
}

impl TryFrom<RebuildArgs> for RebuildConfig {
    type Error = CliError;

    fn try_from(args: RebuildArgs) -> Result<Self, Self::Error> {
        let project = args.project.ok_or(CliError::MissingArgument {
            field: ARG_PROJECT,
            env: ENV_REBUILD_PROJECT,
        })?;
        let timeout = non_zero_duration(
            ARG_REBUILD_TIMEOUT_SECS,
            args.rebuild_timeout_secs,
            DEFAULT_REBUILD_TIMEOUT,
            Duration::from_secs,
        )?;
        let command = args
            .rebuild_command
            .as_deref()
            .unwrap_or(DEFAULT_REBUILD_COMMAND);
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
            project,
            connection,
            rebuild: CommandRebuild::parse(command)?.with_timeout(timeout),
        })
    }
}

pub(crate) async fn run_rebuild(args: RebuildArgs) -> Result<(), CliError> {
    let config = args.into_config()?;
    let resolver = PgProjectResolver::new(&config.connection)?;
    rebuild_project(
        &config.project,
        &resolver,
        &config.connection,
        Arc::new(config.rebuild),
    )
    .await
}

/// Resolve `slug` and run `rebuild` for it on the blocking pool.
pub(crate) async fn rebuild_project(
    slug: &str,
    resolver: &dyn ProjectResolver,
    factory: &dyn ClientFactory,
    rebuild: Arc<dyn TopologyRebuild>,
) -> Result<(), CliError> {
    let params = resolver.resolve(&ProjectKey::slug(slug)).await?;
    let client = factory.build(params)?;
    let schema = client.data_schema().to_owned();
    info!("Rebuilding topology for project {slug} (schema {schema})");

    tokio::task::spawn_blocking(move || rebuild.rebuild(&client))
        .await
        .map_err(|err| {
            if err.is_panic() {
                RebuildError::Panicked {
                    schema: schema.clone(),
                }
            } else {
                RebuildError::Cancelled {
                    schema: schema.clone(),
                }
            }
        })??;
    info!("Rebuilt topology for {schema}");
    Ok(())
}

#[cfg(test)]
pub(crate) fn rebuild_config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<RebuildConfig, CliError> {
    let merged = RebuildArgs::merge_from_layers(layers).map_err(CliError::from)?;
    RebuildConfig::try_from(merged)
}
