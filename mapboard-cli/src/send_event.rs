//! Send-event command implementation.

use std::io::Write;

use clap::Parser;
use mapboard_core::{NotificationEvent, TEST_EVENT_TYPE};
use mapboard_data::{ConnectionSettings, EmitError, send_event};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{ARG_DATABASE, CliError, ConnectionOverrides, ENV_SEND_EVENT_DATABASE};

/// CLI arguments for the `send-event` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "send-event",
    long_about = "Publish an event on the database's `events` channel. Test \
                 events check that a watcher is listening; any other type \
                 asks watchers to rebuild the named schema.",
    about = "Send an event to watchers of a database"
)]
#[ortho_config(prefix = "MAPBOARD")]
pub(crate) struct SendEventArgs {
    /// Database to notify.
    #[arg(value_name = "database")]
    #[serde(default)]
    pub(crate) database: Option<String>,
    /// Data schema the event refers to.
    #[arg(value_name = "schema")]
    #[serde(default)]
    pub(crate) schema: Option<String>,
    /// Event type; anything other than `test` requests a rebuild.
    #[arg(long = "type", value_name = "kind")]
    #[serde(default)]
    pub(crate) event_type: Option<String>,
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
}

impl SendEventArgs {
    pub(crate) fn into_config(self) -> Result<SendEventConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        SendEventConfig::try_from(merged)
    }
}

/// Resolved `send-event` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SendEventConfig {
    pub(crate) database: String,
    pub(crate) schema: Option<String>,
    pub(crate) kind: String,
    pub(crate) connection: ConnectionSettings,
}

impl TryFrom<SendEventArgs> for SendEventConfig {
    type Error = CliError;

    fn try_from(args: SendEventArgs) -> Result<Self, Self::Error> {
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_SEND_EVENT_DATABASE,
        })?;
        let connection = ConnectionOverrides {
            postgres_user: args.postgres_user,
            postgres_password: args.postgres_password,
            postgres_host: args.postgres_host,
            db_port: args.db_port,
            container_internal: args.container_internal,
            core_database: None,
        }
        .into_settings();
        Ok(Self {
            database,
            schema: args.schema,
            kind: args.event_type.unwrap_or_else(|| TEST_EVENT_TYPE.to_owned()),
            connection,
        })
    }
}

pub(crate) async fn run_send_event(
    args: SendEventArgs,
    writer: &mut dyn Write,
) -> Result<(), CliError> {
    let config = args.into_config()?;
    let event = send_event(
        &config.connection,
        &config.database,
        config.schema.as_deref(),
        &config.kind,
    )
    .await?;
    write_sent_event(writer, &event)
}

/// Echo the payload that was published, one JSON object per line.
pub(crate) fn write_sent_event(
    writer: &mut dyn Write,
    event: &NotificationEvent,
) -> Result<(), CliError> {
    let payload = event.encode().map_err(EmitError::Serialise)?;
    writeln!(writer, "{payload}").map_err(CliError::WriteOutput)
}

#[cfg(test)]
pub(crate) fn send_event_config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<SendEventConfig, CliError> {
    let merged = SendEventArgs::merge_from_layers(layers).map_err(CliError::from)?;
    SendEventConfig::try_from(merged)
}
