//! Error types emitted by the Mapboard topology CLI.
//!
//! Keep this error type reasonably small, as every command returns
//! `Result<_, CliError>` and the workspace enables `clippy::result_large_err`.

use std::sync::Arc;

use mapboard_core::{ClientError, RebuildError, ResolveError};
use mapboard_data::{EmitError, EmptyCommand, ListenerError, SettingsError};
use thiserror::Error;

/// Errors emitted by the Mapboard topology CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (pass it on the command line or set {env})")]
    MissingArgument {
        /// Argument name.
        field: &'static str,
        /// Environment variable that can supply it.
        env: &'static str,
    },
    /// A duration option was set to zero.
    #[error("{field} must be greater than zero")]
    ZeroDuration {
        /// Option name.
        field: &'static str,
    },
    /// The configured rebuild command names no program.
    #[error("invalid rebuild command: {0}")]
    RebuildCommand(#[from] EmptyCommand),
    /// No connection URL could be built from the settings.
    #[error(transparent)]
    Settings(#[from] SettingsError),
    /// The project could not be found in the registry.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// A client handle could not be built for the project.
    #[error(transparent)]
    Client(#[from] ClientError),
    /// Listening for notifications failed.
    #[error(transparent)]
    Listen(#[from] ListenerError),
    /// Sending an event failed.
    #[error(transparent)]
    Emit(#[from] EmitError),
    /// The topology rebuild failed.
    #[error(transparent)]
    Rebuild(#[from] RebuildError),
    /// A background task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    /// Writing command output failed.
    #[error("failed to write output: {0}")]
    WriteOutput(#[source] std::io::Error),
}
