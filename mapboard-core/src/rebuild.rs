//! The external topology rebuild routine.

use std::time::Duration;

use thiserror::Error;

use crate::ProjectClient;

/// Recompute the topology of one project schema.
///
/// The routine is opaque and synchronous. The coordinator runs it on a
/// blocking worker, never more than one call at a time.
///
/// # Examples
///
/// ```
/// use mapboard_core::{ProjectClient, RebuildError, TopologyRebuild};
///
/// struct Noop;
///
/// impl TopologyRebuild for Noop {
///     fn rebuild(&self, _client: &ProjectClient) -> Result<(), RebuildError> {
///         Ok(())
///     }
/// }
/// ```
pub trait TopologyRebuild: Send + Sync + 'static {
    /// Rebuild the topology for the project bound to `client`.
    fn rebuild(&self, client: &ProjectClient) -> Result<(), RebuildError>;
}

/// Errors raised by a rebuild call.
#[derive(Debug, Error)]
pub enum RebuildError {
    /// The rebuild program could not be started.
    #[error("failed to start rebuild command {command:?}: {source}")]
    Spawn {
        /// Command line that failed to start.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Waiting on the rebuild program failed.
    #[error("lost track of the rebuild for {schema}: {source}")]
    Io {
        /// Schema being rebuilt.
        schema: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The rebuild finished unsuccessfully.
    #[error("topology rebuild for {schema} failed: {reason}")]
    Failed {
        /// Schema being rebuilt.
        schema: String,
        /// Exit status or message reported by the routine.
        reason: String,
    },
    /// The rebuild exceeded its time budget and was killed.
    #[error("topology rebuild for {schema} did not finish within {timeout:?}")]
    TimedOut {
        /// Schema being rebuilt.
        schema: String,
        /// Budget that was exceeded.
        timeout: Duration,
    },
    /// The rebuild routine panicked.
    #[error("topology rebuild for {schema} panicked")]
    Panicked {
        /// Schema being rebuilt.
        schema: String,
    },
    /// The worker running the rebuild was cancelled.
    #[error("topology rebuild for {schema} was cancelled")]
    Cancelled {
        /// Schema being rebuilt.
        schema: String,
    },
}
