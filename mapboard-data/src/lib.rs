//! PostgreSQL adapters for the Mapboard topology watcher.
//!
//! Responsibilities:
//! - Build connection URLs for the Mapboard cluster and client handles for
//!   project databases.
//! - Read project parameters from the `projects` registry.
//! - Subscribe to the `events` channel and publish events on it.
//! - Run topology rebuilds through an external program.
//!
//! Boundaries:
//! - Coordination rules live in `mapboard-core`; this crate only implements
//!   its seams.
//!
//! Invariants:
//! - Credentials never appear in `Debug` output.
//! - No global mutable state.

#![forbid(unsafe_code)]

mod connection;
pub mod emitter;
pub mod listener;
pub mod rebuild;
pub mod resolver;
pub mod settings;

pub use emitter::{EmitError, build_event, send_event};
pub use listener::{
    Backoff, Dispatch, ListenerConfig, ListenerError, NotificationListener, dispatch_payload,
};
pub use rebuild::{CommandRebuild, DEFAULT_REBUILD_PROGRAM, EmptyCommand};
pub use resolver::{PgProjectResolver, lookup_query};
pub use settings::{ConnectionSettings, SettingsError};
