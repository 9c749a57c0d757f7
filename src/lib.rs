//! Facade crate for the Mapboard topology watcher.
//!
//! This crate re-exports the coordination core and, behind the `postgres`
//! feature, the PostgreSQL adapters that feed it.

#![forbid(unsafe_code)]

pub use mapboard_core::{
    ClientError, ClientFactory, ClientRegistry, Coordinator, CoordinatorConfig, CoordinatorReport,
    DecodeError, EVENTS_CHANNEL, NotificationEvent, PendingQueue, PendingSender, ProjectClient,
    ProjectKey, ProjectParams, ProjectResolver, RebuildError, ResolveError, Signal,
    TopologyRebuild,
};

#[cfg(feature = "postgres")]
pub use mapboard_data::{
    CommandRebuild, ConnectionSettings, EmitError, ListenerConfig, ListenerError,
    NotificationListener, PgProjectResolver, send_event,
};
