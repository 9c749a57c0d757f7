//! Coordination core for the Mapboard topology watcher.
//!
//! Responsibilities:
//! - Model project parameters and the change notifications published on the
//!   `events` channel.
//! - Coalesce change signals into an ordered, duplicate-free pending queue.
//! - Drive exactly one topology rebuild at a time through an external,
//!   synchronous rebuild routine.
//!
//! Boundaries:
//! - No database driver lives here; registry lookups, client construction and
//!   the rebuild itself are reached through the [`ProjectResolver`],
//!   [`ClientFactory`] and [`TopologyRebuild`] seams.
//!
//! Invariants:
//! - At most one rebuild executes at any instant, across all schemas.
//! - No global mutable state; the [`Coordinator`] owns everything it mutates.

#![forbid(unsafe_code)]

pub mod client;
pub mod coordinator;
pub mod event;
pub mod pending;
pub mod project;
pub mod rebuild;
pub mod resolver;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use client::{ClientError, ClientFactory, ClientRegistry, ProjectClient};
pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorReport};
pub use event::{
    DecodeError, EVENTS_CHANNEL, NotificationEvent, Signal, TEST_EVENT_TYPE,
    TOPOLOGY_CHANGE_EVENT_TYPE,
};
pub use pending::{PendingClosed, PendingQueue, PendingReceiver, PendingSender, pending_channel};
pub use project::{ProjectKey, ProjectParams};
pub use rebuild::{RebuildError, TopologyRebuild};
pub use resolver::{ProjectResolver, ResolveError, single_project};
