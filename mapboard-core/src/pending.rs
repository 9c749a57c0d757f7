//! Coalescing queue of schemas awaiting a rebuild.
//!
//! Selection policy: FIFO by first-seen schema. A schema already waiting
//! keeps its place when it is signalled again, so a burst of notifications
//! for one schema costs one queue slot.

use std::collections::{HashSet, VecDeque};

use thiserror::Error;
use tokio::sync::mpsc;

pub use tokio::sync::mpsc::error::TryRecvError;

/// Ordered set of schema names with O(1) duplicate checks.
///
/// # Examples
///
/// ```
/// use mapboard_core::PendingQueue;
///
/// let mut queue = PendingQueue::new();
/// assert!(queue.insert("proj1"));
/// assert!(queue.insert("proj2"));
/// assert!(!queue.insert("proj1"));
/// assert_eq!(queue.pop().as_deref(), Some("proj1"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct PendingQueue {
    order: VecDeque<String>,
    present: HashSet<String>,
}

impl PendingQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `schema` unless it is already waiting.
    ///
    /// Returns `true` when the schema was newly queued.
    pub fn insert(&mut self, schema: impl Into<String>) -> bool {
        let name = schema.into();
        if self.present.contains(&name) {
            return false;
        }
        self.present.insert(name.clone());
        self.order.push_back(name);
        true
    }

    /// Remove and return the schema that has waited longest.
    pub fn pop(&mut self) -> Option<String> {
        let schema = self.order.pop_front()?;
        self.present.remove(&schema);
        Some(schema)
    }

    /// Whether `schema` is waiting.
    #[must_use]
    pub fn contains(&self, schema: &str) -> bool {
        self.present.contains(schema)
    }

    /// Number of waiting schemas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Waiting schemas in the order they will be rebuilt.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

/// Returned when the coordinator no longer accepts signals.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("the coordinator has stopped; schema {schema:?} was not queued")]
pub struct PendingClosed {
    /// Schema that could not be queued.
    pub schema: String,
}

/// Insert-only handle onto a coordinator's pending queue.
#[derive(Debug, Clone)]
pub struct PendingSender {
    tx: mpsc::UnboundedSender<String>,
}

impl PendingSender {
    /// Signal that `schema` needs a rebuild.
    pub fn insert(&self, schema: impl Into<String>) -> Result<(), PendingClosed> {
        self.tx
            .send(schema.into())
            .map_err(|mpsc::error::SendError(rejected)| PendingClosed { schema: rejected })
    }

    /// Whether the receiving coordinator has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving side of a [`PendingSender`], consumed by the coordinator.
#[derive(Debug)]
pub struct PendingReceiver {
    rx: mpsc::UnboundedReceiver<String>,
}

impl PendingReceiver {
    /// Wait for the next signalled schema; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Take a signal that has already arrived without waiting.
    pub fn try_recv(&mut self) -> Result<String, TryRecvError> {
        self.rx.try_recv()
    }
}

/// Create a linked sender/receiver pair.
#[must_use]
pub fn pending_channel() -> (PendingSender, PendingReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (PendingSender { tx }, PendingReceiver { rx })
}
