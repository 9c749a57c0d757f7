//! Serialised driver of topology rebuilds.
//!
//! The [`Coordinator`] receives change signals through a [`PendingSender`],
//! folds them into its [`PendingQueue`] and starts a rebuild whenever the
//! queue is non-empty and no rebuild is in flight.
//!
//! # Architecture
//!
//! The rebuild routine is synchronous, so each call runs on Tokio's blocking
//! pool while the coordinator keeps draining signals. A single-permit
//! semaphore marks the executing rebuild. The permit moves into the blocking
//! worker and is released only when the routine returns or unwinds, so no
//! second rebuild can start while the first is still running.
//!
//! The rebuild timeout is a watchdog: once it passes, the coordinator logs
//! the overrun and keeps waiting. Killing a hung rebuild is the routine's
//! job (`CommandRebuild` kills its child at its own timeout).
//!
//! A schema signalled while its own rebuild is running is queued again, since
//! the running rebuild may predate the change.

use std::{
    pin::Pin,
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
    time::{MissedTickBehavior, Sleep},
};
use tokio_util::sync::CancellationToken;

use crate::{
    ClientRegistry, PendingQueue, PendingReceiver, PendingSender, RebuildError, TopologyRebuild,
    pending::{TryRecvError, pending_channel},
};

/// Default interval between idle re-evaluations.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default budget for a single rebuild.
pub const DEFAULT_REBUILD_TIMEOUT: Duration = Duration::from_secs(600);

/// Shortest poll interval the coordinator accepts.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for a [`Coordinator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Physical database whose project schemas are coordinated.
    pub database: String,
    /// Interval between idle re-evaluations of the queue; raised to
    /// [`MIN_POLL_INTERVAL`] when shorter.
    pub poll_interval: Duration,
    /// Budget for a single rebuild before the overrun is reported.
    pub rebuild_timeout: Duration,
}

impl CoordinatorConfig {
    /// Coordinate rebuilds for schemas in `database` with default timings.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            rebuild_timeout: DEFAULT_REBUILD_TIMEOUT,
        }
    }

    /// Set the idle poll interval, no shorter than [`MIN_POLL_INTERVAL`].
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Set the per-rebuild time budget.
    #[must_use]
    pub const fn with_rebuild_timeout(mut self, rebuild_timeout: Duration) -> Self {
        self.rebuild_timeout = rebuild_timeout;
        self
    }
}

/// Outcome of a coordinator run, in completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorReport {
    /// Schemas whose rebuild succeeded.
    pub completed: Vec<String>,
    /// Schemas whose rebuild failed, panicked or was cancelled.
    pub failed: Vec<String>,
    /// Schemas dropped because no client could be created for them.
    pub skipped: Vec<String>,
}

/// Owns the pending queue, the in-flight marker and the client cache.
pub struct Coordinator {
    config: CoordinatorConfig,
    pending: PendingQueue,
    signals: PendingReceiver,
    in_flight: Arc<Semaphore>,
    clients: ClientRegistry,
    rebuild: Arc<dyn TopologyRebuild>,
    report: CoordinatorReport,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("pending", &self.pending)
            .field("rebuilding", &self.is_rebuilding())
            .field("clients", &self.clients)
            .finish_non_exhaustive()
    }
}

/// A rebuild the coordinator is waiting on.
///
/// The worker owns the in-flight permit; this value only observes it.
struct InFlightRebuild {
    schema: String,
    started: Instant,
    timeout: Duration,
    worker: JoinHandle<Result<(), RebuildError>>,
    deadline: Pin<Box<Sleep>>,
    overdue: bool,
}

impl InFlightRebuild {
    /// Wait for the worker to return.
    ///
    /// Cancel-safe: the select loop may drop this future and call it again.
    async fn outcome(&mut self) -> Result<(), RebuildError> {
        if !self.overdue {
            tokio::select! {
                joined = &mut self.worker => return self.settle(joined),
                () = &mut self.deadline => {
                    self.overdue = true;
                    warn!(
                        "Topology rebuild for {} has run past {:?}; waiting for it to stop",
                        self.schema, self.timeout
                    );
                }
            }
        }
        let joined = (&mut self.worker).await;
        self.settle(joined)
    }

    fn settle(
        &self,
        joined: Result<Result<(), RebuildError>, tokio::task::JoinError>,
    ) -> Result<(), RebuildError> {
        match joined {
            Ok(result) => result,
            Err(err) if err.is_panic() => Err(RebuildError::Panicked {
                schema: self.schema.clone(),
            }),
            Err(_) => Err(RebuildError::Cancelled {
                schema: self.schema.clone(),
            }),
        }
    }
}

async fn wait_for(current: &mut Option<InFlightRebuild>) -> Result<(), RebuildError> {
    match current {
        Some(rebuild) => rebuild.outcome().await,
        None => std::future::pending().await,
    }
}

enum Wake {
    Shutdown,
    Finished(Result<(), RebuildError>),
    Signal(Option<String>),
    Tick,
}

impl Coordinator {
    /// Create a coordinator and the sender that feeds it.
    pub fn new(
        config: CoordinatorConfig,
        clients: ClientRegistry,
        rebuild: Arc<dyn TopologyRebuild>,
    ) -> (Self, PendingSender) {
        let (sender, signals) = pending_channel();
        let coordinator = Self {
            config,
            pending: PendingQueue::new(),
            signals,
            in_flight: Arc::new(Semaphore::new(1)),
            clients,
            rebuild,
            report: CoordinatorReport::default(),
        };
        (coordinator, sender)
    }

    /// Schemas waiting for a rebuild.
    #[must_use]
    pub const fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    /// Whether a rebuild is currently executing.
    #[must_use]
    pub fn is_rebuilding(&self) -> bool {
        self.in_flight.available_permits() == 0
    }

    /// Drive rebuilds until `shutdown` fires or every sender is dropped and
    /// the queue has drained.
    ///
    /// A rebuild in flight when shutdown fires is allowed to finish.
    pub async fn run(mut self, shutdown: CancellationToken) -> CoordinatorReport {
        let mut ticker =
            tokio::time::interval(self.config.poll_interval.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut current: Option<InFlightRebuild> = None;
        let mut open = true;

        loop {
            open &= self.drain_signals();
            if current.is_none() && !shutdown.is_cancelled() {
                current = self.start_next().await;
            }
            if current.is_none() && !open && self.pending.is_empty() {
                debug!("Signal channel closed and queue drained");
                break;
            }

            let wake = tokio::select! {
                biased;
                () = shutdown.cancelled() => Wake::Shutdown,
                outcome = wait_for(&mut current), if current.is_some() => Wake::Finished(outcome),
                signal = self.signals.recv(), if open => Wake::Signal(signal),
                _ = ticker.tick() => Wake::Tick,
            };

            match wake {
                Wake::Shutdown => {
                    info!("Shutting down topology coordinator");
                    break;
                }
                Wake::Finished(outcome) => {
                    if let Some(rebuild) = current.take() {
                        self.finish(rebuild, outcome);
                    }
                }
                Wake::Signal(Some(schema)) => self.enqueue(schema),
                Wake::Signal(None) => open = false,
                Wake::Tick => {}
            }
        }

        if let Some(mut rebuild) = current.take() {
            info!(
                "Waiting for the topology rebuild of {} to finish",
                rebuild.schema
            );
            let outcome = rebuild.outcome().await;
            self.finish(rebuild, outcome);
        }
        if !self.pending.is_empty() {
            warn!(
                "Abandoning {} pending topology update(s): {:?}",
                self.pending.len(),
                self.pending.iter().collect::<Vec<_>>()
            );
        }
        self.report
    }

    /// Move every signal that has already arrived into the queue.
    ///
    /// Returns `false` once the channel is closed.
    fn drain_signals(&mut self) -> bool {
        loop {
            match self.signals.try_recv() {
                Ok(schema) => self.enqueue(schema),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn enqueue(&mut self, schema: String) {
        if self.pending.insert(schema.as_str()) {
            debug!("Queued topology update for {schema}");
        } else {
            debug!("Topology update for {schema} is already queued");
        }
    }

    /// Start a rebuild for the oldest queued schema that yields a client.
    async fn start_next(&mut self) -> Option<InFlightRebuild> {
        while !self.pending.is_empty() {
            let Ok(permit) = Arc::clone(&self.in_flight).try_acquire_owned() else {
                return None;
            };
            let schema = self.pending.pop()?;

            let client = match self
                .clients
                .get_client(&self.config.database, &schema)
                .await
            {
                Ok(client) => client,
                Err(err) => {
                    error!("Skipping topology update for {schema}: {err}");
                    self.report.skipped.push(schema);
                    continue;
                }
            };

            info!(
                "Updating topology for {schema} ({} still pending)",
                self.pending.len()
            );
            let routine = Arc::clone(&self.rebuild);
            let worker =
                tokio::task::spawn_blocking(move || run_holding(permit, &*routine, &client));
            return Some(InFlightRebuild {
                schema,
                started: Instant::now(),
                timeout: self.config.rebuild_timeout,
                worker,
                deadline: Box::pin(tokio::time::sleep(self.config.rebuild_timeout)),
                overdue: false,
            });
        }
        None
    }

    fn finish(&mut self, rebuild: InFlightRebuild, outcome: Result<(), RebuildError>) {
        let elapsed = rebuild.started.elapsed();
        match outcome {
            Ok(()) => {
                info!(
                    "Updated topology for {} in {:.1}s",
                    rebuild.schema,
                    elapsed.as_secs_f64()
                );
                self.report.completed.push(rebuild.schema.clone());
            }
            Err(err) => {
                error!("{err}");
                self.report.failed.push(rebuild.schema.clone());
            }
        }
        if rebuild.overdue {
            warn!(
                "Topology rebuild for {} took {:.1}s against a budget of {:?}",
                rebuild.schema,
                elapsed.as_secs_f64(),
                rebuild.timeout
            );
        }
    }
}

/// Run `routine` while holding the in-flight permit.
///
/// The permit is dropped when this returns or unwinds.
fn run_holding(
    permit: OwnedSemaphorePermit,
    routine: &dyn TopologyRebuild,
    client: &crate::ProjectClient,
) -> Result<(), RebuildError> {
    let _permit = permit;
    routine.rebuild(client)
}

#[cfg(test)]
mod tests;
