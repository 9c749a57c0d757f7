//! `LISTEN`-based intake of change notifications.
//!
//! The [`NotificationListener`] holds one dedicated connection to the watched
//! database, subscribes to the `events` channel and forwards every change
//! notification to the coordinator through a [`PendingSender`].
//!
//! # Architecture
//!
//! `tokio-postgres` only surfaces notifications through the connection's
//! message stream, so the connection is driven by its own task that turns
//! each message into a [`ListenMessage`] and forwards it over a channel. The
//! listener task reads that channel alongside the shutdown token.

use std::{fmt, time::Duration};

use futures_util::{Stream, StreamExt, stream};
use log::{debug, info, warn};
use mapboard_core::{EVENTS_CHANNEL, PendingClosed, PendingSender, Signal};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_postgres::{AsyncMessage, NoTls};
use tokio_util::sync::CancellationToken;

/// First delay before reconnecting.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Longest delay between reconnection attempts.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Errors that end a listening session.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Opening the connection failed.
    #[error("failed to connect to database {database:?}: {source}")]
    Connect {
        /// Watched database.
        database: String,
        /// Driver error.
        #[source]
        source: tokio_postgres::Error,
    },
    /// Subscribing to the events channel failed.
    #[error("failed to subscribe to notifications in database {database:?}: {source}")]
    Subscribe {
        /// Watched database.
        database: String,
        /// Driver error.
        #[source]
        source: tokio_postgres::Error,
    },
    /// The connection closed while listening.
    #[error("lost the connection to database {database:?}")]
    ConnectionLost {
        /// Watched database.
        database: String,
        /// Driver error, when the connection failed rather than closed.
        #[source]
        source: Option<tokio_postgres::Error>,
    },
}

/// Outcome of handling one notification payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The schema was forwarded to the coordinator.
    Queued(String),
    /// A diagnostic ping; nothing was queued.
    Ignored,
    /// The payload could not be decoded; nothing was queued.
    Rejected,
}

/// Decode `payload` and forward any change signal to `sender`.
///
/// Decode failures are logged and reported as [`Dispatch::Rejected`]; they
/// never end the session.
///
/// # Errors
///
/// Returns [`PendingClosed`] once the coordinator has stopped.
///
/// # Examples
///
/// ```
/// use mapboard_core::pending_channel;
/// use mapboard_data::{Dispatch, dispatch_payload};
///
/// let (sender, _receiver) = pending_channel();
/// let outcome = dispatch_payload(r#"{"type": "test"}"#, &sender)?;
/// assert_eq!(outcome, Dispatch::Ignored);
/// # Ok::<(), mapboard_core::PendingClosed>(())
/// ```
pub fn dispatch_payload(payload: &str, sender: &PendingSender) -> Result<Dispatch, PendingClosed> {
    match Signal::from_payload(payload) {
        Ok(Signal::Test { schema }) => {
            info!(
                "Received test event for schema {}",
                schema.as_deref().unwrap_or("<none>")
            );
            Ok(Dispatch::Ignored)
        }
        Ok(Signal::Change { schema }) => {
            debug!("Received change event for schema {schema}");
            sender.insert(schema.as_str())?;
            Ok(Dispatch::Queued(schema))
        }
        Err(err) => {
            warn!("Ignoring notification: {err}");
            Ok(Dispatch::Rejected)
        }
    }
}

/// Exponential reconnect delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    /// Start at `initial`, doubling up to `max`.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            next: initial.min(max),
        }
    }

    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    /// Return to the initial delay.
    pub fn reset(&mut self) {
        self.next = self.initial.min(self.max);
    }
}

/// Settings for a [`NotificationListener`].
#[derive(Clone)]
pub struct ListenerConfig {
    url: String,
    database: String,
    reconnect: bool,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl fmt::Debug for ListenerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerConfig")
            .field("database", &self.database)
            .field("reconnect", &self.reconnect)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .finish_non_exhaustive()
    }
}

impl ListenerConfig {
    /// Listen on `database`, reachable at `url`, reconnecting on loss.
    pub fn new(url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: database.into(),
            reconnect: true,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }

    /// Whether to reconnect after the connection drops.
    #[must_use]
    pub const fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the reconnect delay bounds.
    #[must_use]
    pub const fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Watched database.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Whether the listener reconnects after the connection drops.
    #[must_use]
    pub const fn reconnect(&self) -> bool {
        self.reconnect
    }
}

/// Why a single session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    CoordinatorStopped,
}

/// A message read from the listening connection.
#[derive(Debug)]
enum ListenMessage {
    Notification { channel: String, payload: String },
    Notice(String),
    Other,
    Failed(tokio_postgres::Error),
}

impl ListenMessage {
    fn from_driver(message: Result<AsyncMessage, tokio_postgres::Error>) -> Self {
        match message {
            Ok(AsyncMessage::Notification(notification)) => Self::Notification {
                channel: notification.channel().to_owned(),
                payload: notification.payload().to_owned(),
            },
            Ok(AsyncMessage::Notice(notice)) => Self::Notice(notice.message().to_owned()),
            Ok(_) => Self::Other,
            Err(source) => Self::Failed(source),
        }
    }
}

/// Route every message from `messages` until shutdown, coordinator exit or
/// connection loss.
///
/// The end of the stream counts as a lost connection.
async fn forward_messages<S>(
    mut messages: S,
    database: &str,
    sender: &PendingSender,
    shutdown: &CancellationToken,
) -> Result<SessionEnd, ListenerError>
where
    S: Stream<Item = ListenMessage> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => return Ok(SessionEnd::Shutdown),
            next = messages.next() => next,
        };
        match next {
            Some(ListenMessage::Notification { channel, payload }) => {
                if channel != EVENTS_CHANNEL {
                    debug!("Ignoring notification on channel {channel}");
                    continue;
                }
                if dispatch_payload(&payload, sender).is_err() {
                    return Ok(SessionEnd::CoordinatorStopped);
                }
            }
            Some(ListenMessage::Notice(notice)) => debug!("Server notice: {notice}"),
            Some(ListenMessage::Other) => {}
            Some(ListenMessage::Failed(source)) => {
                return Err(ListenerError::ConnectionLost {
                    database: database.to_owned(),
                    source: Some(source),
                });
            }
            None => {
                return Err(ListenerError::ConnectionLost {
                    database: database.to_owned(),
                    source: None,
                });
            }
        }
    }
}

/// Subscribes to `events` and feeds the coordinator.
#[derive(Debug)]
pub struct NotificationListener {
    config: ListenerConfig,
    sender: PendingSender,
}

impl NotificationListener {
    /// Create a listener forwarding change signals to `sender`.
    #[must_use]
    pub const fn new(config: ListenerConfig, sender: PendingSender) -> Self {
        Self { config, sender }
    }

    /// Listen until `shutdown` fires or the coordinator stops.
    ///
    /// Dropping out of this function drops the listener's sender, which lets
    /// the coordinator drain and finish.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the session fails and reconnecting is
    /// disabled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ListenerError> {
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);
        loop {
            match self.session(&shutdown, &mut backoff).await {
                Ok(SessionEnd::Shutdown) => {
                    info!("Stopped listening on {}", self.config.database);
                    return Ok(());
                }
                Ok(SessionEnd::CoordinatorStopped) => {
                    debug!("Coordinator stopped; no longer listening");
                    return Ok(());
                }
                Err(err) if self.config.reconnect => {
                    let delay = backoff.next_delay();
                    warn!("{err}; reconnecting in {delay:?}");
                    tokio::select! {
                        () = shutdown.cancelled() => return Ok(()),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn session(
        &self,
        shutdown: &CancellationToken,
        backoff: &mut Backoff,
    ) -> Result<SessionEnd, ListenerError> {
        let database = &self.config.database;
        let (client, mut connection) = tokio_postgres::connect(&self.config.url, NoTls)
            .await
            .map_err(|source| ListenerError::Connect {
                database: database.clone(),
                source,
            })?;

        let (tx, mut received) = mpsc::unbounded_channel();
        let driver = tokio::spawn(async move {
            let mut stream = stream::poll_fn(move |cx| connection.poll_message(cx));
            while let Some(message) = stream.next().await {
                let forwarded = ListenMessage::from_driver(message);
                let failed = matches!(forwarded, ListenMessage::Failed(_));
                if tx.send(forwarded).is_err() || failed {
                    break;
                }
            }
        });
        let _driver = AbortOnDrop(driver);

        client
            .batch_execute(&format!("LISTEN {EVENTS_CHANNEL}"))
            .await
            .map_err(|source| ListenerError::Subscribe {
                database: database.clone(),
                source,
            })?;
        backoff.reset();
        info!("Listening for {EVENTS_CHANNEL} notifications on {database}");

        let messages = stream::poll_fn(move |cx| received.poll_recv(cx));
        forward_messages(messages, database, &self.sender, shutdown).await
    }
}

struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
