//! Change notifications published on the `events` channel.
//!
//! Payloads are small JSON objects:
//!
//! ```json
//! {"type": "topology-change", "schema": "naukluft", "time": "2024-05-01T12:00:00Z"}
//! ```
//!
//! Only `type` and `schema` are consumed. Any `type` other than `"test"`
//! (including a missing one) marks the schema for a rebuild; `"test"` events
//! are diagnostic pings and never queue work.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Channel the database publishes change notifications on.
pub const EVENTS_CHANNEL: &str = "events";

/// Event type used for diagnostic pings.
pub const TEST_EVENT_TYPE: &str = "test";

/// Event type emitted by the database triggers when linework changes.
pub const TOPOLOGY_CHANGE_EVENT_TYPE: &str = "topology-change";

/// A decoded notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Event type; `None` when the payload omitted it.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Data schema the event refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Timestamp supplied by the publisher, kept verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

/// What a notification asks the watcher to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Diagnostic ping; never queues work.
    Test {
        /// Schema named in the ping, if any.
        schema: Option<String>,
    },
    /// The named schema changed and needs its topology rebuilt.
    Change {
        /// Data schema to rebuild.
        schema: String,
    },
}

/// Errors raised while decoding a single notification payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload was not a JSON object of the expected shape.
    #[error("malformed notification payload {payload:?}: {source}")]
    Json {
        /// Raw payload as received.
        payload: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// A change event did not name a schema.
    #[error("change notification {payload:?} does not name a schema")]
    MissingSchema {
        /// Raw payload as received.
        payload: String,
    },
}

impl NotificationEvent {
    /// Build an event of the given type.
    pub fn new(kind: impl Into<String>, schema: Option<String>, time: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            schema,
            time: Some(time.into()),
        }
    }

    /// Decode a raw channel payload.
    pub fn decode(payload: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(payload).map_err(|source| DecodeError::Json {
            payload: payload.to_owned(),
            source,
        })
    }

    /// Serialise the event into a channel payload.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Whether this is a diagnostic ping.
    #[must_use]
    pub fn is_test(&self) -> bool {
        self.kind.as_deref() == Some(TEST_EVENT_TYPE)
    }

    /// Classify the event, rejecting change events without a schema.
    ///
    /// `payload` is only used to describe the failure.
    pub fn signal(self, payload: &str) -> Result<Signal, DecodeError> {
        if self.is_test() {
            return Ok(Signal::Test {
                schema: self.schema,
            });
        }
        match self.schema {
            Some(schema) if !schema.trim().is_empty() => Ok(Signal::Change { schema }),
            _ => Err(DecodeError::MissingSchema {
                payload: payload.to_owned(),
            }),
        }
    }
}

impl Signal {
    /// Decode and classify a raw channel payload in one step.
    ///
    /// # Examples
    ///
    /// ```
    /// use mapboard_core::Signal;
    ///
    /// let signal = Signal::from_payload(r#"{"type": "topology-change", "schema": "proj1"}"#)?;
    /// assert_eq!(signal, Signal::Change { schema: "proj1".into() });
    /// # Ok::<(), mapboard_core::DecodeError>(())
    /// ```
    pub fn from_payload(payload: &str) -> Result<Self, DecodeError> {
        NotificationEvent::decode(payload)?.signal(payload)
    }
}
