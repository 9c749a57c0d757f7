//! Publishing events on the `events` channel.

use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use mapboard_core::{EVENTS_CHANNEL, NotificationEvent, TEST_EVENT_TYPE};
use thiserror::Error;

use crate::{ConnectionSettings, SettingsError, connection::connect};

/// Errors raised while publishing an event.
#[derive(Debug, Error)]
pub enum EmitError {
    /// A change event must name the schema it refers to.
    #[error("{kind:?} events must name a schema")]
    MissingSchema {
        /// Requested event type.
        kind: String,
    },
    /// No connection URL could be built.
    #[error(transparent)]
    Settings(#[from] SettingsError),
    /// Opening the connection failed.
    #[error("failed to connect to database {database:?}: {source}")]
    Connect {
        /// Target database.
        database: String,
        /// Driver error.
        #[source]
        source: tokio_postgres::Error,
    },
    /// The event could not be serialised.
    #[error("failed to serialise event: {0}")]
    Serialise(#[from] serde_json::Error),
    /// `pg_notify` failed.
    #[error("failed to notify database {database:?}: {source}")]
    Notify {
        /// Target database.
        database: String,
        /// Driver error.
        #[source]
        source: tokio_postgres::Error,
    },
}

/// Build an event of type `kind` stamped with `time`.
///
/// # Errors
///
/// Returns [`EmitError::MissingSchema`] for a non-test event without a
/// schema, since listeners would reject it.
pub fn build_event(
    kind: &str,
    schema: Option<&str>,
    time: DateTime<Utc>,
) -> Result<NotificationEvent, EmitError> {
    if kind != TEST_EVENT_TYPE && schema.is_none_or(|name| name.trim().is_empty()) {
        return Err(EmitError::MissingSchema {
            kind: kind.to_owned(),
        });
    }
    Ok(NotificationEvent::new(
        kind,
        schema.map(str::to_owned),
        time.to_rfc3339_opts(SecondsFormat::Secs, true),
    ))
}

/// Publish an event of type `kind` on `database`'s `events` channel.
///
/// Returns the event that was sent.
///
/// # Errors
///
/// Returns [`EmitError`] when the event is invalid, the connection fails or
/// the notification is refused.
pub async fn send_event(
    settings: &ConnectionSettings,
    database: &str,
    schema: Option<&str>,
    kind: &str,
) -> Result<NotificationEvent, EmitError> {
    let event = build_event(kind, schema, Utc::now())?;
    let payload = event.encode()?;
    let url = settings.connection_url(database)?;

    let (client, _driver) = connect(url.as_str())
        .await
        .map_err(|source| EmitError::Connect {
            database: database.to_owned(),
            source,
        })?;
    client
        .execute("SELECT pg_notify($1, $2)", &[&EVENTS_CHANNEL, &payload])
        .await
        .map_err(|source| EmitError::Notify {
            database: database.to_owned(),
            source,
        })?;
    info!("Sent {payload} on {database}");
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::{fixture, rstest};

    #[fixture]
    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    #[rstest]
    fn change_event_carries_schema_and_time(noon: DateTime<Utc>) {
        let event = build_event("topology-change", Some("proj1"), noon).expect("valid event");
        assert_eq!(
            event.encode().expect("event encodes"),
            r#"{"type":"topology-change","schema":"proj1","time":"2024-05-01T12:00:00Z"}"#
        );
    }

    #[rstest]
    fn test_event_may_omit_the_schema(noon: DateTime<Utc>) {
        let event = build_event(TEST_EVENT_TYPE, None, noon).expect("valid event");
        assert!(event.is_test());
        assert_eq!(event.schema, None);
    }

    #[rstest]
    #[case(None)]
    #[case(Some(""))]
    #[case(Some("  "))]
    fn change_event_requires_a_schema(noon: DateTime<Utc>, #[case] schema: Option<&str>) {
        let err = build_event("topology-change", schema, noon).expect_err("schema missing");
        assert!(matches!(err, EmitError::MissingSchema { .. }));
    }
}
