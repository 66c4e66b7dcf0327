//! Event types shared by the log, write models and projections.
//!
//! - [`DomainEvent`] marks a payload struct with its stable `event_type`.
//! - [`EventSet`] is the sum type a write model or projection decodes into.
//! - [`Event`] is an event as stored in the log, [`PendingEvent`] is a
//!   candidate that has not been pushed yet.

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Marker trait for events that can be persisted and replayed.
///
/// Each event has a unique type identifier that is stored alongside the
/// payload. Changing it breaks replay of already stored events.
pub trait DomainEvent: Serialize + DeserializeOwned {
    /// Stable type identifier, e.g. `idp.oauth.added`.
    const KIND: &'static str;
}

/// Runtime access to an event's type identifier.
///
/// Implemented for every [`DomainEvent`] and for the sum types generated by
/// `#[derive(WriteModel)]`.
pub trait EventKind {
    fn kind(&self) -> &'static str;
}

impl<T: DomainEvent> EventKind for T {
    fn kind(&self) -> &'static str {
        T::KIND
    }
}

/// A closed set of event types decoded from stored events.
///
/// Decoding an event whose type is not part of the set yields `Ok(None)`:
/// readers must tolerate event types added after they were written.
pub trait EventSet: Sized {
    /// Type identifiers of every member of the set.
    const EVENT_TYPES: &'static [&'static str];

    /// Decode a stored event into a member of the set.
    ///
    /// # Errors
    ///
    /// Returns [`EventDecodeError::Malformed`] if the type is known but the
    /// payload does not deserialize.
    fn decode(event: &Event) -> Result<Option<Self>, EventDecodeError>;

    /// Serialize the member into a candidate event.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if the payload cannot be encoded.
    fn encode(&self) -> Result<PendingEvent, EncodeError>;
}

/// Error returned when an event payload cannot be serialized.
pub type EncodeError = serde_json::Error;

/// Error returned when a stored payload cannot be turned back into an event.
#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("malformed payload for event `{event_type}` at position {position}: {source}")]
    Malformed {
        event_type: String,
        position: u64,
        #[source]
        source: serde_json::Error,
    },
}

/// Identity of one event stream.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregateRef {
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub instance_id: String,
}

impl AggregateRef {
    #[must_use]
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            instance_id: instance_id.into(),
        }
    }
}

impl std::fmt::Display for AggregateRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}@{}",
            self.aggregate_type, self.aggregate_id, self.instance_id
        )
    }
}

/// Event materialized from the log.
///
/// `sequence` is local to the aggregate stream and starts at 1. `position`
/// is global across the whole log and only ever grows.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub aggregate: AggregateRef,
    pub resource_owner: String,
    pub editor_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub sequence: u64,
    pub position: u64,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Deserialize the payload as `E`.
    ///
    /// # Errors
    ///
    /// Returns [`EventDecodeError::Malformed`] when the payload does not match
    /// the shape of `E`.
    pub fn decode<E: DomainEvent>(&self) -> Result<E, EventDecodeError> {
        serde_json::from_value(self.payload.clone()).map_err(|source| EventDecodeError::Malformed {
            event_type: self.event_type.clone(),
            position: self.position,
            source,
        })
    }

    #[must_use]
    pub fn is<E: DomainEvent>(&self) -> bool {
        self.event_type == E::KIND
    }
}

/// Candidate event produced by a command, not yet sequenced.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl PendingEvent {
    /// Serialize a typed event.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `event` cannot be encoded as JSON.
    pub fn new<E: DomainEvent>(event: &E) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_type: E::KIND.to_string(),
            payload: serde_json::to_value(event)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct NameChanged {
        name: String,
    }

    impl DomainEvent for NameChanged {
        const KIND: &'static str = "thing.name.changed";
    }

    fn stored(payload: serde_json::Value) -> Event {
        Event {
            aggregate: AggregateRef::new("thing", "1", "inst"),
            resource_owner: "inst".into(),
            editor_id: "user".into(),
            event_type: NameChanged::KIND.into(),
            payload,
            sequence: 1,
            position: 7,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn pending_event_carries_kind_and_payload() {
        let pending = PendingEvent::new(&NameChanged {
            name: "acme".into(),
        })
        .unwrap();
        assert_eq!(pending.event_type, "thing.name.changed");
        assert_eq!(pending.payload, serde_json::json!({ "name": "acme" }));
    }

    #[test]
    fn decode_reads_payload() {
        let event = stored(serde_json::json!({ "name": "acme" }));
        assert!(event.is::<NameChanged>());
        assert_eq!(
            event.decode::<NameChanged>().unwrap(),
            NameChanged {
                name: "acme".into()
            }
        );
    }

    #[test]
    fn decode_reports_malformed_payload_with_position() {
        let event = stored(serde_json::json!({ "name": 42 }));
        let err = event.decode::<NameChanged>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("thing.name.changed"));
        assert!(msg.contains("position 7"));
    }

    #[test]
    fn aggregate_ref_display() {
        let aggregate = AggregateRef::new("idp", "42", "tenant");
        assert_eq!(aggregate.to_string(), "idp/42@tenant");
    }
}
