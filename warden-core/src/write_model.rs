//! Command-side state reconstruction.
//!
//! A write model is the state a command validates against. It is rebuilt
//! from scratch for every command by folding the aggregate's events and is
//! discarded afterwards:
//!
//! ```ignore
//! let mut replay = Replay::<OAuthIdpWriteModel>::new(aggregate);
//! let events = log.filter(&replay.query()).await?;
//! replay.append_events(events);
//! replay.reduce()?;
//! if !replay.exists() { /* NotFound */ }
//! ```
//!
//! Reduction is pure: nothing in this module performs I/O.

use chrono::{DateTime, Utc};

use crate::{
    event::{AggregateRef, Event, EventDecodeError, EventSet},
    log::EventFilter,
};

/// Mutate a write model with a single event.
///
/// Implement this once per event type the model listens to; the sum type
/// generated by `#[derive(WriteModel)]` dispatches to these impls.
pub trait Apply<E> {
    fn apply(&mut self, event: &E);
}

/// Lifecycle state of a write model.
pub trait State {
    /// The aggregate has been created and not removed since.
    fn exists(&self) -> bool;
}

/// Typed current state of one aggregate.
///
/// Usually derived with `#[derive(WriteModel)]`, which generates the event
/// sum type and the dispatch to [`Apply`] impls.
pub trait WriteModel: Default + Send {
    /// Aggregate type of the stream this model is rebuilt from.
    const AGGREGATE_TYPE: &'static str;

    /// Events the model reacts to. Others are skipped.
    type Event: EventSet;

    fn apply(&mut self, event: &Self::Event);

    fn exists(&self) -> bool;
}

/// Bookkeeping common to every write model.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectRoot {
    pub aggregate: AggregateRef,
    pub resource_owner: String,
    /// Highest sequence observed. Used as the expected version for the next
    /// push.
    pub sequence: u64,
    pub creation_date: Option<DateTime<Utc>>,
    pub change_date: Option<DateTime<Utc>>,
}

impl ObjectRoot {
    fn observe(&mut self, event: &Event) {
        if self.resource_owner.is_empty() {
            self.resource_owner.clone_from(&event.resource_owner);
        }
        self.creation_date.get_or_insert(event.created_at);
        self.change_date = Some(event.created_at);
        self.sequence = event.sequence;
    }
}

/// A write model together with its buffered, not yet reduced events.
#[derive(Debug)]
pub struct Replay<M> {
    root: ObjectRoot,
    model: M,
    buffer: Vec<Event>,
}

impl<M: WriteModel> Replay<M> {
    #[must_use]
    pub fn new(aggregate: AggregateRef) -> Self {
        Self {
            root: ObjectRoot {
                aggregate,
                ..ObjectRoot::default()
            },
            model: M::default(),
            buffer: Vec::new(),
        }
    }

    /// Filter criteria selecting the whole stream of the aggregate.
    ///
    /// Event types outside [`WriteModel::Event`] are still loaded so the
    /// observed sequence matches the stream head.
    #[must_use]
    pub fn query(&self) -> Vec<EventFilter> {
        vec![EventFilter::for_aggregate(&self.root.aggregate)]
    }

    /// Buffer events for the next [`reduce`](Self::reduce).
    ///
    /// Events must be supplied in sequence order; they are not re-sorted.
    pub fn append_events(&mut self, events: impl IntoIterator<Item = Event>) {
        self.buffer.extend(events);
    }

    /// Fold every buffered event into the model.
    ///
    /// Unknown event types only advance the observed sequence. Events of
    /// other aggregates are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`EventDecodeError`] when a known event carries a malformed
    /// payload. Events before the malformed one stay applied.
    pub fn reduce(&mut self) -> Result<(), EventDecodeError> {
        for event in std::mem::take(&mut self.buffer) {
            if event.aggregate != self.root.aggregate {
                tracing::trace!(
                    aggregate = %event.aggregate,
                    "skipping event of another aggregate"
                );
                continue;
            }
            if let Some(typed) = M::Event::decode(&event)? {
                self.model.apply(&typed);
            }
            self.root.observe(&event);
        }
        Ok(())
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.model.exists()
    }

    #[must_use]
    pub const fn model(&self) -> &M {
        &self.model
    }

    #[must_use]
    pub const fn root(&self) -> &ObjectRoot {
        &self.root
    }

    #[must_use]
    pub fn into_model(self) -> M {
        self.model
    }
}

/// Rebuild a write model from an ordered event sequence.
///
/// # Errors
///
/// Returns [`EventDecodeError`] when a known event carries a malformed
/// payload.
pub fn fold<M: WriteModel>(
    aggregate: AggregateRef,
    events: impl IntoIterator<Item = Event>,
) -> Result<Replay<M>, EventDecodeError> {
    let mut replay = Replay::new(aggregate);
    replay.append_events(events);
    replay.reduce()?;
    Ok(replay)
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::event::{DomainEvent, PendingEvent};

    #[derive(Debug, Serialize, Deserialize)]
    struct Opened {
        name: String,
    }

    impl DomainEvent for Opened {
        const KIND: &'static str = "door.opened";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Closed {}

    impl DomainEvent for Closed {
        const KIND: &'static str = "door.closed";
    }

    enum DoorEvent {
        Opened(Opened),
        Closed(Closed),
    }

    impl EventSet for DoorEvent {
        const EVENT_TYPES: &'static [&'static str] = &[Opened::KIND, Closed::KIND];

        fn decode(event: &Event) -> Result<Option<Self>, EventDecodeError> {
            Ok(match event.event_type.as_str() {
                Opened::KIND => Some(Self::Opened(event.decode()?)),
                Closed::KIND => Some(Self::Closed(event.decode()?)),
                _ => None,
            })
        }

        fn encode(&self) -> Result<PendingEvent, serde_json::Error> {
            match self {
                Self::Opened(e) => PendingEvent::new(e),
                Self::Closed(e) => PendingEvent::new(e),
            }
        }
    }

    #[derive(Default)]
    struct Door {
        open: bool,
        name: String,
    }

    impl WriteModel for Door {
        const AGGREGATE_TYPE: &'static str = "door";
        type Event = DoorEvent;

        fn apply(&mut self, event: &Self::Event) {
            match event {
                DoorEvent::Opened(e) => {
                    self.open = true;
                    self.name.clone_from(&e.name);
                }
                DoorEvent::Closed(_) => self.open = false,
            }
        }

        fn exists(&self) -> bool {
            self.open
        }
    }

    fn aggregate() -> AggregateRef {
        AggregateRef::new("door", "1", "inst")
    }

    fn event(event_type: &str, payload: serde_json::Value, sequence: u64) -> Event {
        Event {
            aggregate: aggregate(),
            resource_owner: "org".into(),
            editor_id: "user".into(),
            event_type: event_type.into(),
            payload,
            sequence,
            position: sequence,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn empty_stream_does_not_exist() {
        let replay = fold::<Door>(aggregate(), Vec::new()).unwrap();
        assert!(!replay.exists());
        assert_eq!(replay.root().sequence, 0);
        assert!(replay.root().creation_date.is_none());
    }

    #[test]
    fn fold_applies_events_in_order() {
        let replay = fold::<Door>(
            aggregate(),
            vec![
                event("door.opened", serde_json::json!({ "name": "front" }), 1),
                event("door.closed", serde_json::json!({}), 2),
            ],
        )
        .unwrap();
        assert!(!replay.exists());
        assert_eq!(replay.model().name, "front");
        assert_eq!(replay.root().sequence, 2);
        assert_eq!(replay.root().resource_owner, "org");
    }

    #[test]
    fn unknown_events_advance_sequence_only() {
        let replay = fold::<Door>(
            aggregate(),
            vec![
                event("door.opened", serde_json::json!({ "name": "front" }), 1),
                event("door.painted", serde_json::json!({ "colour": "red" }), 2),
            ],
        )
        .unwrap();
        assert!(replay.exists());
        assert_eq!(replay.root().sequence, 2);
    }

    #[test]
    fn malformed_payload_fails_reduce() {
        let mut replay = Replay::<Door>::new(aggregate());
        replay.append_events([event("door.opened", serde_json::json!({ "name": 1 }), 1)]);
        assert!(replay.reduce().is_err());
    }

    #[test]
    fn events_of_other_aggregates_are_ignored() {
        let mut foreign = event("door.opened", serde_json::json!({ "name": "back" }), 1);
        foreign.aggregate = AggregateRef::new("door", "2", "inst");
        let replay = fold::<Door>(aggregate(), vec![foreign]).unwrap();
        assert!(!replay.exists());
    }

    #[test]
    fn query_targets_the_aggregate_stream() {
        let replay = Replay::<Door>::new(aggregate());
        let query = replay.query();
        assert_eq!(query.len(), 1);
        assert_eq!(query[0].aggregate_ids, vec!["1".to_string()]);
        assert!(query[0].event_types.is_empty());
    }

    #[test]
    fn reduce_is_incremental() {
        let mut replay = Replay::<Door>::new(aggregate());
        replay.append_events([event("door.opened", serde_json::json!({ "name": "a" }), 1)]);
        replay.reduce().unwrap();
        assert!(replay.exists());
        replay.append_events([event("door.closed", serde_json::json!({}), 2)]);
        replay.reduce().unwrap();
        assert!(!replay.exists());
    }
}
