//! Event log abstraction.
//!
//! The log is the single source of truth. It stores per-aggregate streams,
//! assigns each event a stream-local `sequence` and a log-wide `position`,
//! and enforces optimistic concurrency on push. This module describes the
//! storage contract ([`EventLog`], [`SubscribableLog`]), the query shape
//! ([`EventFilter`]) and the write shape ([`Commit`]), plus a reference
//! in-memory implementation.

use std::{future::Future, pin::Pin};

use futures_core::Stream;
pub use nonempty::NonEmpty;
use thiserror::Error;

use crate::{
    concurrency::{ConcurrencyConflict, ExpectedSequence},
    event::{AggregateRef, DomainEvent, Event, PendingEvent},
};

pub mod inmemory;

/// One branch of a log query.
///
/// Empty lists match anything; set fields are AND-ed together. A query is a
/// slice of filters whose results are OR-ed and merged by position.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub instance_id: Option<String>,
    pub aggregate_types: Vec<String>,
    pub aggregate_ids: Vec<String>,
    pub event_types: Vec<String>,
    pub resource_owner: Option<String>,
    /// Only events with `sequence >= min_sequence`.
    pub min_sequence: Option<u64>,
    /// Only events with `position > after_position`.
    pub after_position: Option<u64>,
}

impl EventFilter {
    /// Every event of a single aggregate stream.
    #[must_use]
    pub fn for_aggregate(aggregate: &AggregateRef) -> Self {
        Self {
            instance_id: Some(aggregate.instance_id.clone()),
            aggregate_types: vec![aggregate.aggregate_type.clone()],
            aggregate_ids: vec![aggregate.aggregate_id.clone()],
            ..Self::default()
        }
    }

    /// Every event of one tenant.
    #[must_use]
    pub fn for_instance(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: Some(instance_id.into()),
            ..Self::default()
        }
    }

    /// Events of the given type across every aggregate and instance.
    #[must_use]
    pub fn for_event<E: DomainEvent>() -> Self {
        Self {
            event_types: vec![E::KIND.to_string()],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn aggregate_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aggregate_types = types.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn event_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = types.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn instance(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    #[must_use]
    pub fn resource_owner(mut self, owner: impl Into<String>) -> Self {
        self.resource_owner = Some(owner.into());
        self
    }

    #[must_use]
    pub const fn min_sequence(mut self, sequence: u64) -> Self {
        self.min_sequence = Some(sequence);
        self
    }

    /// Only load events with position strictly greater than `position`.
    ///
    /// Projections use this to resume after their checkpoint.
    #[must_use]
    pub const fn after(mut self, position: u64) -> Self {
        self.after_position = Some(position);
        self
    }

    /// Whether `event` satisfies every constraint of this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        let listed = |list: &[String], value: &str| list.is_empty() || list.iter().any(|v| v == value);

        self.instance_id
            .as_deref()
            .is_none_or(|id| id == event.aggregate.instance_id)
            && listed(&self.aggregate_types, &event.aggregate.aggregate_type)
            && listed(&self.aggregate_ids, &event.aggregate.aggregate_id)
            && listed(&self.event_types, &event.event_type)
            && self
                .resource_owner
                .as_deref()
                .is_none_or(|owner| owner == event.resource_owner)
            && self.min_sequence.is_none_or(|min| event.sequence >= min)
            && self.after_position.is_none_or(|after| event.position > after)
    }
}

/// Whether `event` is selected by any filter of a query.
#[must_use]
pub fn matches_any(filters: &[EventFilter], event: &Event) -> bool {
    filters.iter().any(|filter| filter.matches(event))
}

/// Candidate events for one aggregate stream, pushed as a unit.
#[derive(Clone, Debug)]
pub struct Commit {
    pub aggregate: AggregateRef,
    pub resource_owner: String,
    pub editor_id: String,
    pub expected: ExpectedSequence,
    pub events: NonEmpty<PendingEvent>,
}

/// Error from push operations.
#[derive(Debug, Error)]
pub enum PushError<StoreError>
where
    StoreError: std::error::Error,
{
    /// Another writer moved one of the target streams. Nothing was written.
    #[error(transparent)]
    Conflict(#[from] ConcurrencyConflict),
    /// Underlying store error.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl<StoreError: std::error::Error> PushError<StoreError> {
    /// Create a store error variant.
    pub const fn store(err: StoreError) -> Self {
        Self::Store(err)
    }
}

/// Convenience alias for push outcomes returned by event logs.
pub type PushOutcome<Err> = Result<Vec<Event>, PushError<Err>>;

/// Abstraction over the persistence layer for event streams.
// ANCHOR: event_log_trait
pub trait EventLog: Send + Sync {
    /// Store-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load every event matching any of `filters`, ordered by position.
    ///
    /// For a single aggregate this is sequence order. Each call re-reads the
    /// current state of the log.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when loading fails.
    fn filter<'a>(
        &'a self,
        filters: &'a [EventFilter],
    ) -> impl Future<Output = Result<Vec<Event>, Self::Error>> + Send + 'a;

    /// Atomically append the events of every commit.
    ///
    /// All expected sequences are checked before anything is written. If any
    /// stream has moved, the push fails with [`PushError::Conflict`] and no
    /// event of any commit is stored.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Conflict`] on a version mismatch, or
    /// [`PushError::Store`] if persistence fails.
    fn push(
        &self,
        commits: NonEmpty<Commit>,
    ) -> impl Future<Output = PushOutcome<Self::Error>> + Send + '_;

    /// Current last sequence of a stream, `0` when empty.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when the lookup fails.
    fn latest_sequence<'a>(
        &'a self,
        aggregate: &'a AggregateRef,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;
}
// ANCHOR_END: event_log_trait

/// Boxed event stream returned by [`SubscribableLog::subscribe`].
pub type EventStream<'a, E> = Pin<Box<dyn Stream<Item = Result<Event, E>> + Send + 'a>>;

/// A log that supports push-based subscriptions.
///
/// This is a separate trait because not every backend can notify; the
/// in-memory log uses `tokio::sync::broadcast`, the PostgreSQL log uses
/// `LISTEN/NOTIFY`.
pub trait SubscribableLog: EventLog {
    /// Subscribe to events matching any of `filters`.
    ///
    /// The stream first yields every stored event after `from_position`
    /// (exclusive), then live events as they are pushed.
    ///
    /// **Delivery guarantee**: at-least-once. The stream may repeat events
    /// around the catch-up to live transition; consumers deduplicate by
    /// position.
    fn subscribe(
        &self,
        filters: Vec<EventFilter>,
        from_position: Option<u64>,
    ) -> EventStream<'_, Self::Error>;
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn event(event_type: &str, sequence: u64, position: u64) -> Event {
        Event {
            aggregate: AggregateRef::new("idp", "1", "inst"),
            resource_owner: "org-1".into(),
            editor_id: "user".into(),
            event_type: event_type.into(),
            payload: serde_json::Value::Null,
            sequence,
            position,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn default_filter_matches_everything() {
        assert!(EventFilter::default().matches(&event("a", 1, 1)));
    }

    #[test]
    fn aggregate_filter_is_restricted() {
        let filter = EventFilter::for_aggregate(&AggregateRef::new("idp", "1", "inst"));
        assert!(filter.matches(&event("a", 1, 1)));

        let other = EventFilter::for_aggregate(&AggregateRef::new("idp", "2", "inst"));
        assert!(!other.matches(&event("a", 1, 1)));

        let other_instance = EventFilter::for_aggregate(&AggregateRef::new("idp", "1", "x"));
        assert!(!other_instance.matches(&event("a", 1, 1)));
    }

    #[test]
    fn event_types_restrict_matches() {
        let filter = EventFilter::default().event_types(["a", "b"]);
        assert!(filter.matches(&event("b", 1, 1)));
        assert!(!filter.matches(&event("c", 1, 1)));
    }

    #[test]
    fn sequence_bound_is_inclusive_and_position_bound_exclusive() {
        let filter = EventFilter::default().min_sequence(2).after(10);
        assert!(!filter.matches(&event("a", 1, 11)));
        assert!(filter.matches(&event("a", 2, 11)));
        assert!(!filter.matches(&event("a", 2, 10)));
    }

    #[test]
    fn resource_owner_restricts_matches() {
        let filter = EventFilter::for_instance("inst").resource_owner("org-2");
        assert!(!filter.matches(&event("a", 1, 1)));
        let filter = EventFilter::for_instance("inst").resource_owner("org-1");
        assert!(filter.matches(&event("a", 1, 1)));
    }

    #[test]
    fn matches_any_ors_filters() {
        let filters = [
            EventFilter::default().event_types(["x"]),
            EventFilter::default().event_types(["a"]),
        ];
        assert!(matches_any(&filters, &event("a", 1, 1)));
        assert!(!matches_any(&filters[..1], &event("a", 1, 1)));
    }
}
