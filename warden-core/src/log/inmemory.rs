//! In-memory event log implementation for testing.
//!
//! This module provides [`Log`], a thread-safe in-memory implementation of
//! [`EventLog`](super::EventLog) and [`SubscribableLog`](super::SubscribableLog)
//! suitable for unit tests, examples and single-process deployments.
//!
//! # Example
//!
//! ```
//! use warden_core::log::inmemory;
//!
//! let log = inmemory::Log::new();
//! ```

use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{Arc, RwLock},
};

use chrono::Utc;
use nonempty::NonEmpty;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{
    concurrency::{ConcurrencyConflict, ExpectedSequence},
    event::{AggregateRef, Event},
    log::{
        Commit, EventFilter, EventLog, EventStream, PushError, PushOutcome, SubscribableLog,
        matches_any,
    },
};

const LIVE_BUFFER_CAPACITY: usize = 1024;

/// In-memory event log.
///
/// Events live in a single vector ordered by global position; a side table
/// tracks the last sequence of every stream for concurrency checks. Clones
/// share the same underlying log.
#[derive(Clone)]
pub struct Log {
    inner: Arc<RwLock<Inner>>,
    live: broadcast::Sender<Event>,
}

struct Inner {
    events: Vec<Event>,
    streams: HashMap<AggregateRef, u64>,
    next_position: u64,
}

impl Log {
    #[must_use]
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(LIVE_BUFFER_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(Inner {
                events: Vec::new(),
                streams: HashMap::new(),
                next_position: 1,
            })),
            live,
        }
    }

    fn load(&self, filters: &[EventFilter], after: u64) -> Vec<Event> {
        let inner = self.inner.read().expect("in-memory log lock poisoned");
        inner
            .events
            .iter()
            .filter(|event| event.position > after && matches_any(filters, event))
            .cloned()
            .collect()
    }
}

impl Default for Log {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog for Log {
    /// The in-memory log cannot fail.
    type Error = Infallible;

    #[tracing::instrument(skip(self, filters), fields(filter_count = filters.len()))]
    fn filter<'a>(
        &'a self,
        filters: &'a [EventFilter],
    ) -> impl Future<Output = Result<Vec<Event>, Self::Error>> + Send + 'a {
        let events = self.load(filters, 0);
        tracing::debug!(events_loaded = events.len(), "loaded events from log");
        std::future::ready(Ok(events))
    }

    #[tracing::instrument(skip(self, commits), fields(commit_count = commits.len()))]
    fn push(
        &self,
        commits: NonEmpty<Commit>,
    ) -> impl Future<Output = PushOutcome<Self::Error>> + Send + '_ {
        let result = (|| -> PushOutcome<Infallible> {
            let mut inner = self.inner.write().expect("in-memory log lock poisoned");

            // Check every stream before writing anything.
            let mut heads: HashMap<&AggregateRef, u64> = HashMap::new();
            for commit in commits.iter() {
                let actual = heads.get(&commit.aggregate).copied().unwrap_or_else(|| {
                    inner.streams.get(&commit.aggregate).copied().unwrap_or(0)
                });
                if let ExpectedSequence::Exact(expected) = commit.expected
                    && expected != actual
                {
                    tracing::debug!(
                        aggregate = %commit.aggregate,
                        expected,
                        actual,
                        "version mismatch, rejecting push"
                    );
                    return Err(PushError::Conflict(ConcurrencyConflict {
                        aggregate: commit.aggregate.clone(),
                        expected,
                        actual,
                    }));
                }
                heads.insert(&commit.aggregate, actual + commit.events.len() as u64);
            }

            let created_at = Utc::now();
            let mut appended = Vec::new();
            for commit in commits {
                let mut sequence = inner.streams.get(&commit.aggregate).copied().unwrap_or(0);
                for pending in commit.events {
                    sequence += 1;
                    let position = inner.next_position;
                    inner.next_position += 1;
                    let event = Event {
                        aggregate: commit.aggregate.clone(),
                        resource_owner: commit.resource_owner.clone(),
                        editor_id: commit.editor_id.clone(),
                        event_type: pending.event_type,
                        payload: pending.payload,
                        sequence,
                        position,
                        created_at,
                    };
                    inner.events.push(event.clone());
                    appended.push(event);
                }
                inner.streams.insert(commit.aggregate, sequence);
            }

            // Publish under the lock so live subscribers observe position order.
            for event in &appended {
                let _ = self.live.send(event.clone());
            }
            drop(inner);

            tracing::debug!(events_appended = appended.len(), "events pushed to log");
            Ok(appended)
        })();

        std::future::ready(result)
    }

    fn latest_sequence<'a>(
        &'a self,
        aggregate: &'a AggregateRef,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a {
        let sequence = {
            let inner = self.inner.read().expect("in-memory log lock poisoned");
            inner.streams.get(aggregate).copied().unwrap_or(0)
        };
        tracing::trace!(%aggregate, sequence, "retrieved stream sequence");
        std::future::ready(Ok(sequence))
    }
}

impl SubscribableLog for Log {
    fn subscribe(
        &self,
        filters: Vec<EventFilter>,
        from_position: Option<u64>,
    ) -> EventStream<'_, Self::Error> {
        // Attach to the live channel before reading history so nothing pushed
        // in between is missed; duplicates are dropped by position below.
        let mut receiver = self.live.subscribe();
        let history = self.load(&filters, from_position.unwrap_or(0));

        Box::pin(async_stream::stream! {
            let mut last_position = from_position.unwrap_or(0);

            for event in history {
                last_position = event.position;
                yield Ok::<_, Infallible>(event);
            }

            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if event.position <= last_position {
                            continue;
                        }
                        last_position = event.position;
                        if matches_any(&filters, &event) {
                            yield Ok(event);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "subscriber lagged, reloading from log");
                        for event in self.load(&filters, last_position) {
                            last_position = event.position;
                            yield Ok(event);
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio_stream::StreamExt;

    use super::*;
    use crate::event::PendingEvent;

    fn aggregate(id: &str) -> AggregateRef {
        AggregateRef::new("idp", id, "inst")
    }

    fn commit(id: &str, expected: ExpectedSequence, types: &[&str]) -> Commit {
        let events = types
            .iter()
            .map(|t| PendingEvent {
                event_type: (*t).to_string(),
                payload: serde_json::json!({}),
            })
            .collect();
        Commit {
            aggregate: aggregate(id),
            resource_owner: "inst".into(),
            editor_id: "user".into(),
            expected,
            events: NonEmpty::from_vec(events).unwrap(),
        }
    }

    #[tokio::test]
    async fn new_log_is_empty() {
        let log = Log::new();
        assert!(log.filter(&[EventFilter::default()]).await.unwrap().is_empty());
        assert_eq!(log.latest_sequence(&aggregate("1")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn push_assigns_sequence_and_position() {
        let log = Log::new();
        let pushed = log
            .push(NonEmpty::singleton(commit(
                "1",
                ExpectedSequence::Exact(0),
                &["a", "b"],
            )))
            .await
            .unwrap();

        assert_eq!(
            pushed.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(
            pushed.iter().map(|e| e.position).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(log.latest_sequence(&aggregate("1")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn push_with_stale_version_conflicts() {
        let log = Log::new();
        log.push(NonEmpty::singleton(commit(
            "1",
            ExpectedSequence::Exact(0),
            &["a"],
        )))
        .await
        .unwrap();

        let result = log
            .push(NonEmpty::singleton(commit(
                "1",
                ExpectedSequence::Exact(0),
                &["b"],
            )))
            .await;

        match result {
            Err(PushError::Conflict(conflict)) => {
                assert_eq!(conflict.expected, 0);
                assert_eq!(conflict.actual, 1);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn multi_aggregate_push_is_all_or_nothing() {
        let log = Log::new();
        log.push(NonEmpty::singleton(commit(
            "2",
            ExpectedSequence::Exact(0),
            &["a"],
        )))
        .await
        .unwrap();

        let result = log
            .push(NonEmpty::from((
                commit("1", ExpectedSequence::Exact(0), &["a"]),
                vec![commit("2", ExpectedSequence::Exact(0), &["b"])],
            )))
            .await;

        assert!(matches!(result, Err(PushError::Conflict(_))));
        assert_eq!(log.latest_sequence(&aggregate("1")).await.unwrap(), 0);
        assert_eq!(log.filter(&[EventFilter::default()]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn two_commits_for_one_stream_chain_their_sequences() {
        let log = Log::new();
        let pushed = log
            .push(NonEmpty::from((
                commit("1", ExpectedSequence::Exact(0), &["a"]),
                vec![commit("1", ExpectedSequence::Exact(1), &["b"])],
            )))
            .await
            .unwrap();
        assert_eq!(pushed[1].sequence, 2);
    }

    #[tokio::test]
    async fn unchecked_push_appends_to_existing_stream() {
        let log = Log::new();
        log.push(NonEmpty::singleton(commit(
            "1",
            ExpectedSequence::Exact(0),
            &["a"],
        )))
        .await
        .unwrap();
        let pushed = log
            .push(NonEmpty::singleton(commit("1", ExpectedSequence::Any, &["b"])))
            .await
            .unwrap();
        assert_eq!(pushed[0].sequence, 2);
    }

    #[tokio::test]
    async fn filter_merges_streams_by_position() {
        let log = Log::new();
        for (id, kind) in [("1", "a"), ("2", "b"), ("1", "c")] {
            let head = log.latest_sequence(&aggregate(id)).await.unwrap();
            log.push(NonEmpty::singleton(commit(
                id,
                ExpectedSequence::Exact(head),
                &[kind],
            )))
            .await
            .unwrap();
        }

        let loaded = log
            .filter(&[
                EventFilter::for_aggregate(&aggregate("1")),
                EventFilter::default().event_types(["b"]),
            ])
            .await
            .unwrap();
        assert_eq!(
            loaded.iter().map(|e| e.event_type.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }

    #[tokio::test]
    async fn subscription_replays_history_then_follows_live_pushes() {
        let log = Log::new();
        log.push(NonEmpty::singleton(commit(
            "1",
            ExpectedSequence::Exact(0),
            &["a", "skip", "b"],
        )))
        .await
        .unwrap();

        let mut stream = log.subscribe(
            vec![EventFilter::default().event_types(["a", "b", "c"])],
            Some(1),
        );

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.event_type, "b");

        log.push(NonEmpty::singleton(commit(
            "1",
            ExpectedSequence::Exact(3),
            &["skip", "c"],
        )))
        .await
        .unwrap();

        let live = stream.next().await.unwrap().unwrap();
        assert_eq!(live.event_type, "c");
        assert_eq!(live.position, 5);
    }
}
