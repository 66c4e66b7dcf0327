//! Read-side materialization.
//!
//! A [`Projection`] turns events into engine-neutral [`Statement`]s through a
//! registry of per-event-type [`Reducers`]. A [`Projector`] feeds events from
//! an [`EventLog`] through those reducers and hands the statements to a
//! [`StatementExecutor`], which applies each one atomically with the
//! projection's [`Checkpoint`].
//!
//! Application is idempotent: an event at or before the checkpoint position
//! is skipped, so replaying after a crash converges on the same rows.

use std::{collections::HashMap, future::Future};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    event::{DomainEvent, Event, EventDecodeError},
    log::{EventFilter, EventLog},
};

pub mod inmemory;

/// Storage type of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Int,
    Bool,
    Timestamp,
    TextArray,
    Json,
}

/// A column declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
}

impl Column {
    #[must_use]
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
        }
    }

    #[must_use]
    pub const fn nullable(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: true,
        }
    }
}

/// A materialized table owned by one projection.
///
/// Every table carries an `instance_id` column so tenant teardown can delete
/// rows without knowing the table's shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub primary_key: &'static [&'static str],
}

/// Column holding the tenant of a row.
pub const INSTANCE_COLUMN: &str = "instance_id";

impl TableSpec {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }
}

/// A typed cell value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Int(i64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    TextArray(Vec<String>),
    Json(serde_json::Value),
}

impl Value {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text_array(&self) -> Option<&[String]> {
        match self {
            Self::TextArray(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Self::TextArray(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Row selector. Conditions in a list are AND-ed.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Eq(&'static str, Value),
}

impl Condition {
    pub fn eq(column: &'static str, value: impl Into<Value>) -> Self {
        Self::Eq(column, value.into())
    }

    #[must_use]
    pub const fn column(&self) -> &'static str {
        match self {
            Self::Eq(column, _) => *column,
        }
    }
}

/// Column assignments of an insert or update.
pub type Assignments = Vec<(&'static str, Value)>;

/// Engine-neutral write produced by a reducer.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    /// Nothing to write; the checkpoint still advances.
    NoOp,
    /// Insert a row, or overwrite the given columns of the row with the same
    /// primary key.
    Upsert {
        table: &'static str,
        key: &'static [&'static str],
        values: Assignments,
    },
    /// Set columns on every row matching all conditions.
    Update {
        table: &'static str,
        values: Assignments,
        conditions: Vec<Condition>,
    },
    /// Delete every row matching all conditions.
    Delete {
        table: &'static str,
        conditions: Vec<Condition>,
    },
    /// Several statements applied in order, all or nothing.
    Multi(Vec<Statement>),
}

impl Statement {
    #[must_use]
    pub const fn upsert(table: &TableSpec, values: Assignments) -> Self {
        Self::Upsert {
            table: table.name,
            key: table.primary_key,
            values,
        }
    }

    #[must_use]
    pub const fn update(table: &TableSpec, values: Assignments, conditions: Vec<Condition>) -> Self {
        Self::Update {
            table: table.name,
            values,
            conditions,
        }
    }

    #[must_use]
    pub const fn delete(table: &TableSpec, conditions: Vec<Condition>) -> Self {
        Self::Delete {
            table: table.name,
            conditions,
        }
    }

    /// Combine statements, dropping no-ops and flattening nested lists.
    #[must_use]
    pub fn multi(statements: impl IntoIterator<Item = Self>) -> Self {
        let mut flat = Vec::new();
        for statement in statements {
            match statement {
                Self::NoOp => {}
                Self::Multi(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Self::NoOp,
            1 => flat.remove(0),
            _ => Self::Multi(flat),
        }
    }

    /// Delete every row of `instance_id` from all `tables`.
    #[must_use]
    pub fn delete_instance(tables: &[TableSpec], instance_id: &str) -> Self {
        Self::multi(
            tables
                .iter()
                .map(|table| Self::delete(table, vec![Condition::eq(INSTANCE_COLUMN, instance_id)])),
        )
    }

    #[must_use]
    pub const fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp)
    }
}

/// Last event a projection applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub position: u64,
    pub event_date: DateTime<Utc>,
}

impl Checkpoint {
    #[must_use]
    pub fn of(event: &Event) -> Self {
        Self {
            position: event.position,
            event_date: event.created_at,
        }
    }
}

/// Result of applying one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The statement ran and the checkpoint advanced.
    Applied,
    /// The event was at or before the checkpoint and nothing was written.
    Skipped,
}

/// Failure turning an event into a statement.
#[derive(Debug, Error)]
pub enum ReduceError {
    #[error(transparent)]
    Decode(#[from] EventDecodeError),
    #[error("failed to encode column value: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("value {value} of column `{column}` exceeds the integer range")]
    OutOfRange { column: &'static str, value: u64 },
}

impl Value {
    /// Integer cell for an unsigned counter such as a sequence.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError::OutOfRange`] when `value` exceeds `i64::MAX`.
    pub fn counter(column: &'static str, value: u64) -> Result<Self, ReduceError> {
        i64::try_from(value)
            .map(Self::Int)
            .map_err(|_| ReduceError::OutOfRange { column, value })
    }
}

type Reducer = Box<dyn Fn(&Event) -> Result<Statement, ReduceError> + Send + Sync>;

/// Event-type to reducer registry of one projection.
#[derive(Default)]
pub struct Reducers {
    handlers: HashMap<&'static str, Reducer>,
}

impl Reducers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reducer for `E`. The stored event is passed along for its
    /// metadata (aggregate, sequence, timestamp).
    #[must_use]
    pub fn on<E, F>(mut self, reduce: F) -> Self
    where
        E: DomainEvent + 'static,
        F: Fn(&Event, E) -> Result<Statement, ReduceError> + Send + Sync + 'static,
    {
        self.handlers.insert(
            E::KIND,
            Box::new(move |event: &Event| -> Result<Statement, ReduceError> {
                let typed = event.decode::<E>()?;
                reduce(event, typed)
            }),
        );
        self
    }

    /// Delete every row of the removed instance from `tables`.
    #[must_use]
    pub fn on_instance_removed<E>(mut self, tables: &'static [TableSpec]) -> Self
    where
        E: DomainEvent + 'static,
    {
        self.handlers.insert(
            E::KIND,
            Box::new(move |event: &Event| -> Result<Statement, ReduceError> {
                Ok(Statement::delete_instance(
                    tables,
                    &event.aggregate.instance_id,
                ))
            }),
        );
        self
    }

    /// Statement for `event`. Unregistered event types reduce to
    /// [`Statement::NoOp`].
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError`] if the payload is malformed or a column value
    /// cannot be encoded.
    pub fn reduce(&self, event: &Event) -> Result<Statement, ReduceError> {
        match self.handlers.get(event.event_type.as_str()) {
            Some(reduce) => reduce(event),
            None => {
                tracing::trace!(event_type = %event.event_type, "no reducer registered");
                Ok(Statement::NoOp)
            }
        }
    }

    /// Registered event types, sorted.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

/// A queryable view maintained from the log.
// ANCHOR: projection_trait
pub trait Projection: Send + Sync {
    /// Stable name, used as the checkpoint key.
    const NAME: &'static str;

    /// Tables owned by this projection. The first one is the main table.
    fn tables(&self) -> &'static [TableSpec];

    fn reducers(&self) -> Reducers;

    /// Events this projection subscribes to, by default every event type with
    /// a registered reducer.
    fn filters(&self, reducers: &Reducers) -> Vec<EventFilter> {
        vec![EventFilter::default().event_types(reducers.event_types())]
    }
}
// ANCHOR_END: projection_trait

/// Storage backend for projection tables and checkpoints.
pub trait StatementExecutor: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create `tables` if missing.
    fn prepare<'a>(
        &'a self,
        tables: &'a [TableSpec],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

    /// Last applied event of `projection`, `None` before the first one.
    fn checkpoint<'a>(
        &'a self,
        projection: &'a str,
    ) -> impl Future<Output = Result<Option<Checkpoint>, Self::Error>> + Send + 'a;

    /// Run `statement` and advance the checkpoint in one transaction.
    ///
    /// Returns [`ApplyOutcome::Skipped`] without writing when `checkpoint` is
    /// not past the stored one.
    fn apply<'a>(
        &'a self,
        projection: &'a str,
        statement: Statement,
        checkpoint: Checkpoint,
    ) -> impl Future<Output = Result<ApplyOutcome, Self::Error>> + Send + 'a;

    /// Run `statement` in one transaction, serialized with [`apply`], if the
    /// checkpoint of `projection` is still `expected`. The checkpoint does not
    /// move.
    ///
    /// Returns [`ApplyOutcome::Skipped`] without writing when the checkpoint
    /// has moved since `expected` was read.
    ///
    /// [`apply`]: Self::apply
    fn replay<'a>(
        &'a self,
        projection: &'a str,
        statement: Statement,
        expected: Checkpoint,
    ) -> impl Future<Output = Result<ApplyOutcome, Self::Error>> + Send + 'a;

    /// Empty `tables` and forget the checkpoint of `projection`.
    fn reset<'a>(
        &'a self,
        projection: &'a str,
        tables: &'a [TableSpec],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}

/// Errors from running a projection.
#[derive(Debug, Error)]
pub enum ProjectionError<LogError, ExecutorError>
where
    LogError: std::error::Error + 'static,
    ExecutorError: std::error::Error + 'static,
{
    #[error("failed to read events: {0}")]
    Log(#[source] LogError),
    #[error("failed to reduce event at position {position}: {source}")]
    Reduce {
        position: u64,
        #[source]
        source: ReduceError,
    },
    #[error("failed to apply statement: {0}")]
    Executor(#[source] ExecutorError),
    #[error("checkpoint kept moving, gave up after {attempts} attempts")]
    Contended { attempts: usize },
}

/// How often [`Projector::rebuild_instance`] retries against a moving
/// checkpoint.
pub const REBUILD_ATTEMPTS: usize = 5;

/// Drives one projection from a log into an executor.
pub struct Projector<P, L, X> {
    projection: P,
    reducers: Reducers,
    filters: Vec<EventFilter>,
    log: L,
    executor: X,
}

type ProjectorResult<T, L, X> =
    Result<T, ProjectionError<<L as EventLog>::Error, <X as StatementExecutor>::Error>>;

impl<P, L, X> Projector<P, L, X>
where
    P: Projection,
    L: EventLog,
    X: StatementExecutor,
{
    pub fn new(projection: P, log: L, executor: X) -> Self {
        let reducers = projection.reducers();
        let filters = projection.filters(&reducers);
        Self {
            projection,
            reducers,
            filters,
            log,
            executor,
        }
    }

    #[must_use]
    pub const fn projection(&self) -> &P {
        &self.projection
    }

    #[must_use]
    pub const fn log(&self) -> &L {
        &self.log
    }

    #[must_use]
    pub const fn executor(&self) -> &X {
        &self.executor
    }

    #[must_use]
    pub fn filters(&self) -> &[EventFilter] {
        &self.filters
    }

    /// Create the projection's tables.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Executor`] if the tables cannot be created.
    pub async fn setup(&self) -> ProjectorResult<(), L, X> {
        self.executor
            .prepare(self.projection.tables())
            .await
            .map_err(ProjectionError::Executor)
    }

    /// Current checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Executor`] if the checkpoint cannot be read.
    pub async fn checkpoint(&self) -> ProjectorResult<Option<Checkpoint>, L, X> {
        self.executor
            .checkpoint(P::NAME)
            .await
            .map_err(ProjectionError::Executor)
    }

    /// Reduce and apply a single event.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Reduce`] or [`ProjectionError::Executor`].
    /// The checkpoint is unchanged on error, so the event is retried.
    #[tracing::instrument(
        skip(self, event),
        fields(
            projection = P::NAME,
            event_type = %event.event_type,
            position = event.position
        )
    )]
    pub async fn handle(&self, event: &Event) -> ProjectorResult<ApplyOutcome, L, X> {
        let statement = self
            .reducers
            .reduce(event)
            .map_err(|source| ProjectionError::Reduce {
                position: event.position,
                source,
            })?;
        let outcome = self
            .executor
            .apply(P::NAME, statement, Checkpoint::of(event))
            .await
            .map_err(ProjectionError::Executor)?;
        match outcome {
            ApplyOutcome::Applied => tracing::trace!("event applied"),
            ApplyOutcome::Skipped => tracing::debug!("event already applied, skipping"),
        }
        Ok(outcome)
    }

    /// Apply every event after the checkpoint. Returns how many were applied.
    ///
    /// # Errors
    ///
    /// Stops at the first failing event; earlier events stay applied.
    #[tracing::instrument(skip(self), fields(projection = P::NAME))]
    pub async fn catch_up(&self) -> ProjectorResult<usize, L, X> {
        let after = self.checkpoint().await?.map_or(0, |checkpoint| checkpoint.position);
        let filters: Vec<_> = self.filters.iter().cloned().map(|f| f.after(after)).collect();
        let events = self.log.filter(&filters).await.map_err(ProjectionError::Log)?;

        let mut applied = 0;
        for event in &events {
            if self.handle(event).await? == ApplyOutcome::Applied {
                applied += 1;
            }
        }
        tracing::debug!(after, applied, "projection caught up");
        Ok(applied)
    }

    /// Drop every row and the checkpoint, then replay the whole log.
    ///
    /// # Errors
    ///
    /// See [`catch_up`](Self::catch_up).
    #[tracing::instrument(skip(self), fields(projection = P::NAME))]
    pub async fn rebuild(&self) -> ProjectorResult<usize, L, X> {
        self.executor
            .reset(P::NAME, self.projection.tables())
            .await
            .map_err(ProjectionError::Executor)?;
        tracing::debug!("projection reset");
        self.catch_up().await
    }

    /// Rebuild the rows of one instance up to the current checkpoint.
    ///
    /// The delete and the replayed events run as one statement, so a failure
    /// leaves the old rows in place. Other instances and the checkpoint are
    /// left untouched. When events are applied concurrently the replay is
    /// rebuilt against the new checkpoint, at most [`REBUILD_ATTEMPTS`] times.
    /// Returns how many events were replayed.
    ///
    /// # Errors
    ///
    /// Returns the first log, reduce or executor failure, or
    /// [`ProjectionError::Contended`] when the checkpoint kept moving.
    #[tracing::instrument(skip(self), fields(projection = P::NAME))]
    pub async fn rebuild_instance(&self, instance_id: &str) -> ProjectorResult<usize, L, X> {
        let filters: Vec<_> = self
            .filters
            .iter()
            .cloned()
            .map(|f| f.instance(instance_id))
            .collect();

        for attempt in 1..=REBUILD_ATTEMPTS {
            let Some(checkpoint) = self.checkpoint().await? else {
                tracing::debug!("nothing applied yet, skipping instance rebuild");
                return Ok(0);
            };
            let events = self.log.filter(&filters).await.map_err(ProjectionError::Log)?;

            let mut statements = vec![Statement::delete_instance(
                self.projection.tables(),
                instance_id,
            )];
            for event in events.iter().filter(|e| e.position <= checkpoint.position) {
                statements.push(self.reducers.reduce(event).map_err(|source| {
                    ProjectionError::Reduce {
                        position: event.position,
                        source,
                    }
                })?);
            }
            let replayed = statements.len() - 1;

            let outcome = self
                .executor
                .replay(P::NAME, Statement::multi(statements), checkpoint)
                .await
                .map_err(ProjectionError::Executor)?;
            if outcome == ApplyOutcome::Applied {
                tracing::debug!(replayed, "instance rebuilt");
                return Ok(replayed);
            }
            tracing::debug!(attempt, "checkpoint moved during instance rebuild, retrying");
        }
        Err(ProjectionError::Contended {
            attempts: REBUILD_ATTEMPTS,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::event::AggregateRef;

    #[derive(Serialize, Deserialize)]
    struct Renamed {
        name: String,
    }

    impl DomainEvent for Renamed {
        const KIND: &'static str = "thing.renamed";
    }

    const THINGS: TableSpec = TableSpec {
        name: "things",
        columns: &[
            Column::new("id", ColumnType::Text),
            Column::new("instance_id", ColumnType::Text),
            Column::new("name", ColumnType::Text),
        ],
        primary_key: &["id", "instance_id"],
    };

    fn event(event_type: &str, payload: serde_json::Value) -> Event {
        Event {
            aggregate: AggregateRef::new("thing", "1", "inst"),
            resource_owner: "inst".into(),
            editor_id: "user".into(),
            event_type: event_type.into(),
            payload,
            sequence: 1,
            position: 3,
            created_at: Utc::now(),
        }
    }

    fn reducers() -> Reducers {
        Reducers::new().on::<Renamed, _>(|event, renamed| {
            Ok(Statement::upsert(
                &THINGS,
                vec![
                    ("id", event.aggregate.aggregate_id.as_str().into()),
                    ("instance_id", event.aggregate.instance_id.as_str().into()),
                    ("name", renamed.name.into()),
                ],
            ))
        })
    }

    #[test]
    fn registered_event_reduces_to_statement() {
        let statement = reducers()
            .reduce(&event("thing.renamed", serde_json::json!({ "name": "a" })))
            .unwrap();
        assert!(matches!(
            statement,
            Statement::Upsert {
                table: "things",
                ..
            }
        ));
    }

    #[test]
    fn unknown_event_reduces_to_noop() {
        let statement = reducers()
            .reduce(&event("thing.painted", serde_json::json!({})))
            .unwrap();
        assert!(statement.is_noop());
    }

    #[test]
    fn malformed_payload_is_a_reduce_error() {
        let err = reducers()
            .reduce(&event("thing.renamed", serde_json::json!({ "name": 1 })))
            .unwrap_err();
        assert!(matches!(err, ReduceError::Decode(_)));
    }

    #[test]
    fn multi_flattens_and_drops_noops() {
        let delete = Statement::delete(&THINGS, vec![Condition::eq("id", "1")]);
        assert_eq!(
            Statement::multi([Statement::NoOp, delete.clone()]),
            delete.clone()
        );
        assert!(Statement::multi([Statement::NoOp]).is_noop());
        assert_eq!(
            Statement::multi([Statement::Multi(vec![delete.clone(), delete.clone()]), delete.clone()]),
            Statement::Multi(vec![delete.clone(), delete.clone(), delete])
        );
    }

    #[test]
    fn instance_delete_covers_every_table() {
        const OTHER: TableSpec = TableSpec {
            name: "others",
            columns: &[Column::new("instance_id", ColumnType::Text)],
            primary_key: &["instance_id"],
        };
        let statement = Statement::delete_instance(&[THINGS, OTHER], "inst");
        let Statement::Multi(statements) = statement else {
            panic!("expected multi statement");
        };
        assert_eq!(statements.len(), 2);
        assert!(statements.iter().all(|s| matches!(
            s,
            Statement::Delete { conditions, .. }
                if conditions == &vec![Condition::eq("instance_id", "inst")]
        )));
    }

    #[test]
    fn option_values_map_to_null() {
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some(5_i64)), Value::Int(5));
    }

    #[test]
    fn counters_beyond_i64_are_rejected() {
        assert_eq!(Value::counter("sequence", 7).unwrap(), Value::Int(7));
        assert!(matches!(
            Value::counter("sequence", u64::MAX),
            Err(ReduceError::OutOfRange { column: "sequence", .. })
        ));
    }

    #[test]
    fn default_filters_list_registered_types() {
        struct Things;
        impl Projection for Things {
            const NAME: &'static str = "things";
            fn tables(&self) -> &'static [TableSpec] {
                &[THINGS]
            }
            fn reducers(&self) -> Reducers {
                reducers()
            }
        }
        let filters = Things.filters(&Things.reducers());
        assert_eq!(filters[0].event_types, vec!["thing.renamed".to_string()]);
    }
}
