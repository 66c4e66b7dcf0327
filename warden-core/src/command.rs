//! Command execution.
//!
//! Every command runs the same state machine:
//!
//! 1. **Validate** the intent structurally, before touching the log.
//! 2. **Load** the prior state by replaying the aggregate's stream.
//! 3. **Check** invariants: mutations require a live aggregate.
//! 4. **Build** candidate events. An empty list is a successful no-op.
//! 5. **Push** them with the replayed sequence as the expected version.
//!
//! The pipeline never retries on its own. A [`CommandError::Conflict`] is
//! returned to the caller, who may reload and retry (see
//! [`retry_on_conflict`]).

use std::future::Future;

use chrono::{DateTime, Utc};
use nonempty::NonEmpty;
use thiserror::Error;

use crate::{
    concurrency::{ConcurrencyConflict, ExpectedSequence},
    event::{AggregateRef, Event, EventDecodeError, PendingEvent},
    log::{Commit, EventLog, PushError},
    write_model::{Replay, WriteModel},
};

/// Who is issuing a command, and on behalf of which tenant and owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandContext {
    pub instance_id: String,
    /// Owner of created aggregates. Equal to `instance_id` for
    /// instance-level resources, otherwise an organisation id.
    pub resource_owner: String,
    pub editor_id: String,
}

impl CommandContext {
    /// Context for resources owned by the instance itself.
    #[must_use]
    pub fn instance(instance_id: impl Into<String>, editor_id: impl Into<String>) -> Self {
        let instance_id = instance_id.into();
        Self {
            resource_owner: instance_id.clone(),
            instance_id,
            editor_id: editor_id.into(),
        }
    }

    /// Context for resources owned by an organisation of the instance.
    #[must_use]
    pub fn organization(
        instance_id: impl Into<String>,
        org_id: impl Into<String>,
        editor_id: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            resource_owner: org_id.into(),
            editor_id: editor_id.into(),
        }
    }
}

/// Outcome of a command, for optimistic UIs.
///
/// The default value is returned for no-op commands: nothing was written.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectDetails {
    pub sequence: u64,
    pub event_date: Option<DateTime<Utc>>,
    pub resource_owner: String,
}

impl ObjectDetails {
    /// Details of the last event of a push.
    #[must_use]
    pub fn from_pushed(events: &[Event]) -> Self {
        events.last().map_or_else(Self::default, |last| Self {
            sequence: last.sequence,
            event_date: Some(last.created_at),
            resource_owner: last.resource_owner.clone(),
        })
    }

    /// Whether the command changed nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.sequence == 0 && self.event_date.is_none()
    }
}

/// Typed command failure.
#[derive(Debug, Error)]
pub enum CommandError {
    /// A required field is missing or blank. Detected before any log access.
    #[error("invalid argument: `{field}` is required")]
    InvalidArgument { field: &'static str },
    /// The target of an update or delete has no live state.
    #[error("{aggregate_type} `{id}` not found")]
    NotFound {
        aggregate_type: &'static str,
        id: String,
    },
    /// The aggregate changed since it was loaded; reload and retry.
    #[error(transparent)]
    Conflict(#[from] ConcurrencyConflict),
    /// Encryption, decoding or storage failure.
    #[error("internal error: {0}")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl CommandError {
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(Box::new(err))
    }

    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub const fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }
}

impl From<EventDecodeError> for CommandError {
    fn from(err: EventDecodeError) -> Self {
        Self::internal(err)
    }
}

impl<E> From<PushError<E>> for CommandError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: PushError<E>) -> Self {
        match err {
            PushError::Conflict(conflict) => Self::Conflict(conflict),
            PushError::Store(err) => Self::internal(err),
        }
    }
}

/// Trim `value` in place and fail if nothing is left.
///
/// # Errors
///
/// Returns [`CommandError::InvalidArgument`] naming `field` when the trimmed
/// value is empty.
pub fn require(field: &'static str, value: &mut String) -> Result<(), CommandError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CommandError::InvalidArgument { field });
    }
    if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
    Ok(())
}

/// Whether an intent creates its aggregate or mutates an existing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntentMode {
    /// Prior existence is irrelevant.
    Create,
    /// Fails with [`CommandError::NotFound`] unless the aggregate exists.
    Mutate,
}

/// A single command against one aggregate.
pub trait Intent: Send {
    type Model: WriteModel;

    const MODE: IntentMode;

    /// Id of the target aggregate.
    fn aggregate_id(&self) -> &str;

    /// Structural checks. Runs before the log is read.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidArgument`] for blank required fields.
    fn validate(&mut self) -> Result<(), CommandError>;

    /// Events to push given the replayed state. An empty list is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Internal`] when a collaborator such as the
    /// encryption fails.
    fn build(self, state: &Replay<Self::Model>) -> Result<Vec<PendingEvent>, CommandError>;
}

/// Check invariants against replayed state, then build the intent's events.
///
/// This is the pure part of the pipeline: `intent` must already be
/// validated.
///
/// # Errors
///
/// Returns [`CommandError::NotFound`] when a mutation targets an aggregate
/// that does not exist or belongs to another owner, or whatever
/// [`Intent::build`] returns.
pub fn decide<I: Intent>(
    ctx: &CommandContext,
    intent: I,
    state: &Replay<I::Model>,
) -> Result<Vec<PendingEvent>, CommandError> {
    if I::MODE == IntentMode::Mutate
        && (!state.exists() || state.root().resource_owner != ctx.resource_owner)
    {
        tracing::debug!("target does not exist, rejecting command");
        return Err(CommandError::NotFound {
            aggregate_type: <I::Model as WriteModel>::AGGREGATE_TYPE,
            id: state.root().aggregate.aggregate_id.clone(),
        });
    }
    intent.build(state)
}

/// Runs intents against an event log.
#[derive(Clone)]
pub struct Pipeline<L> {
    log: L,
}

impl<L> Pipeline<L> {
    #[must_use]
    pub const fn new(log: L) -> Self {
        Self { log }
    }

    #[must_use]
    pub const fn log(&self) -> &L {
        &self.log
    }
}

impl<L: EventLog> Pipeline<L> {
    /// Replay the stream of `aggregate` into a write model.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Internal`] if the log fails or an event cannot
    /// be decoded.
    pub async fn load<M: WriteModel>(&self, aggregate: AggregateRef) -> Result<Replay<M>, CommandError> {
        let mut replay = Replay::<M>::new(aggregate);
        let events = self
            .log
            .filter(&replay.query())
            .await
            .map_err(CommandError::internal)?;
        replay.append_events(events);
        replay.reduce()?;
        tracing::trace!(
            sequence = replay.root().sequence,
            exists = replay.exists(),
            "write model reduced"
        );
        Ok(replay)
    }

    /// Run every step up to, but excluding, the push.
    ///
    /// Returns `None` when the intent produces no events.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidArgument`] or [`CommandError::NotFound`]
    /// when the intent is rejected, or [`CommandError::Internal`] when loading
    /// or building fails.
    #[tracing::instrument(
        skip(self, ctx, intent),
        fields(
            instance_id = %ctx.instance_id,
            aggregate_type = <I::Model as WriteModel>::AGGREGATE_TYPE,
            aggregate_id = intent.aggregate_id()
        )
    )]
    pub async fn prepare<I: Intent>(
        &self,
        ctx: &CommandContext,
        mut intent: I,
    ) -> Result<Option<Commit>, CommandError> {
        intent.validate()?;

        let aggregate = AggregateRef::new(
            <I::Model as WriteModel>::AGGREGATE_TYPE,
            intent.aggregate_id(),
            ctx.instance_id.as_str(),
        );
        let state = self.load::<I::Model>(aggregate.clone()).await?;

        let expected = ExpectedSequence::Exact(state.root().sequence);
        let resource_owner = if state.root().resource_owner.is_empty() {
            ctx.resource_owner.clone()
        } else {
            state.root().resource_owner.clone()
        };

        let Some(events) = NonEmpty::from_vec(decide(ctx, intent, &state)?) else {
            tracing::debug!("no changes detected");
            return Ok(None);
        };

        Ok(Some(Commit {
            aggregate,
            resource_owner,
            editor_id: ctx.editor_id.clone(),
            expected,
            events,
        }))
    }

    /// Push prepared commits atomically.
    ///
    /// Several intents against different aggregates can be prepared first and
    /// pushed together; either all of them land or none does.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Conflict`] if any target stream moved since it
    /// was loaded, or [`CommandError::Internal`] if the log fails.
    pub async fn push(&self, commits: Vec<Commit>) -> Result<Vec<Event>, CommandError> {
        let Some(commits) = NonEmpty::from_vec(commits) else {
            return Ok(Vec::new());
        };
        let pushed = self.log.push(commits).await?;
        tracing::debug!(events = pushed.len(), "command events pushed");
        Ok(pushed)
    }

    /// Validate, load, check, build and push a single intent.
    ///
    /// # Errors
    ///
    /// See [`prepare`](Self::prepare) and [`push`](Self::push).
    pub async fn execute<I: Intent>(
        &self,
        ctx: &CommandContext,
        intent: I,
    ) -> Result<ObjectDetails, CommandError> {
        let Some(commit) = self.prepare(ctx, intent).await? else {
            return Ok(ObjectDetails::default());
        };
        let pushed = self.push(vec![commit]).await?;
        Ok(ObjectDetails::from_pushed(&pushed))
    }
}

/// Re-run `op` while it fails with [`CommandError::Conflict`].
///
/// `op` must rebuild its command from scratch on every call so each attempt
/// replays fresh state. Other errors are returned immediately; after
/// `attempts` conflicts the last one is returned.
///
/// # Errors
///
/// Returns the error of the final attempt.
pub async fn retry_on_conflict<T, F, Fut>(attempts: usize, mut op: F) -> Result<T, CommandError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CommandError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(CommandError::Conflict(conflict)) if attempt < attempts => {
                tracing::debug!(attempt, %conflict, "retrying command after conflict");
                attempt += 1;
            }
            result => return result,
        }
    }
}
