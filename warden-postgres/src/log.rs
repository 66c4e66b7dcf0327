mod load;
mod push;
mod subscribe;

use nonempty::NonEmpty;
use sqlx::PgPool;
use warden_core::{
    event::{AggregateRef, Event},
    log::{Commit, EventFilter, EventLog, EventStream, PushOutcome, SubscribableLog},
};

use crate::{Error, error::from_db};

/// A PostgreSQL-backed [`EventLog`].
///
/// - Positions are global and monotonic (`BIGSERIAL`). Pushes serialize on
///   an advisory lock, so positions become visible in order.
/// - Sequences are per stream and tracked in `es_streams`.
/// - Payloads are stored as `jsonb`.
#[derive(Clone)]
pub struct Log {
    pub(crate) pool: PgPool,
}

impl Log {
    const EVENTS_NOTIFY_CHANNEL: &'static str = "warden_es_events";
    /// Key of the transaction-level advisory lock held while pushing.
    const PUSH_LOCK_KEY: i64 = 0x7761_7264_656e;

    /// Construct a `PostgreSQL` event log from a connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the schema (idempotent).
    ///
    /// This uses `CREATE TABLE IF NOT EXISTS` style DDL so it can be run on
    /// startup.
    ///
    /// # Errors
    ///
    /// Returns a `sqlx::Error` if any of the schema creation queries fail.
    #[tracing::instrument(skip(self))]
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        // Streams track the last sequence per aggregate for concurrency checks.
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS es_streams (
                instance_id    TEXT NOT NULL,
                aggregate_type TEXT NOT NULL,
                aggregate_id   TEXT NOT NULL,
                last_sequence  BIGINT NOT NULL,
                PRIMARY KEY (instance_id, aggregate_type, aggregate_id)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS es_events (
                position       BIGSERIAL PRIMARY KEY,
                instance_id    TEXT NOT NULL,
                aggregate_type TEXT NOT NULL,
                aggregate_id   TEXT NOT NULL,
                sequence       BIGINT NOT NULL,
                event_type     TEXT NOT NULL,
                resource_owner TEXT NOT NULL,
                editor_id      TEXT NOT NULL,
                payload        JSONB NOT NULL,
                created_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (instance_id, aggregate_type, aggregate_id, sequence)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"CREATE INDEX IF NOT EXISTS es_events_by_type_and_position ON es_events(event_type, position)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"CREATE INDEX IF NOT EXISTS es_events_by_instance_and_position ON es_events(instance_id, position)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl EventLog for Log {
    type Error = Error;

    #[tracing::instrument(skip(self, filters), fields(filters_len = filters.len()))]
    async fn filter<'a>(&'a self, filters: &'a [EventFilter]) -> Result<Vec<Event>, Self::Error> {
        self.load(filters, None).await
    }

    #[tracing::instrument(skip(self, commits), fields(commits_len = commits.len()))]
    async fn push(&self, commits: NonEmpty<Commit>) -> PushOutcome<Self::Error> {
        self.push_commits(commits).await
    }

    async fn latest_sequence<'a>(&'a self, aggregate: &'a AggregateRef) -> Result<u64, Self::Error> {
        let sequence: Option<i64> = sqlx::query_scalar(
            r"
            SELECT last_sequence
            FROM es_streams
            WHERE instance_id = $1 AND aggregate_type = $2 AND aggregate_id = $3
            ",
        )
        .bind(&aggregate.instance_id)
        .bind(&aggregate.aggregate_type)
        .bind(&aggregate.aggregate_id)
        .fetch_optional(&self.pool)
        .await?;

        let sequence = sequence.map_or(Ok(0), from_db)?;
        tracing::trace!(%aggregate, sequence, "retrieved stream sequence");
        Ok(sequence)
    }
}

impl SubscribableLog for Log {
    fn subscribe(
        &self,
        filters: Vec<EventFilter>,
        from_position: Option<u64>,
    ) -> EventStream<'_, Self::Error> {
        self.subscribe_with_listener(filters, from_position)
    }
}
