use std::collections::HashMap;

use chrono::{DateTime, Utc};
use nonempty::NonEmpty;
use sqlx::{Postgres, QueryBuilder, Row};
use warden_core::{
    concurrency::{ConcurrencyConflict, ExpectedSequence},
    event::{AggregateRef, Event},
    log::{Commit, PushError, PushOutcome},
};

use super::Log;
use crate::{
    Error,
    error::{from_db, to_db},
};

fn store_error(error: impl Into<Error>) -> PushError<Error> {
    PushError::Store(error.into())
}

impl Log {
    /// Check every commit against its stream, then append all of them in one
    /// transaction.
    ///
    /// The push holds a transaction-level advisory lock from the first read
    /// to commit, so two pushes never interleave and positions commit in
    /// order.
    pub(in crate::log) async fn push_commits(&self, commits: NonEmpty<Commit>) -> PushOutcome<Error> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(Self::PUSH_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;

        // Check every stream before writing anything.
        let mut heads: HashMap<AggregateRef, u64> = HashMap::new();
        let mut starts = Vec::with_capacity(commits.len());
        for commit in commits.iter() {
            let actual = match heads.get(&commit.aggregate) {
                Some(head) => *head,
                None => Self::stream_head(&mut tx, &commit.aggregate)
                    .await
                    .map_err(PushError::Store)?,
            };
            if let ExpectedSequence::Exact(expected) = commit.expected
                && expected != actual
            {
                tracing::debug!(
                    aggregate = %commit.aggregate,
                    expected,
                    actual,
                    "version mismatch, rejecting push"
                );
                // Dropping the transaction rolls it back.
                return Err(PushError::Conflict(ConcurrencyConflict {
                    aggregate: commit.aggregate.clone(),
                    expected,
                    actual,
                }));
            }
            starts.push(actual);
            heads.insert(commit.aggregate.clone(), actual + commit.events.len() as u64);
        }

        let mut appended = Vec::new();
        for (commit, start) in commits.into_iter().zip(starts) {
            appended.extend(
                Self::append_commit(&mut tx, commit, start)
                    .await
                    .map_err(PushError::Store)?,
            );
        }

        for (aggregate, head) in &heads {
            Self::set_stream_head(&mut tx, aggregate, *head)
                .await
                .map_err(PushError::Store)?;
        }

        let first_position = appended
            .first()
            .map(|event| event.position)
            .ok_or(PushError::Store(Error::MissingReturnedPosition))?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(Self::EVENTS_NOTIFY_CHANNEL)
            .bind(first_position.to_string())
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;

        tx.commit().await.map_err(store_error)?;

        tracing::debug!(events_appended = appended.len(), "events pushed to log");
        Ok(appended)
    }

    /// Last sequence of `aggregate`, `0` for a new stream. Locks the stream
    /// row for the rest of the transaction.
    async fn stream_head(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        aggregate: &AggregateRef,
    ) -> Result<u64, Error> {
        let head: Option<i64> = sqlx::query_scalar(
            r"
                SELECT last_sequence
                FROM es_streams
                WHERE instance_id = $1 AND aggregate_type = $2 AND aggregate_id = $3
                FOR UPDATE
                ",
        )
        .bind(&aggregate.instance_id)
        .bind(&aggregate.aggregate_type)
        .bind(&aggregate.aggregate_id)
        .fetch_optional(&mut **tx)
        .await?;

        head.map_or(Ok(0), from_db)
    }

    async fn set_stream_head(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        aggregate: &AggregateRef,
        head: u64,
    ) -> Result<(), Error> {
        sqlx::query(
            r"
                INSERT INTO es_streams (instance_id, aggregate_type, aggregate_id, last_sequence)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (instance_id, aggregate_type, aggregate_id)
                DO UPDATE SET last_sequence = EXCLUDED.last_sequence
                ",
        )
        .bind(&aggregate.instance_id)
        .bind(&aggregate.aggregate_type)
        .bind(&aggregate.aggregate_id)
        .bind(to_db(head)?)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Bulk-insert the events of one commit with sequences after `start`.
    ///
    /// Returns the stored events with their database-assigned positions and
    /// timestamps.
    async fn append_commit(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        commit: Commit,
        start: u64,
    ) -> Result<Vec<Event>, Error> {
        let mut rows = Vec::with_capacity(commit.events.len());
        for (offset, pending) in commit.events.into_iter().enumerate() {
            rows.push((to_db(start + offset as u64 + 1)?, pending));
        }

        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO es_events (instance_id, aggregate_type, aggregate_id, sequence, \
             event_type, resource_owner, editor_id, payload) ",
        );
        qb.push_values(&rows, |mut b, (sequence, pending)| {
            b.push_bind(commit.aggregate.instance_id.clone());
            b.push_bind(commit.aggregate.aggregate_type.clone());
            b.push_bind(commit.aggregate.aggregate_id.clone());
            b.push_bind(*sequence);
            b.push_bind(pending.event_type.clone());
            b.push_bind(commit.resource_owner.clone());
            b.push_bind(commit.editor_id.clone());
            b.push_bind(sqlx::types::Json(pending.payload.clone()));
        });
        qb.push(" RETURNING position, sequence, created_at");

        let mut returned = Vec::with_capacity(rows.len());
        for row in qb.build().fetch_all(&mut **tx).await? {
            let sequence: i64 = row.try_get("sequence")?;
            let position: i64 = row.try_get("position")?;
            let created_at: DateTime<Utc> = row.try_get("created_at")?;
            returned.push((sequence, position, created_at));
        }
        if returned.len() != rows.len() {
            return Err(Error::MissingReturnedPosition);
        }
        returned.sort_unstable_by_key(|(sequence, _, _)| *sequence);

        let mut events = Vec::with_capacity(rows.len());
        for ((sequence, position, created_at), (_, pending)) in returned.into_iter().zip(rows) {
            events.push(Event {
                aggregate: commit.aggregate.clone(),
                resource_owner: commit.resource_owner.clone(),
                editor_id: commit.editor_id.clone(),
                event_type: pending.event_type,
                payload: pending.payload,
                sequence: from_db(sequence)?,
                position: from_db(position)?,
                created_at,
            });
        }
        Ok(events)
    }
}
