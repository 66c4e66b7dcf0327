use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use warden_core::projection::{
    ApplyOutcome, Checkpoint, ColumnType, Condition, Statement, StatementExecutor, TableSpec, Value,
};

use crate::{
    Error,
    error::{from_db, to_db},
};

/// A PostgreSQL-backed [`StatementExecutor`].
///
/// Projection tables are created from their [`TableSpec`]. Checkpoints live
/// in `projection_checkpoints`, one row per projection, and are written in
/// the same transaction as the statement they cover.
#[derive(Clone)]
pub struct Tables {
    pool: PgPool,
}

impl Tables {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn ensure_checkpoint_table(&self) -> Result<(), Error> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS projection_checkpoints (
                projection TEXT PRIMARY KEY,
                position   BIGINT NOT NULL,
                event_date TIMESTAMPTZ NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Take the projection's transaction lock and read its position.
    ///
    /// The lock serializes appliers of the same projection, including the
    /// very first one when no checkpoint row exists yet.
    async fn lock(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        projection: &str,
    ) -> Result<Option<u64>, Error> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(projection)
            .execute(&mut **tx)
            .await?;

        let current: Option<i64> = sqlx::query_scalar(
            "SELECT position FROM projection_checkpoints WHERE projection = $1",
        )
        .bind(projection)
        .fetch_optional(&mut **tx)
        .await?;
        current.map(from_db).transpose()
    }

    async fn run(tx: &mut sqlx::Transaction<'_, Postgres>, statement: Statement) -> Result<(), Error> {
        let mut flat = Vec::new();
        flatten(statement, &mut flat);
        for statement in flat {
            if let Some(mut qb) = build(statement) {
                qb.build().execute(&mut **tx).await?;
            }
        }
        Ok(())
    }
}

const fn sql_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Text => "TEXT",
        ColumnType::Int => "BIGINT",
        ColumnType::Bool => "BOOLEAN",
        ColumnType::Timestamp => "TIMESTAMPTZ",
        ColumnType::TextArray => "TEXT[]",
        ColumnType::Json => "JSONB",
    }
}

fn quoted(names: &[&str]) -> String {
    names
        .iter()
        .map(|name| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn create_table_sql(spec: &TableSpec) -> String {
    let mut sql = format!("CREATE TABLE IF NOT EXISTS \"{}\" (", spec.name);
    for column in spec.columns {
        let null = if column.nullable { "" } else { " NOT NULL" };
        let _ = write!(sql, "\"{}\" {}{null}, ", column.name, sql_type(column.ty));
    }
    let _ = write!(sql, "PRIMARY KEY ({}))", quoted(spec.primary_key));
    sql
}

fn flatten(statement: Statement, out: &mut Vec<Statement>) {
    match statement {
        Statement::NoOp => {}
        Statement::Multi(statements) => {
            for statement in statements {
                flatten(statement, out);
            }
        }
        other => out.push(other),
    }
}

fn push_value(qb: &mut QueryBuilder<'static, Postgres>, value: Value) {
    match value {
        Value::Null => qb.push("NULL"),
        Value::Text(value) => qb.push_bind(value),
        Value::Int(value) => qb.push_bind(value),
        Value::Bool(value) => qb.push_bind(value),
        Value::Timestamp(value) => qb.push_bind(value),
        Value::TextArray(value) => qb.push_bind(value),
        Value::Json(value) => qb.push_bind(sqlx::types::Json(value)),
    };
}

fn push_conditions(qb: &mut QueryBuilder<'static, Postgres>, conditions: Vec<Condition>) {
    for (i, condition) in conditions.into_iter().enumerate() {
        qb.push(if i == 0 { " WHERE " } else { " AND " });
        match condition {
            Condition::Eq(column, Value::Null) => {
                qb.push(format!("\"{column}\" IS NULL"));
            }
            Condition::Eq(column, value) => {
                qb.push(format!("\"{column}\" = "));
                push_value(qb, value);
            }
        }
    }
}

/// SQL for a single statement. `None` when there is nothing to run.
pub(crate) fn build(statement: Statement) -> Option<QueryBuilder<'static, Postgres>> {
    match statement {
        Statement::NoOp | Statement::Multi(_) => None,
        Statement::Upsert { table, key, values } => {
            let columns: Vec<&str> = values.iter().map(|(column, _)| *column).collect();
            let mut qb = QueryBuilder::new(format!(
                "INSERT INTO \"{table}\" ({}) VALUES (",
                quoted(&columns)
            ));
            for (i, (_, value)) in values.into_iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                push_value(&mut qb, value);
            }
            qb.push(format!(") ON CONFLICT ({}) ", quoted(key)));

            let updates: Vec<String> = columns
                .iter()
                .filter(|column| !key.contains(*column))
                .map(|column| format!("\"{column}\" = EXCLUDED.\"{column}\""))
                .collect();
            if updates.is_empty() {
                qb.push("DO NOTHING");
            } else {
                qb.push(format!("DO UPDATE SET {}", updates.join(", ")));
            }
            Some(qb)
        }
        Statement::Update {
            table,
            values,
            conditions,
        } => {
            if values.is_empty() {
                return None;
            }
            let mut qb = QueryBuilder::new(format!("UPDATE \"{table}\" SET "));
            for (i, (column, value)) in values.into_iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                qb.push(format!("\"{column}\" = "));
                push_value(&mut qb, value);
            }
            push_conditions(&mut qb, conditions);
            Some(qb)
        }
        Statement::Delete { table, conditions } => {
            let mut qb = QueryBuilder::new(format!("DELETE FROM \"{table}\""));
            push_conditions(&mut qb, conditions);
            Some(qb)
        }
    }
}

impl StatementExecutor for Tables {
    type Error = Error;

    #[tracing::instrument(skip(self, tables), fields(tables_len = tables.len()))]
    async fn prepare<'a>(&'a self, tables: &'a [TableSpec]) -> Result<(), Self::Error> {
        self.ensure_checkpoint_table().await?;
        for spec in tables {
            sqlx::query(&create_table_sql(spec))
                .execute(&self.pool)
                .await?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS \"{0}_by_instance\" ON \"{0}\" (instance_id)",
                spec.name
            ))
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn checkpoint<'a>(&'a self, projection: &'a str) -> Result<Option<Checkpoint>, Self::Error> {
        let row = sqlx::query(
            "SELECT position, event_date FROM projection_checkpoints WHERE projection = $1",
        )
        .bind(projection)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Checkpoint, Error> {
            let event_date: DateTime<Utc> = row.try_get("event_date")?;
            Ok(Checkpoint {
                position: from_db(row.try_get("position")?)?,
                event_date,
            })
        })
        .transpose()
    }

    #[tracing::instrument(skip(self, statement), fields(position = checkpoint.position))]
    async fn apply<'a>(
        &'a self,
        projection: &'a str,
        statement: Statement,
        checkpoint: Checkpoint,
    ) -> Result<ApplyOutcome, Self::Error> {
        let mut tx = self.pool.begin().await?;
        if Self::lock(&mut tx, projection)
            .await?
            .is_some_and(|current| current >= checkpoint.position)
        {
            return Ok(ApplyOutcome::Skipped);
        }

        Self::run(&mut tx, statement).await?;

        sqlx::query(
            r"
            INSERT INTO projection_checkpoints (projection, position, event_date)
            VALUES ($1, $2, $3)
            ON CONFLICT (projection)
            DO UPDATE SET position = EXCLUDED.position, event_date = EXCLUDED.event_date
            ",
        )
        .bind(projection)
        .bind(to_db(checkpoint.position)?)
        .bind(checkpoint.event_date)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ApplyOutcome::Applied)
    }

    #[tracing::instrument(skip(self, statement), fields(position = expected.position))]
    async fn replay<'a>(
        &'a self,
        projection: &'a str,
        statement: Statement,
        expected: Checkpoint,
    ) -> Result<ApplyOutcome, Self::Error> {
        let mut tx = self.pool.begin().await?;
        if Self::lock(&mut tx, projection).await? != Some(expected.position) {
            return Ok(ApplyOutcome::Skipped);
        }
        Self::run(&mut tx, statement).await?;
        tx.commit().await?;
        Ok(ApplyOutcome::Applied)
    }

    #[tracing::instrument(skip(self, tables))]
    async fn reset<'a>(&'a self, projection: &'a str, tables: &'a [TableSpec]) -> Result<(), Self::Error> {
        self.ensure_checkpoint_table().await?;
        let mut tx = self.pool.begin().await?;
        for spec in tables {
            sqlx::query(&format!("DELETE FROM \"{}\"", spec.name))
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM projection_checkpoints WHERE projection = $1")
            .bind(projection)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
