//! In-memory projection tables.
//!
//! [`Tables`] implements [`StatementExecutor`] over plain vectors of rows. A
//! statement runs against copies of the tables it touches which replace the
//! originals only when every part succeeded, so [`Statement::Multi`] and the
//! checkpoint move together.

use std::{
    collections::{BTreeMap, HashMap, hash_map::Entry},
    sync::{Arc, RwLock},
};

use thiserror::Error;

use super::{
    ApplyOutcome, Checkpoint, Condition, Statement, StatementExecutor, TableSpec, Value,
};

/// Errors from the in-memory executor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TablesError {
    #[error("table `{0}` does not exist")]
    UnknownTable(String),
    #[error("table `{table}` has no column `{column}`")]
    UnknownColumn { table: String, column: String },
}

/// A materialized row, keyed by column name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row(BTreeMap<&'static str, Value>);

impl Row {
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    #[must_use]
    pub fn text(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_text)
    }

    #[must_use]
    pub fn bool(&self, column: &str) -> Option<bool> {
        self.get(column).and_then(Value::as_bool)
    }

    #[must_use]
    pub fn int(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(Value::as_int)
    }

    fn matches(&self, conditions: &[Condition]) -> bool {
        conditions.iter().all(|condition| match condition {
            Condition::Eq(column, value) => self.get(column) == Some(value),
        })
    }

    fn key_matches(&self, key: &[&str], values: &[(&'static str, Value)]) -> bool {
        key.iter().all(|column| {
            let wanted = values.iter().find(|(name, _)| name == column).map(|(_, v)| v);
            self.get(column) == wanted
        })
    }
}

#[derive(Clone)]
struct Table {
    spec: TableSpec,
    rows: Vec<Row>,
}

#[derive(Default)]
struct State {
    tables: HashMap<&'static str, Table>,
    checkpoints: HashMap<String, Checkpoint>,
}

impl State {
    /// Run `statement` against copies of the tables it touches and swap them
    /// in only if every part succeeded.
    fn run(&mut self, statement: Statement) -> Result<(), TablesError> {
        let mut staged = Staged {
            base: &self.tables,
            touched: HashMap::new(),
        };
        staged.run(statement)?;
        let touched = staged.touched;
        self.tables.extend(touched);
        Ok(())
    }
}

/// Tables changed by a statement in flight.
struct Staged<'s> {
    base: &'s HashMap<&'static str, Table>,
    touched: HashMap<&'static str, Table>,
}

impl Staged<'_> {
    fn table_mut(&mut self, name: &'static str) -> Result<&mut Table, TablesError> {
        match self.touched.entry(name) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let table = self
                    .base
                    .get(name)
                    .ok_or_else(|| TablesError::UnknownTable(name.to_string()))?;
                Ok(entry.insert(table.clone()))
            }
        }
    }

    fn run(&mut self, statement: Statement) -> Result<(), TablesError> {
        match statement {
            Statement::NoOp => Ok(()),
            Statement::Upsert { table, key, values } => {
                let table = self.table_mut(table)?;
                check_columns(&table.spec, values.iter().map(|(c, _)| *c))?;
                if let Some(row) = table.rows.iter_mut().find(|r| r.key_matches(key, &values)) {
                    row.0.extend(values);
                } else {
                    let mut row = Row(
                        table
                            .spec
                            .columns
                            .iter()
                            .map(|column| (column.name, Value::Null))
                            .collect(),
                    );
                    row.0.extend(values);
                    table.rows.push(row);
                }
                Ok(())
            }
            Statement::Update {
                table,
                values,
                conditions,
            } => {
                let table = self.table_mut(table)?;
                check_columns(
                    &table.spec,
                    values
                        .iter()
                        .map(|(c, _)| *c)
                        .chain(conditions.iter().map(Condition::column)),
                )?;
                for row in table.rows.iter_mut().filter(|r| r.matches(&conditions)) {
                    row.0.extend(values.iter().cloned());
                }
                Ok(())
            }
            Statement::Delete { table, conditions } => {
                let table = self.table_mut(table)?;
                check_columns(&table.spec, conditions.iter().map(Condition::column))?;
                table.rows.retain(|row| !row.matches(&conditions));
                Ok(())
            }
            Statement::Multi(statements) => statements.into_iter().try_for_each(|s| self.run(s)),
        }
    }
}

fn check_columns<'a>(
    spec: &TableSpec,
    mut columns: impl Iterator<Item = &'a str>,
) -> Result<(), TablesError> {
    match columns.find(|column| spec.column(column).is_none()) {
        Some(column) => Err(TablesError::UnknownColumn {
            table: spec.name.to_string(),
            column: column.to_string(),
        }),
        None => Ok(()),
    }
}

/// In-memory [`StatementExecutor`]. Clones share the same tables.
#[derive(Clone, Default)]
pub struct Tables {
    inner: Arc<RwLock<State>>,
}

impl Tables {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of `table` matching every condition, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`TablesError::UnknownTable`] if the table was never prepared.
    pub fn select(&self, table: &str, conditions: &[Condition]) -> Result<Vec<Row>, TablesError> {
        let state = self.inner.read().expect("in-memory tables lock poisoned");
        let table = state
            .tables
            .get(table)
            .ok_or_else(|| TablesError::UnknownTable(table.to_string()))?;
        Ok(table
            .rows
            .iter()
            .filter(|row| row.matches(conditions))
            .cloned()
            .collect())
    }

    #[cfg(test)]
    fn run(&self, statement: Statement) -> Result<(), TablesError> {
        self.inner
            .write()
            .expect("in-memory tables lock poisoned")
            .run(statement)
    }
}

impl StatementExecutor for Tables {
    type Error = TablesError;

    fn prepare<'a>(
        &'a self,
        tables: &'a [TableSpec],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a {
        let mut state = self.inner.write().expect("in-memory tables lock poisoned");
        for spec in tables {
            state.tables.entry(spec.name).or_insert_with(|| Table {
                spec: *spec,
                rows: Vec::new(),
            });
        }
        drop(state);
        std::future::ready(Ok(()))
    }

    fn checkpoint<'a>(
        &'a self,
        projection: &'a str,
    ) -> impl Future<Output = Result<Option<Checkpoint>, Self::Error>> + Send + 'a {
        let state = self.inner.read().expect("in-memory tables lock poisoned");
        std::future::ready(Ok(state.checkpoints.get(projection).copied()))
    }

    fn apply<'a>(
        &'a self,
        projection: &'a str,
        statement: Statement,
        checkpoint: Checkpoint,
    ) -> impl Future<Output = Result<ApplyOutcome, Self::Error>> + Send + 'a {
        let result = (|| -> Result<ApplyOutcome, TablesError> {
            let mut state = self.inner.write().expect("in-memory tables lock poisoned");
            if state
                .checkpoints
                .get(projection)
                .is_some_and(|current| current.position >= checkpoint.position)
            {
                return Ok(ApplyOutcome::Skipped);
            }
            state.run(statement)?;
            state.checkpoints.insert(projection.to_string(), checkpoint);
            Ok(ApplyOutcome::Applied)
        })();
        std::future::ready(result)
    }

    fn replay<'a>(
        &'a self,
        projection: &'a str,
        statement: Statement,
        expected: Checkpoint,
    ) -> impl Future<Output = Result<ApplyOutcome, Self::Error>> + Send + 'a {
        let result = (|| -> Result<ApplyOutcome, TablesError> {
            let mut state = self.inner.write().expect("in-memory tables lock poisoned");
            let current = state.checkpoints.get(projection).map(|c| c.position);
            if current != Some(expected.position) {
                return Ok(ApplyOutcome::Skipped);
            }
            state.run(statement)?;
            Ok(ApplyOutcome::Applied)
        })();
        std::future::ready(result)
    }

    fn reset<'a>(
        &'a self,
        projection: &'a str,
        tables: &'a [TableSpec],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a {
        let mut state = self.inner.write().expect("in-memory tables lock poisoned");
        for spec in tables {
            if let Some(table) = state.tables.get_mut(spec.name) {
                table.rows.clear();
            }
        }
        state.checkpoints.remove(projection);
        drop(state);
        std::future::ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::projection::{Column, ColumnType};

    const ITEMS: TableSpec = TableSpec {
        name: "items",
        columns: &[
            Column::new("id", ColumnType::Text),
            Column::new("instance_id", ColumnType::Text),
            Column::nullable("name", ColumnType::Text),
            Column::new("flag", ColumnType::Bool),
        ],
        primary_key: &["id", "instance_id"],
    };

    fn upsert(id: &str, name: &str) -> Statement {
        Statement::upsert(
            &ITEMS,
            vec![
                ("id", id.into()),
                ("instance_id", "inst".into()),
                ("name", name.into()),
                ("flag", false.into()),
            ],
        )
    }

    fn checkpoint(position: u64) -> Checkpoint {
        Checkpoint {
            position,
            event_date: Utc::now(),
        }
    }

    async fn tables() -> Tables {
        let tables = Tables::new();
        tables.prepare(&[ITEMS]).await.unwrap();
        tables
    }

    #[tokio::test]
    async fn upsert_inserts_then_overwrites() {
        let tables = tables().await;
        tables.run(upsert("1", "a")).unwrap();
        tables.run(upsert("1", "b")).unwrap();
        let rows = tables.select("items", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text("name"), Some("b"));
    }

    #[tokio::test]
    async fn apply_skips_positions_at_or_before_checkpoint() {
        let tables = tables().await;
        assert_eq!(
            tables.apply("p", upsert("1", "a"), checkpoint(2)).await.unwrap(),
            ApplyOutcome::Applied
        );
        assert_eq!(
            tables.apply("p", upsert("1", "z"), checkpoint(2)).await.unwrap(),
            ApplyOutcome::Skipped
        );
        assert_eq!(tables.select("items", &[]).unwrap()[0].text("name"), Some("a"));
        assert_eq!(tables.checkpoint("p").await.unwrap().unwrap().position, 2);
    }

    #[tokio::test]
    async fn failed_multi_statement_changes_nothing() {
        let tables = tables().await;
        let statement = Statement::Multi(vec![
            upsert("1", "a"),
            Statement::Delete {
                table: "missing",
                conditions: Vec::new(),
            },
        ]);
        let err = tables.apply("p", statement, checkpoint(1)).await.unwrap_err();
        assert_eq!(err, TablesError::UnknownTable("missing".into()));
        assert!(tables.select("items", &[]).unwrap().is_empty());
        assert!(tables.checkpoint("p").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_and_delete_use_conditions() {
        let tables = tables().await;
        tables.run(upsert("1", "a")).unwrap();
        tables.run(upsert("2", "b")).unwrap();

        tables
            .run(Statement::update(
                &ITEMS,
                vec![("flag", true.into())],
                vec![Condition::eq("name", "b")],
            ))
            .unwrap();
        let flagged = tables
            .select("items", &[Condition::eq("flag", true)])
            .unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].text("id"), Some("2"));

        tables
            .run(Statement::delete(&ITEMS, vec![Condition::eq("id", "1")]))
            .unwrap();
        assert_eq!(tables.select("items", &[]).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_column_is_rejected() {
        let tables = tables().await;
        let err = tables
            .run(Statement::update(
                &ITEMS,
                vec![("colour", "red".into())],
                Vec::new(),
            ))
            .unwrap_err();
        assert!(matches!(err, TablesError::UnknownColumn { .. }));
    }

    #[tokio::test]
    async fn replay_runs_only_against_the_expected_checkpoint() {
        let tables = tables().await;
        tables.apply("p", upsert("1", "a"), checkpoint(1)).await.unwrap();
        let current = tables.checkpoint("p").await.unwrap().unwrap();

        assert_eq!(
            tables.replay("p", upsert("1", "stale"), checkpoint(2)).await.unwrap(),
            ApplyOutcome::Skipped
        );
        assert_eq!(
            tables.replay("q", upsert("1", "stale"), current).await.unwrap(),
            ApplyOutcome::Skipped
        );
        assert_eq!(tables.select("items", &[]).unwrap()[0].text("name"), Some("a"));

        assert_eq!(
            tables.replay("p", upsert("1", "b"), current).await.unwrap(),
            ApplyOutcome::Applied
        );
        assert_eq!(tables.select("items", &[]).unwrap()[0].text("name"), Some("b"));
        assert_eq!(tables.checkpoint("p").await.unwrap(), Some(current));
    }

    #[tokio::test]
    async fn failed_replay_keeps_every_touched_table() {
        const TAGS: TableSpec = TableSpec {
            name: "tags",
            columns: &[
                Column::new("id", ColumnType::Text),
                Column::new("instance_id", ColumnType::Text),
            ],
            primary_key: &["id", "instance_id"],
        };
        let tables = tables().await;
        tables.prepare(&[TAGS]).await.unwrap();
        let tag = Statement::upsert(&TAGS, vec![("id", "t".into()), ("instance_id", "inst".into())]);
        tables
            .apply("p", Statement::multi([upsert("1", "a"), tag]), checkpoint(1))
            .await
            .unwrap();
        let current = tables.checkpoint("p").await.unwrap().unwrap();

        let statement = Statement::multi([
            Statement::delete_instance(&[ITEMS, TAGS], "inst"),
            Statement::update(&ITEMS, vec![("colour", "red".into())], Vec::new()),
        ]);
        assert!(tables.replay("p", statement, current).await.is_err());
        assert_eq!(tables.select("items", &[]).unwrap().len(), 1);
        assert_eq!(tables.select("tags", &[]).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reset_clears_rows_and_checkpoint() {
        let tables = tables().await;
        tables.apply("p", upsert("1", "a"), checkpoint(1)).await.unwrap();
        tables.reset("p", &[ITEMS]).await.unwrap();
        assert!(tables.select("items", &[]).unwrap().is_empty());
        assert!(tables.checkpoint("p").await.unwrap().is_none());
    }
}
