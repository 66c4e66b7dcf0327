//! Integration tests for the `PostgreSQL` projection executor.
//!
//! These tests require Docker to be running and will spin up a `PostgreSQL`
//! container using testcontainers.

use chrono::Utc;
use sqlx::{PgPool, Row};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use warden_core::projection::{
    ApplyOutcome, Checkpoint, Column, ColumnType, Condition, Statement, StatementExecutor,
    TableSpec, Value,
};
use warden_postgres::Tables;

const LABELS: TableSpec = TableSpec {
    name: "labels",
    columns: &[
        Column::new("instance_id", ColumnType::Text),
        Column::new("id", ColumnType::Text),
        Column::new("name", ColumnType::Text),
        Column::nullable("tags", ColumnType::TextArray),
        Column::nullable("active", ColumnType::Bool),
    ],
    primary_key: &["instance_id", "id"],
};

const TABLES: &[TableSpec] = &[LABELS];

struct TestDb {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestDb {
    async fn new() -> Self {
        let container = Postgres::default().start().await.unwrap();
        let host = container.get_host().await.unwrap();
        let port = container.get_host_port_ipv4(5432).await.unwrap();

        let connection_string = format!("postgres://postgres:postgres@{host}:{port}/postgres");
        let pool = PgPool::connect(&connection_string).await.unwrap();

        Self {
            _container: container,
            pool,
        }
    }
}

fn checkpoint(position: u64) -> Checkpoint {
    Checkpoint {
        position,
        event_date: Utc::now(),
    }
}

fn insert(instance: &str, id: &str, name: &str) -> Statement {
    Statement::upsert(
        &LABELS,
        vec![
            ("instance_id", instance.into()),
            ("id", id.into()),
            ("name", name.into()),
            ("tags", Value::TextArray(vec!["x".into()])),
            ("active", true.into()),
        ],
    )
}

async fn names(pool: &PgPool) -> Vec<String> {
    sqlx::query("SELECT name FROM labels ORDER BY instance_id, id")
        .fetch_all(pool)
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.get("name"))
        .collect()
}

async fn setup() -> (TestDb, Tables) {
    let db = TestDb::new().await;
    let tables = Tables::new(db.pool.clone());
    tables.prepare(TABLES).await.unwrap();
    (db, tables)
}

#[tokio::test]
async fn prepare_is_idempotent_and_starts_without_checkpoint() {
    let (_db, tables) = setup().await;
    tables.prepare(TABLES).await.unwrap();
    assert_eq!(tables.checkpoint("labels").await.unwrap(), None);
}

#[tokio::test]
async fn apply_writes_rows_and_checkpoint_together() {
    let (db, tables) = setup().await;

    let outcome = tables.apply("labels", insert("i1", "1", "acme"), checkpoint(3)).await.unwrap();
    assert_eq!(outcome, ApplyOutcome::Applied);
    assert_eq!(names(&db.pool).await, vec!["acme"]);
    assert_eq!(tables.checkpoint("labels").await.unwrap().unwrap().position, 3);
}

#[tokio::test]
async fn applying_an_old_position_again_is_skipped() {
    let (db, tables) = setup().await;
    tables.apply("labels", insert("i1", "1", "acme"), checkpoint(3)).await.unwrap();

    let rename = Statement::update(
        &LABELS,
        vec![("name", "other".into())],
        vec![Condition::eq("id", "1")],
    );
    let outcome = tables.apply("labels", rename, checkpoint(3)).await.unwrap();

    assert_eq!(outcome, ApplyOutcome::Skipped);
    assert_eq!(names(&db.pool).await, vec!["acme"]);
}

#[tokio::test]
async fn failing_statement_leaves_rows_and_checkpoint_untouched() {
    let (db, tables) = setup().await;
    tables.apply("labels", insert("i1", "1", "acme"), checkpoint(1)).await.unwrap();

    let broken = Statement::multi([
        Statement::update(&LABELS, vec![("name", "changed".into())], Vec::new()),
        Statement::update(&LABELS, vec![("missing", "x".into())], Vec::new()),
    ]);
    assert!(tables.apply("labels", broken, checkpoint(2)).await.is_err());

    assert_eq!(names(&db.pool).await, vec!["acme"]);
    assert_eq!(tables.checkpoint("labels").await.unwrap().unwrap().position, 1);
}

#[tokio::test]
async fn upsert_overwrites_given_columns_and_null_clears() {
    let (db, tables) = setup().await;
    tables.apply("labels", insert("i1", "1", "acme"), checkpoint(1)).await.unwrap();

    let update = Statement::upsert(
        &LABELS,
        vec![
            ("instance_id", "i1".into()),
            ("id", "1".into()),
            ("name", "renamed".into()),
            ("tags", Value::Null),
        ],
    );
    tables.apply("labels", update, checkpoint(2)).await.unwrap();

    let row = sqlx::query("SELECT name, tags, active FROM labels")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(row.get::<String, _>("name"), "renamed");
    assert_eq!(row.get::<Option<Vec<String>>, _>("tags"), None);
    assert_eq!(row.get::<Option<bool>, _>("active"), Some(true));
}

#[tokio::test]
async fn replay_deletes_one_instance_without_moving_checkpoint() {
    let (db, tables) = setup().await;
    tables.apply("labels", insert("i1", "1", "a"), checkpoint(1)).await.unwrap();
    tables.apply("labels", insert("i2", "1", "b"), checkpoint(2)).await.unwrap();
    let current = tables.checkpoint("labels").await.unwrap().unwrap();

    let outcome = tables
        .replay(
            "labels",
            Statement::multi([
                Statement::delete_instance(TABLES, "i1"),
                insert("i1", "2", "c"),
            ]),
            current,
        )
        .await
        .unwrap();

    assert_eq!(outcome, ApplyOutcome::Applied);
    assert_eq!(names(&db.pool).await, vec!["c", "b"]);
    assert_eq!(tables.checkpoint("labels").await.unwrap().unwrap().position, 2);
}

#[tokio::test]
async fn replay_against_a_moved_checkpoint_writes_nothing() {
    let (db, tables) = setup().await;
    tables.apply("labels", insert("i1", "1", "a"), checkpoint(1)).await.unwrap();

    let outcome = tables
        .replay("labels", Statement::delete_instance(TABLES, "i1"), checkpoint(7))
        .await
        .unwrap();

    assert_eq!(outcome, ApplyOutcome::Skipped);
    assert_eq!(names(&db.pool).await, vec!["a"]);
}

#[tokio::test]
async fn failed_replay_rolls_back_the_delete() {
    let (db, tables) = setup().await;
    tables.apply("labels", insert("i1", "1", "a"), checkpoint(1)).await.unwrap();
    let current = tables.checkpoint("labels").await.unwrap().unwrap();

    let result = tables
        .replay(
            "labels",
            Statement::multi([
                Statement::delete_instance(TABLES, "i1"),
                Statement::Delete {
                    table: "missing",
                    conditions: Vec::new(),
                },
            ]),
            current,
        )
        .await;

    assert!(result.is_err());
    assert_eq!(names(&db.pool).await, vec!["a"]);
}

#[tokio::test]
async fn reset_clears_rows_and_checkpoint() {
    let (db, tables) = setup().await;
    tables.apply("labels", insert("i1", "1", "a"), checkpoint(1)).await.unwrap();

    tables.reset("labels", TABLES).await.unwrap();

    assert!(names(&db.pool).await.is_empty());
    assert_eq!(tables.checkpoint("labels").await.unwrap(), None);
}
