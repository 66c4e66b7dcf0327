//! Provider commands and queries against `PostgreSQL`.
//!
//! These tests require Docker to be running and will spin up a `PostgreSQL`
//! container using testcontainers.

#![cfg(feature = "postgres")]

use std::sync::Arc;

use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use warden::{
    Commands,
    command::{CommandContext, Pipeline},
    crypto::ReversibleEncryption,
    id::SequentialIds,
    idp::{
        OwnerType, ProviderKind,
        command::{GenericOAuthProvider, GitHubProvider, UpdateProvider},
        projection::IdpTemplateProjection,
        query::{IdpTemplateQueries, IdpTemplateSearch, ProviderConfig},
    },
    log::NonEmpty,
    event::{AggregateRef, PendingEvent},
    postgres::{DatabaseConfig, Log, Tables},
    projection::Projector,
    tenant::{ORG_AGGREGATE, OrgRemoved},
};
use warden_core::test::LogTestExt;

const INSTANCE: &str = "inst-1";

struct TestDb {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestDb {
    async fn new() -> Self {
        let container = Postgres::default().start().await.unwrap();
        let host = container.get_host().await.unwrap();
        let port = container.get_host_port_ipv4(5432).await.unwrap();

        let config = DatabaseConfig::new(format!("postgres://postgres:postgres@{host}:{port}/postgres"));
        let pool = config.connect().await.unwrap();

        Self {
            _container: container,
            pool,
        }
    }

    async fn parts(&self) -> (Commands<Log>, Projector<IdpTemplateProjection, Log, Tables>, Tables) {
        let log = Log::new(self.pool.clone());
        log.migrate().await.unwrap();
        let tables = Tables::new(self.pool.clone());
        let projector = Projector::new(IdpTemplateProjection, log.clone(), tables.clone());
        projector.setup().await.unwrap();
        let commands = Commands::new(
            log,
            Arc::new(SequentialIds::default()),
            Arc::new(ReversibleEncryption::default()),
        );
        (commands, projector, tables)
    }
}

fn instance() -> CommandContext {
    CommandContext::instance(INSTANCE, "editor-1")
}

fn acme() -> GenericOAuthProvider {
    GenericOAuthProvider {
        name: "acme".into(),
        client_id: "c1".into(),
        client_secret: "s1".into(),
        authorization_endpoint: "https://a".into(),
        token_endpoint: "https://t".into(),
        user_endpoint: "https://u".into(),
        scopes: vec!["openid".into()],
        ..GenericOAuthProvider::default()
    }
}

fn github(name: &str) -> GitHubProvider {
    GitHubProvider {
        name: name.into(),
        client_id: "gh".into(),
        client_secret: "gh-secret".into(),
        ..GitHubProvider::default()
    }
}

#[tokio::test]
async fn oauth_provider_round_trips_through_postgres() {
    let db = TestDb::new().await;
    let (commands, projector, tables) = db.parts().await;

    let (id, _) = commands.add_generic_oauth_provider(&instance(), acme()).await.unwrap();
    assert_eq!(projector.catch_up().await.unwrap(), 1);

    let template = tables.idp_template_by_id(INSTANCE, &id).await.unwrap();
    assert_eq!(template.kind, ProviderKind::OAuth);
    assert_eq!(template.name, "acme");
    assert_eq!(template.owner_type, OwnerType::Instance);
    let ProviderConfig::OAuth(config) = template.config else {
        panic!("expected an oauth config");
    };
    assert_eq!(config.client_id, "c1");
    assert_eq!(config.scopes, ["openid"]);
    assert_eq!(
        ReversibleEncryption::default().decrypt(&config.client_secret).unwrap(),
        "s1"
    );
}

#[tokio::test]
async fn stale_update_conflicts() {
    let db = TestDb::new().await;
    let (commands, _, _) = db.parts().await;
    let (id, _) = commands.add_github_provider(&instance(), github("gh")).await.unwrap();

    let encryption = ReversibleEncryption::default();
    let pipeline: &Pipeline<Log> = commands.pipeline();
    let rename = |name: &str| {
        UpdateProvider::new(
            id.clone(),
            GitHubProvider {
                client_secret: String::new(),
                ..github(name)
            },
            &encryption,
        )
    };
    let first = pipeline.prepare(&instance(), rename("one")).await.unwrap().unwrap();
    let second = pipeline.prepare(&instance(), rename("two")).await.unwrap().unwrap();

    pipeline.push(vec![first]).await.unwrap();
    assert!(pipeline.push(vec![second]).await.unwrap_err().is_conflict());
}

#[tokio::test]
async fn search_counts_before_paging_and_skips_removed_owners() {
    let db = TestDb::new().await;
    let (commands, projector, tables) = db.parts().await;
    for name in ["alpha", "bravo", "Charlie"] {
        commands.add_github_provider(&instance(), github(name)).await.unwrap();
    }
    let org = CommandContext::organization(INSTANCE, "org-1", "editor-1");
    commands.add_github_provider(&org, github("org_only")).await.unwrap();
    projector.catch_up().await.unwrap();

    let page = tables
        .search_idp_templates(INSTANCE, &IdpTemplateSearch::default().limit(2))
        .await
        .unwrap();
    assert_eq!(page.total, 4);
    assert_eq!(page.templates.len(), 2);
    assert_eq!(page.templates[0].name, "Charlie");
    assert_eq!(page.templates[1].name, "alpha");

    // `_` must match literally, not as a wildcard.
    let named = tables
        .search_idp_templates(INSTANCE, &IdpTemplateSearch::default().name("g_o"))
        .await
        .unwrap();
    assert_eq!(named.total, 1);

    commands
        .pipeline()
        .log()
        .seed(
            AggregateRef::new(ORG_AGGREGATE, "org-1", INSTANCE),
            "org-1",
            NonEmpty::singleton(PendingEvent::new(&OrgRemoved::default()).unwrap()),
        )
        .await
        .unwrap();
    projector.catch_up().await.unwrap();

    let page = tables
        .search_idp_templates(INSTANCE, &IdpTemplateSearch::default())
        .await
        .unwrap();
    assert_eq!(page.total, 3);
}
