//! The `idp_templates` read model.
//!
//! One main row per provider plus one row in the sub-table of its kind.
//! Rows of removed organisations are flagged `owner_removed` rather than
//! deleted; rows of a removed instance are deleted outright.

use warden_core::{
    event::Event,
    projection::{
        Assignments, Column, ColumnType, Condition, Projection, ReduceError, Reducers, Statement,
        TableSpec, Value,
    },
};

use super::{
    IdpOptions, IdpState, LdapAttributes, OwnerType, ProviderKind,
    event::{
        GitHubEnterpriseIdpAdded, GitHubEnterpriseIdpChanged, GitHubIdpAdded, GitHubIdpChanged,
        GoogleIdpAdded, GoogleIdpChanged, IdpRemoved, LdapIdpAdded, LdapIdpChanged, OAuthIdpAdded,
        OAuthIdpChanged,
    },
};
use crate::{
    crypto::CryptoValue,
    tenant::{InstanceRemoved, OrgRemoved},
};

pub const IDP_TEMPLATES: TableSpec = TableSpec {
    name: "idp_templates",
    columns: &[
        Column::new("id", ColumnType::Text),
        Column::new("instance_id", ColumnType::Text),
        Column::new("resource_owner", ColumnType::Text),
        Column::new("creation_date", ColumnType::Timestamp),
        Column::new("change_date", ColumnType::Timestamp),
        Column::new("sequence", ColumnType::Int),
        Column::new("state", ColumnType::Text),
        Column::new("name", ColumnType::Text),
        Column::new("type", ColumnType::Text),
        Column::new("owner_type", ColumnType::Text),
        Column::new("is_creation_allowed", ColumnType::Bool),
        Column::new("is_linking_allowed", ColumnType::Bool),
        Column::new("is_auto_creation", ColumnType::Bool),
        Column::new("is_auto_update", ColumnType::Bool),
        Column::new("owner_removed", ColumnType::Bool),
    ],
    primary_key: &["instance_id", "id"],
};

pub const OAUTH_TEMPLATES: TableSpec = TableSpec {
    name: "idp_templates_oauth2",
    columns: &[
        Column::new("idp_id", ColumnType::Text),
        Column::new("instance_id", ColumnType::Text),
        Column::new("client_id", ColumnType::Text),
        Column::new("client_secret", ColumnType::Json),
        Column::new("authorization_endpoint", ColumnType::Text),
        Column::new("token_endpoint", ColumnType::Text),
        Column::new("user_endpoint", ColumnType::Text),
        Column::nullable("scopes", ColumnType::TextArray),
        Column::nullable("id_attribute", ColumnType::Text),
    ],
    primary_key: &["instance_id", "idp_id"],
};

pub const GITHUB_TEMPLATES: TableSpec = TableSpec {
    name: "idp_templates_github",
    columns: &[
        Column::new("idp_id", ColumnType::Text),
        Column::new("instance_id", ColumnType::Text),
        Column::new("client_id", ColumnType::Text),
        Column::new("client_secret", ColumnType::Json),
        Column::nullable("scopes", ColumnType::TextArray),
    ],
    primary_key: &["instance_id", "idp_id"],
};

pub const GITHUB_ENTERPRISE_TEMPLATES: TableSpec = TableSpec {
    name: "idp_templates_github_enterprise",
    columns: &[
        Column::new("idp_id", ColumnType::Text),
        Column::new("instance_id", ColumnType::Text),
        Column::new("client_id", ColumnType::Text),
        Column::new("client_secret", ColumnType::Json),
        Column::new("authorization_endpoint", ColumnType::Text),
        Column::new("token_endpoint", ColumnType::Text),
        Column::new("user_endpoint", ColumnType::Text),
        Column::nullable("scopes", ColumnType::TextArray),
    ],
    primary_key: &["instance_id", "idp_id"],
};

pub const GOOGLE_TEMPLATES: TableSpec = TableSpec {
    name: "idp_templates_google",
    columns: &[
        Column::new("idp_id", ColumnType::Text),
        Column::new("instance_id", ColumnType::Text),
        Column::new("client_id", ColumnType::Text),
        Column::new("client_secret", ColumnType::Json),
        Column::nullable("scopes", ColumnType::TextArray),
    ],
    primary_key: &["instance_id", "idp_id"],
};

pub const LDAP_TEMPLATES: TableSpec = TableSpec {
    name: "idp_templates_ldap",
    columns: &[
        Column::new("idp_id", ColumnType::Text),
        Column::new("instance_id", ColumnType::Text),
        Column::new("host", ColumnType::Text),
        Column::nullable("port", ColumnType::Text),
        Column::new("tls", ColumnType::Bool),
        Column::new("base_dn", ColumnType::Text),
        Column::new("user_object_class", ColumnType::Text),
        Column::new("user_unique_attribute", ColumnType::Text),
        Column::new("admin", ColumnType::Text),
        Column::new("password", ColumnType::Json),
        Column::nullable("id_attribute", ColumnType::Text),
        Column::nullable("first_name_attribute", ColumnType::Text),
        Column::nullable("last_name_attribute", ColumnType::Text),
        Column::nullable("display_name_attribute", ColumnType::Text),
        Column::nullable("nick_name_attribute", ColumnType::Text),
        Column::nullable("preferred_username_attribute", ColumnType::Text),
        Column::nullable("email_attribute", ColumnType::Text),
        Column::nullable("email_verified_attribute", ColumnType::Text),
        Column::nullable("phone_attribute", ColumnType::Text),
        Column::nullable("phone_verified_attribute", ColumnType::Text),
        Column::nullable("preferred_language_attribute", ColumnType::Text),
        Column::nullable("avatar_url_attribute", ColumnType::Text),
        Column::nullable("profile_attribute", ColumnType::Text),
    ],
    primary_key: &["instance_id", "idp_id"],
};

/// Main table first, then one sub-table per kind.
pub const TABLES: &[TableSpec] = &[
    IDP_TEMPLATES,
    OAUTH_TEMPLATES,
    GITHUB_TEMPLATES,
    GITHUB_ENTERPRISE_TEMPLATES,
    GOOGLE_TEMPLATES,
    LDAP_TEMPLATES,
];

/// Sub-table holding the configuration of `kind`.
#[must_use]
pub const fn config_table(kind: ProviderKind) -> &'static TableSpec {
    match kind {
        ProviderKind::OAuth => &OAUTH_TEMPLATES,
        ProviderKind::GitHub => &GITHUB_TEMPLATES,
        ProviderKind::GitHubEnterprise => &GITHUB_ENTERPRISE_TEMPLATES,
        ProviderKind::Google => &GOOGLE_TEMPLATES,
        ProviderKind::Ldap => &LDAP_TEMPLATES,
    }
}

/// Projection of every provider into `idp_templates` and its sub-tables.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdpTemplateProjection;

impl Projection for IdpTemplateProjection {
    const NAME: &'static str = "projections.idp_templates";

    fn tables(&self) -> &'static [TableSpec] {
        TABLES
    }

    fn reducers(&self) -> Reducers {
        Reducers::new()
            .on::<OAuthIdpAdded, _>(|event, added| {
                Ok(Statement::multi([
                    main_row(event, ProviderKind::OAuth, &added.name, added.options)?,
                    Statement::upsert(
                        &OAUTH_TEMPLATES,
                        with_key(
                            event,
                            vec![
                                ("client_id", added.client_id.into()),
                                ("client_secret", secret(&added.client_secret)?),
                                ("authorization_endpoint", added.authorization_endpoint.into()),
                                ("token_endpoint", added.token_endpoint.into()),
                                ("user_endpoint", added.user_endpoint.into()),
                                ("scopes", added.scopes.into()),
                                ("id_attribute", optional_text(&added.id_attribute)),
                            ],
                        ),
                    ),
                ]))
            })
            .on::<OAuthIdpChanged, _>(|event, changed| {
                let mut config = Assignments::new();
                push(&mut config, "client_id", changed.client_id);
                push_secret(&mut config, "client_secret", changed.client_secret.as_ref())?;
                push(&mut config, "authorization_endpoint", changed.authorization_endpoint);
                push(&mut config, "token_endpoint", changed.token_endpoint);
                push(&mut config, "user_endpoint", changed.user_endpoint);
                push(&mut config, "scopes", changed.scopes);
                push(&mut config, "id_attribute", changed.id_attribute.as_deref().map(optional_text));
                Ok(Statement::multi([
                    main_update(event, &changed.id, changed.name, changed.options)?,
                    config_update(&OAUTH_TEMPLATES, event, &changed.id, config),
                ]))
            })
            .on::<GitHubIdpAdded, _>(|event, added| {
                Ok(Statement::multi([
                    main_row(event, ProviderKind::GitHub, &added.name, added.options)?,
                    Statement::upsert(
                        &GITHUB_TEMPLATES,
                        with_key(
                            event,
                            vec![
                                ("client_id", added.client_id.into()),
                                ("client_secret", secret(&added.client_secret)?),
                                ("scopes", added.scopes.into()),
                            ],
                        ),
                    ),
                ]))
            })
            .on::<GitHubIdpChanged, _>(|event, changed| {
                let mut config = Assignments::new();
                push(&mut config, "client_id", changed.client_id);
                push_secret(&mut config, "client_secret", changed.client_secret.as_ref())?;
                push(&mut config, "scopes", changed.scopes);
                Ok(Statement::multi([
                    main_update(event, &changed.id, changed.name, changed.options)?,
                    config_update(&GITHUB_TEMPLATES, event, &changed.id, config),
                ]))
            })
            .on::<GitHubEnterpriseIdpAdded, _>(|event, added| {
                Ok(Statement::multi([
                    main_row(event, ProviderKind::GitHubEnterprise, &added.name, added.options)?,
                    Statement::upsert(
                        &GITHUB_ENTERPRISE_TEMPLATES,
                        with_key(
                            event,
                            vec![
                                ("client_id", added.client_id.into()),
                                ("client_secret", secret(&added.client_secret)?),
                                ("authorization_endpoint", added.authorization_endpoint.into()),
                                ("token_endpoint", added.token_endpoint.into()),
                                ("user_endpoint", added.user_endpoint.into()),
                                ("scopes", added.scopes.into()),
                            ],
                        ),
                    ),
                ]))
            })
            .on::<GitHubEnterpriseIdpChanged, _>(|event, changed| {
                let mut config = Assignments::new();
                push(&mut config, "client_id", changed.client_id);
                push_secret(&mut config, "client_secret", changed.client_secret.as_ref())?;
                push(&mut config, "authorization_endpoint", changed.authorization_endpoint);
                push(&mut config, "token_endpoint", changed.token_endpoint);
                push(&mut config, "user_endpoint", changed.user_endpoint);
                push(&mut config, "scopes", changed.scopes);
                Ok(Statement::multi([
                    main_update(event, &changed.id, changed.name, changed.options)?,
                    config_update(&GITHUB_ENTERPRISE_TEMPLATES, event, &changed.id, config),
                ]))
            })
            .on::<GoogleIdpAdded, _>(|event, added| {
                Ok(Statement::multi([
                    main_row(event, ProviderKind::Google, &added.name, added.options)?,
                    Statement::upsert(
                        &GOOGLE_TEMPLATES,
                        with_key(
                            event,
                            vec![
                                ("client_id", added.client_id.into()),
                                ("client_secret", secret(&added.client_secret)?),
                                ("scopes", added.scopes.into()),
                            ],
                        ),
                    ),
                ]))
            })
            .on::<GoogleIdpChanged, _>(|event, changed| {
                let mut config = Assignments::new();
                push(&mut config, "client_id", changed.client_id);
                push_secret(&mut config, "client_secret", changed.client_secret.as_ref())?;
                push(&mut config, "scopes", changed.scopes);
                Ok(Statement::multi([
                    main_update(event, &changed.id, changed.name, changed.options)?,
                    config_update(&GOOGLE_TEMPLATES, event, &changed.id, config),
                ]))
            })
            .on::<LdapIdpAdded, _>(|event, added| {
                let mut config = vec![
                    ("host", added.host.into()),
                    ("port", added.port.into()),
                    ("tls", added.tls.into()),
                    ("base_dn", added.base_dn.into()),
                    ("user_object_class", added.user_object_class.into()),
                    ("user_unique_attribute", added.user_unique_attribute.into()),
                    ("admin", added.admin.into()),
                    ("password", secret(&added.password)?),
                ];
                config.extend(attribute_values(&added.attributes));
                Ok(Statement::multi([
                    main_row(event, ProviderKind::Ldap, &added.name, added.options)?,
                    Statement::upsert(&LDAP_TEMPLATES, with_key(event, config)),
                ]))
            })
            .on::<LdapIdpChanged, _>(|event, changed| {
                let mut config = Assignments::new();
                push(&mut config, "host", changed.host);
                push(&mut config, "port", changed.port);
                push(&mut config, "tls", changed.tls);
                push(&mut config, "base_dn", changed.base_dn);
                push(&mut config, "user_object_class", changed.user_object_class);
                push(&mut config, "user_unique_attribute", changed.user_unique_attribute);
                push(&mut config, "admin", changed.admin);
                push_secret(&mut config, "password", changed.password.as_ref())?;
                if let Some(attributes) = &changed.attributes {
                    config.extend(
                        attributes
                            .values()
                            .into_iter()
                            .map(|(column, value)| (column, optional_text(value))),
                    );
                }
                Ok(Statement::multi([
                    main_update(event, &changed.id, changed.name, changed.options)?,
                    config_update(&LDAP_TEMPLATES, event, &changed.id, config),
                ]))
            })
            .on::<IdpRemoved, _>(|event, removed| {
                Ok(Statement::multi(TABLES.iter().map(|table| {
                    let id_column = if table.name == IDP_TEMPLATES.name { "id" } else { "idp_id" };
                    Statement::delete(table, by_id(event, id_column, &removed.id))
                })))
            })
            .on::<OrgRemoved, _>(|event, _removed| {
                Ok(Statement::update(
                    &IDP_TEMPLATES,
                    vec![
                        ("owner_removed", true.into()),
                        ("change_date", event.created_at.into()),
                        ("sequence", Value::counter("sequence", event.sequence)?),
                    ],
                    vec![
                        Condition::eq("instance_id", event.aggregate.instance_id.as_str()),
                        Condition::eq("resource_owner", event.aggregate.aggregate_id.as_str()),
                    ],
                ))
            })
            .on_instance_removed::<InstanceRemoved>(TABLES)
    }
}

fn secret(value: &CryptoValue) -> Result<Value, ReduceError> {
    Ok(Value::Json(serde_json::to_value(value)?))
}

fn push<T: Into<Value>>(values: &mut Assignments, column: &'static str, change: Option<T>) {
    if let Some(value) = change {
        values.push((column, value.into()));
    }
}

fn push_secret(
    values: &mut Assignments,
    column: &'static str,
    change: Option<&CryptoValue>,
) -> Result<(), ReduceError> {
    if let Some(value) = change {
        values.push((column, secret(value)?));
    }
    Ok(())
}

fn attribute_values(attributes: &LdapAttributes) -> impl Iterator<Item = (&'static str, Value)> + '_ {
    attributes
        .values()
        .into_iter()
        .map(|(column, value)| (column, optional_text(value)))
}

/// Unset text mappings are stored as `NULL`.
fn optional_text(value: &str) -> Value {
    if value.is_empty() {
        Value::Null
    } else {
        Value::from(value)
    }
}

fn by_id(event: &Event, id_column: &'static str, id: &str) -> Vec<Condition> {
    vec![
        Condition::eq(id_column, id),
        Condition::eq("instance_id", event.aggregate.instance_id.as_str()),
    ]
}

/// Prefix sub-table assignments with the row key.
fn with_key(event: &Event, values: Assignments) -> Assignments {
    let mut keyed = vec![
        ("idp_id", Value::from(event.aggregate.aggregate_id.as_str())),
        ("instance_id", event.aggregate.instance_id.as_str().into()),
    ];
    keyed.extend(values);
    keyed
}

fn option_values(options: IdpOptions) -> [(&'static str, Value); 4] {
    [
        ("is_creation_allowed", options.is_creation_allowed.into()),
        ("is_linking_allowed", options.is_linking_allowed.into()),
        ("is_auto_creation", options.is_auto_creation.into()),
        ("is_auto_update", options.is_auto_update.into()),
    ]
}

fn main_row(
    event: &Event,
    kind: ProviderKind,
    name: &str,
    options: IdpOptions,
) -> Result<Statement, ReduceError> {
    let owner_type = OwnerType::of(&event.aggregate.instance_id, &event.resource_owner);
    let mut values = vec![
        ("id", Value::from(event.aggregate.aggregate_id.as_str())),
        ("instance_id", event.aggregate.instance_id.as_str().into()),
        ("resource_owner", event.resource_owner.as_str().into()),
        ("creation_date", event.created_at.into()),
        ("change_date", event.created_at.into()),
        ("sequence", Value::counter("sequence", event.sequence)?),
        ("state", IdpState::Active.as_str().into()),
        ("name", name.into()),
        ("type", kind.as_str().into()),
        ("owner_type", owner_type.as_str().into()),
        ("owner_removed", false.into()),
    ];
    values.extend(option_values(options));
    Ok(Statement::upsert(&IDP_TEMPLATES, values))
}

/// Main-row update. Change date and sequence always move.
fn main_update(
    event: &Event,
    id: &str,
    name: Option<String>,
    options: Option<IdpOptions>,
) -> Result<Statement, ReduceError> {
    let mut values = vec![
        ("change_date", event.created_at.into()),
        ("sequence", Value::counter("sequence", event.sequence)?),
    ];
    push(&mut values, "name", name);
    if let Some(options) = options {
        values.extend(option_values(options));
    }
    Ok(Statement::update(&IDP_TEMPLATES, values, by_id(event, "id", id)))
}

fn config_update(table: &TableSpec, event: &Event, id: &str, values: Assignments) -> Statement {
    if values.is_empty() {
        return Statement::NoOp;
    }
    Statement::update(table, values, by_id(event, "idp_id", id))
}

#[cfg(test)]
mod tests {
    use warden_core::{
        event::{AggregateRef, PendingEvent},
        test::stored_events,
    };

    use super::*;
    use crate::crypto::{Encryption, ReversibleEncryption};

    fn reduce(aggregate: &AggregateRef, owner: &str, event: PendingEvent) -> Statement {
        let stored = stored_events(aggregate, owner, [event]);
        IdpTemplateProjection.reducers().reduce(&stored[0]).unwrap()
    }

    fn github(id: &str) -> AggregateRef {
        AggregateRef::new("idp", id, "inst")
    }

    #[test]
    fn added_upserts_main_and_kind_rows() {
        let added = GitHubIdpAdded {
            id: "1".into(),
            name: "gh".into(),
            client_id: "c1".into(),
            client_secret: ReversibleEncryption::default().encrypt(b"s").unwrap(),
            scopes: Vec::new(),
            options: IdpOptions::default(),
        };
        let statement = reduce(&github("1"), "org-1", PendingEvent::new(&added).unwrap());

        let Statement::Multi(statements) = statement else {
            panic!("expected two statements, got {statement:?}");
        };
        let [Statement::Upsert { table: main, values, .. }, Statement::Upsert { table: sub, .. }] =
            statements.as_slice()
        else {
            panic!("expected two upserts, got {statements:?}");
        };
        assert_eq!(*main, "idp_templates");
        assert_eq!(*sub, "idp_templates_github");
        assert!(values.contains(&("owner_type", Value::from("org"))));
        assert!(values.contains(&("type", Value::from("github"))));
    }

    #[test]
    fn name_only_change_leaves_sub_table_alone() {
        let changed = GoogleIdpChanged {
            id: "1".into(),
            name: Some("renamed".into()),
            ..GoogleIdpChanged::default()
        };
        let statement = reduce(&github("1"), "inst", PendingEvent::new(&changed).unwrap());

        let Statement::Update { table, values, .. } = statement else {
            panic!("expected a single update, got {statement:?}");
        };
        assert_eq!(table, "idp_templates");
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn removal_deletes_from_every_table() {
        let removed = IdpRemoved {
            id: "1".into(),
            name: "gh".into(),
        };
        let Statement::Multi(statements) =
            reduce(&github("1"), "inst", PendingEvent::new(&removed).unwrap())
        else {
            panic!("expected one delete per table");
        };
        assert_eq!(statements.len(), TABLES.len());
        assert!(statements.iter().all(|s| matches!(s, Statement::Delete { .. })));
    }

    #[test]
    fn org_removal_flags_rows_by_owner() {
        let org = AggregateRef::new("org", "org-1", "inst");
        let statement = reduce(&org, "org-1", PendingEvent::new(&OrgRemoved::default()).unwrap());

        let Statement::Update { conditions, values, .. } = statement else {
            panic!("expected an update, got {statement:?}");
        };
        assert!(values.contains(&("owner_removed", Value::Bool(true))));
        assert_eq!(
            conditions,
            vec![
                Condition::eq("instance_id", "inst"),
                Condition::eq("resource_owner", "org-1"),
            ]
        );
    }

    #[test]
    fn unset_id_attribute_is_stored_as_null() {
        let encryption = ReversibleEncryption::default();
        let added = OAuthIdpAdded {
            id: "1".into(),
            name: "acme".into(),
            client_id: "c1".into(),
            client_secret: encryption.encrypt(b"s1").unwrap(),
            authorization_endpoint: "https://a".into(),
            token_endpoint: "https://t".into(),
            user_endpoint: "https://u".into(),
            scopes: Vec::new(),
            id_attribute: String::new(),
            options: IdpOptions::default(),
        };
        let Statement::Multi(statements) =
            reduce(&github("1"), "inst", PendingEvent::new(&added).unwrap())
        else {
            panic!("expected main and sub-table upserts");
        };
        let Statement::Upsert { values, .. } = &statements[1] else {
            panic!("expected an upsert, got {:?}", statements[1]);
        };
        assert!(values.contains(&("id_attribute", Value::Null)));

        let cleared = OAuthIdpChanged {
            id: "1".into(),
            id_attribute: Some(String::new()),
            ..OAuthIdpChanged::default()
        };
        let Statement::Multi(statements) =
            reduce(&github("1"), "inst", PendingEvent::new(&cleared).unwrap())
        else {
            panic!("expected main and sub-table updates");
        };
        let Statement::Update { table, values, .. } = &statements[1] else {
            panic!("expected an update, got {:?}", statements[1]);
        };
        assert_eq!(*table, "idp_templates_oauth2");
        assert_eq!(values, &vec![("id_attribute", Value::Null)]);
    }

    #[test]
    fn subscribes_to_every_provider_and_tenant_event() {
        let types = IdpTemplateProjection.reducers().event_types();
        assert_eq!(types.len(), 13);
        assert!(types.contains(&"instance.removed"));
        assert!(types.contains(&"org.removed"));
    }

    #[test]
    fn ldap_sub_table_has_every_attribute_column() {
        for column in LdapAttributes::COLUMNS {
            assert!(LDAP_TEMPLATES.column(column).is_some(), "missing {column}");
        }
    }
}
