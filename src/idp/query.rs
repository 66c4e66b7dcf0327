//! Read-side lookups over the `idp_templates` tables.
//!
//! Each [`IdpTemplate`] carries exactly one populated [`ProviderConfig`],
//! chosen by the row's `type`. Owner-removed rows are invisible.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::{IdpOptions, IdpState, LdapAttributes, OwnerType, ProviderKind};
use crate::crypto::CryptoValue;

mod inmemory;
#[cfg(feature = "postgres")]
mod postgres;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdpTemplate {
    pub id: String,
    pub instance_id: String,
    pub resource_owner: String,
    pub creation_date: DateTime<Utc>,
    pub change_date: DateTime<Utc>,
    pub sequence: u64,
    pub state: IdpState,
    pub name: String,
    pub kind: ProviderKind,
    pub owner_type: OwnerType,
    pub options: IdpOptions,
    pub config: ProviderConfig,
}

/// Kind-specific configuration of a template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderConfig {
    OAuth(OAuthConfig),
    GitHub(GitHubConfig),
    GitHubEnterprise(GitHubEnterpriseConfig),
    Google(GoogleConfig),
    Ldap(LdapConfig),
}

impl ProviderConfig {
    #[must_use]
    pub const fn kind(&self) -> ProviderKind {
        match self {
            Self::OAuth(_) => ProviderKind::OAuth,
            Self::GitHub(_) => ProviderKind::GitHub,
            Self::GitHubEnterprise(_) => ProviderKind::GitHubEnterprise,
            Self::Google(_) => ProviderKind::Google,
            Self::Ldap(_) => ProviderKind::Ldap,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: CryptoValue,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub user_endpoint: String,
    pub scopes: Vec<String>,
    pub id_attribute: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GitHubConfig {
    pub client_id: String,
    pub client_secret: CryptoValue,
    pub scopes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GitHubEnterpriseConfig {
    pub client_id: String,
    pub client_secret: CryptoValue,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub user_endpoint: String,
    pub scopes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: CryptoValue,
    pub scopes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LdapConfig {
    pub host: String,
    pub port: String,
    pub tls: bool,
    pub base_dn: String,
    pub user_object_class: String,
    pub user_unique_attribute: String,
    pub admin: String,
    pub password: CryptoValue,
    pub attributes: LdapAttributes,
}

/// Search criteria for [`IdpTemplateQueries::search_idp_templates`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdpTemplateSearch {
    pub resource_owner: Option<String>,
    /// Case-insensitive substring of the name.
    pub name: Option<String>,
    pub limit: Option<u64>,
    pub offset: u64,
    pub descending: bool,
}

impl IdpTemplateSearch {
    #[must_use]
    pub fn resource_owner(mut self, owner: impl Into<String>) -> Self {
        self.resource_owner = Some(owner.into());
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub const fn descending(mut self) -> Self {
        self.descending = true;
        self
    }
}

/// A page of templates together with the number of matches before paging.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdpTemplates {
    pub total: u64,
    pub templates: Vec<IdpTemplate>,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("idp template `{id}` not found")]
    NotFound { id: String },
    #[error("failed to decode column `{column}`: {reason}")]
    Decode { column: String, reason: String },
    #[error("failed to query templates: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl QueryError {
    pub(crate) fn store(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Store(Box::new(err))
    }

    pub(crate) fn decode(column: &str, reason: impl ToString) -> Self {
        Self::Decode {
            column: column.to_string(),
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Read access to the `idp_templates` projection.
pub trait IdpTemplateQueries: Send + Sync {
    /// A single template of `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::NotFound`] when the row is missing or its owner
    /// was removed.
    fn idp_template_by_id<'a>(
        &'a self,
        instance_id: &'a str,
        id: &'a str,
    ) -> impl Future<Output = Result<IdpTemplate, QueryError>> + Send + 'a;

    /// Templates of `instance_id` matching `search`, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Decode`] for malformed rows and
    /// [`QueryError::Store`] when the backend fails.
    fn search_idp_templates<'a>(
        &'a self,
        instance_id: &'a str,
        search: &'a IdpTemplateSearch,
    ) -> impl Future<Output = Result<IdpTemplates, QueryError>> + Send + 'a;
}

/// Typed access to the cells of one result row.
pub(crate) trait Cells {
    fn text(&self, column: &str) -> Result<Option<String>, QueryError>;
    fn int(&self, column: &str) -> Result<Option<i64>, QueryError>;
    fn bool(&self, column: &str) -> Result<Option<bool>, QueryError>;
    fn timestamp(&self, column: &str) -> Result<Option<DateTime<Utc>>, QueryError>;
    fn text_array(&self, column: &str) -> Result<Option<Vec<String>>, QueryError>;
    fn json(&self, column: &str) -> Result<Option<serde_json::Value>, QueryError>;

    fn required_text(&self, column: &str) -> Result<String, QueryError> {
        self.text(column)?
            .ok_or_else(|| QueryError::decode(column, "unexpected null"))
    }

    fn required_bool(&self, column: &str) -> Result<bool, QueryError> {
        self.bool(column)?
            .ok_or_else(|| QueryError::decode(column, "unexpected null"))
    }

    fn required_timestamp(&self, column: &str) -> Result<DateTime<Utc>, QueryError> {
        self.timestamp(column)?
            .ok_or_else(|| QueryError::decode(column, "unexpected null"))
    }

    fn parsed<T>(&self, column: &str) -> Result<T, QueryError>
    where
        T: std::str::FromStr,
        T::Err: ToString,
    {
        self.required_text(column)?
            .parse()
            .map_err(|err: T::Err| QueryError::decode(column, err))
    }

    fn decoded<T: DeserializeOwned>(&self, column: &str) -> Result<T, QueryError> {
        let value = self
            .json(column)?
            .ok_or_else(|| QueryError::decode(column, "unexpected null"))?;
        serde_json::from_value(value).map_err(|err| QueryError::decode(column, err))
    }
}

/// Decode a main row and the sub-row of its kind.
///
/// `config` yields the sub-row cells for the kind read from `main`, or `None`
/// when the sub-row is missing.
pub(crate) fn decode_template<M, C, F>(main: &M, config: F) -> Result<IdpTemplate, QueryError>
where
    M: Cells,
    C: Cells,
    F: FnOnce(ProviderKind) -> Result<Option<C>, QueryError>,
{
    let kind: ProviderKind = main.parsed("type")?;
    let sequence = main
        .int("sequence")?
        .ok_or_else(|| QueryError::decode("sequence", "unexpected null"))?;
    let sub = config(kind)?.ok_or_else(|| QueryError::decode("type", format!("no {kind} configuration")))?;

    Ok(IdpTemplate {
        id: main.required_text("id")?,
        instance_id: main.required_text("instance_id")?,
        resource_owner: main.required_text("resource_owner")?,
        creation_date: main.required_timestamp("creation_date")?,
        change_date: main.required_timestamp("change_date")?,
        sequence: u64::try_from(sequence).map_err(|err| QueryError::decode("sequence", err))?,
        state: main.parsed("state")?,
        name: main.required_text("name")?,
        kind,
        owner_type: main.parsed("owner_type")?,
        options: IdpOptions {
            is_creation_allowed: main.required_bool("is_creation_allowed")?,
            is_linking_allowed: main.required_bool("is_linking_allowed")?,
            is_auto_creation: main.required_bool("is_auto_creation")?,
            is_auto_update: main.required_bool("is_auto_update")?,
        },
        config: decode_config(kind, &sub)?,
    })
}

fn decode_config(kind: ProviderKind, sub: &impl Cells) -> Result<ProviderConfig, QueryError> {
    let scopes = || -> Result<Vec<String>, QueryError> { Ok(sub.text_array("scopes")?.unwrap_or_default()) };
    Ok(match kind {
        ProviderKind::OAuth => ProviderConfig::OAuth(OAuthConfig {
            client_id: sub.required_text("client_id")?,
            client_secret: sub.decoded("client_secret")?,
            authorization_endpoint: sub.required_text("authorization_endpoint")?,
            token_endpoint: sub.required_text("token_endpoint")?,
            user_endpoint: sub.required_text("user_endpoint")?,
            scopes: scopes()?,
            id_attribute: sub.text("id_attribute")?.unwrap_or_default(),
        }),
        ProviderKind::GitHub => ProviderConfig::GitHub(GitHubConfig {
            client_id: sub.required_text("client_id")?,
            client_secret: sub.decoded("client_secret")?,
            scopes: scopes()?,
        }),
        ProviderKind::GitHubEnterprise => ProviderConfig::GitHubEnterprise(GitHubEnterpriseConfig {
            client_id: sub.required_text("client_id")?,
            client_secret: sub.decoded("client_secret")?,
            authorization_endpoint: sub.required_text("authorization_endpoint")?,
            token_endpoint: sub.required_text("token_endpoint")?,
            user_endpoint: sub.required_text("user_endpoint")?,
            scopes: scopes()?,
        }),
        ProviderKind::Google => ProviderConfig::Google(GoogleConfig {
            client_id: sub.required_text("client_id")?,
            client_secret: sub.decoded("client_secret")?,
            scopes: scopes()?,
        }),
        ProviderKind::Ldap => {
            let mut attributes = serde_json::Map::new();
            for column in LdapAttributes::COLUMNS {
                if let Some(value) = sub.text(column)? {
                    attributes.insert((*column).to_string(), value.into());
                }
            }
            ProviderConfig::Ldap(LdapConfig {
                host: sub.required_text("host")?,
                port: sub.text("port")?.unwrap_or_default(),
                tls: sub.required_bool("tls")?,
                base_dn: sub.required_text("base_dn")?,
                user_object_class: sub.required_text("user_object_class")?,
                user_unique_attribute: sub.required_text("user_unique_attribute")?,
                admin: sub.required_text("admin")?,
                password: sub.decoded("password")?,
                attributes: serde_json::from_value(attributes.into())
                    .map_err(|err| QueryError::decode("attributes", err))?,
            })
        }
    })
}
