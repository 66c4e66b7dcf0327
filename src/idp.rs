//! Identity-provider configuration.
//!
//! Each provider is its own `idp` aggregate. The five supported protocols
//! share one lifecycle and differ only in their payloads:
//!
//! - [`event`]: added/changed events per kind, plus the kind-agnostic
//!   [`IdpRemoved`](event::IdpRemoved)
//! - [`write_model`]: per-kind state used to diff updates
//! - [`command`]: payloads and the add/update/delete intents
//! - [`projection`]: the `idp_templates` read model
//! - [`query`]: lookups against the read model

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use warden_core::write_model::State;

pub mod command;
pub mod event;
pub mod projection;
pub mod query;
pub mod write_model;

/// Aggregate type of every provider stream.
pub const AGGREGATE_TYPE: &str = "idp";

/// Protocol of a provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[serde(rename = "oauth")]
    OAuth,
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "github_enterprise")]
    GitHubEnterprise,
    Google,
    Ldap,
}

impl ProviderKind {
    pub const ALL: [Self; 5] = [
        Self::OAuth,
        Self::GitHub,
        Self::GitHubEnterprise,
        Self::Google,
        Self::Ldap,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OAuth => "oauth",
            Self::GitHub => "github",
            Self::GitHubEnterprise => "github_enterprise",
            Self::Google => "google",
            Self::Ldap => "ldap",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {what} `{value}`")]
pub struct ParseError {
    what: &'static str,
    value: String,
}

impl FromStr for ProviderKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseError {
                what: "provider kind",
                value: s.to_string(),
            })
    }
}

/// How users may be created and linked through a provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdpOptions {
    pub is_creation_allowed: bool,
    pub is_linking_allowed: bool,
    pub is_auto_creation: bool,
    pub is_auto_update: bool,
}

/// Lifecycle of a provider aggregate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IdpState {
    #[default]
    Unspecified,
    Active,
    Removed,
}

impl IdpState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::Active => "active",
            Self::Removed => "removed",
        }
    }
}

impl FromStr for IdpState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unspecified" => Ok(Self::Unspecified),
            "active" => Ok(Self::Active),
            "removed" => Ok(Self::Removed),
            other => Err(ParseError {
                what: "provider state",
                value: other.to_string(),
            }),
        }
    }
}

impl State for IdpState {
    fn exists(&self) -> bool {
        *self == Self::Active
    }
}

/// Whether a provider belongs to the instance or to one organisation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnerType {
    Instance,
    Organization,
}

impl OwnerType {
    /// Instance-level resources are owned by the instance itself.
    #[must_use]
    pub fn of(instance_id: &str, resource_owner: &str) -> Self {
        if instance_id == resource_owner {
            Self::Instance
        } else {
            Self::Organization
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Organization => "org",
        }
    }
}

impl FromStr for OwnerType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instance" => Ok(Self::Instance),
            "org" => Ok(Self::Organization),
            other => Err(ParseError {
                what: "owner type",
                value: other.to_string(),
            }),
        }
    }
}

/// Declares the LDAP attribute mapping together with its change set, so the
/// two never drift apart.
macro_rules! ldap_attributes {
    ($($field:ident),+ $(,)?) => {
        /// Mapping of LDAP attributes onto user fields. Empty means unmapped.
        #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct LdapAttributes {
            $(pub $field: String,)+
        }

        /// Attribute mappings that differ from the stored ones.
        #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct LdapAttributeChanges {
            $(
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<String>,
            )+
        }

        impl LdapAttributes {
            /// Column names of the mapping, in declaration order.
            pub const COLUMNS: &'static [&'static str] = &[$(stringify!($field)),+];

            /// Trim every mapping in place.
            pub fn trim(&mut self) {
                $(
                    if self.$field.trim().len() != self.$field.len() {
                        self.$field = self.$field.trim().to_string();
                    }
                )+
            }

            /// Non-empty mappings of `next` that differ from `self`.
            #[must_use]
            pub fn changes(&self, next: &Self) -> LdapAttributeChanges {
                LdapAttributeChanges {
                    $($field: changed_text(&self.$field, &next.$field),)+
                }
            }

            pub fn apply(&mut self, changes: &LdapAttributeChanges) {
                $(
                    if let Some(value) = &changes.$field {
                        self.$field.clone_from(value);
                    }
                )+
            }

            /// `(column, value)` pairs of every mapping.
            #[must_use]
            pub fn values(&self) -> Vec<(&'static str, &str)> {
                vec![$((stringify!($field), self.$field.as_str())),+]
            }
        }

        impl LdapAttributeChanges {
            #[must_use]
            pub const fn is_empty(&self) -> bool {
                $(self.$field.is_none())&&+
            }

            /// `(column, value)` pairs of the changed mappings.
            #[must_use]
            pub fn values(&self) -> Vec<(&'static str, &str)> {
                let mut values = Vec::new();
                $(
                    if let Some(value) = &self.$field {
                        values.push((stringify!($field), value.as_str()));
                    }
                )+
                values
            }
        }
    };
}

ldap_attributes!(
    id_attribute,
    first_name_attribute,
    last_name_attribute,
    display_name_attribute,
    nick_name_attribute,
    preferred_username_attribute,
    email_attribute,
    email_verified_attribute,
    phone_attribute,
    phone_verified_attribute,
    preferred_language_attribute,
    avatar_url_attribute,
    profile_attribute,
);

/// `Some(next)` when `next` is supplied and differs from `current`.
///
/// An empty `next` means "not supplied" and never counts as a change.
pub(crate) fn changed_text(current: &str, next: &str) -> Option<String> {
    (!next.is_empty() && current != next).then(|| next.to_string())
}

/// `Some(next)` when it differs from `current`.
pub(crate) fn changed<T: PartialEq + Clone>(current: &T, next: &T) -> Option<T> {
    (current != next).then(|| next.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_their_names() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.as_str().parse::<ProviderKind>().unwrap(), kind);
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::json!(kind.as_str())
            );
        }
        assert!("oidc".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn owner_type_follows_resource_owner() {
        assert_eq!(OwnerType::of("inst", "inst"), OwnerType::Instance);
        assert_eq!(OwnerType::of("inst", "org-1"), OwnerType::Organization);
    }

    #[test]
    fn only_active_providers_exist() {
        assert!(!IdpState::Unspecified.exists());
        assert!(IdpState::Active.exists());
        assert!(!IdpState::Removed.exists());
    }

    #[test]
    fn ldap_attribute_changes_skip_empty_and_equal_mappings() {
        let current = LdapAttributes {
            id_attribute: "uid".into(),
            email_attribute: "mail".into(),
            ..LdapAttributes::default()
        };
        let next = LdapAttributes {
            id_attribute: "uid".into(),
            email_attribute: String::new(),
            first_name_attribute: "givenName".into(),
            ..LdapAttributes::default()
        };

        let changes = current.changes(&next);
        assert_eq!(changes.values(), vec![("first_name_attribute", "givenName")]);

        let mut applied = current;
        applied.apply(&changes);
        assert_eq!(applied.first_name_attribute, "givenName");
        assert_eq!(applied.email_attribute, "mail");
        assert!(applied.changes(&applied.clone()).is_empty());
    }

    #[test]
    fn ldap_attributes_has_thirteen_columns() {
        assert_eq!(LdapAttributes::COLUMNS.len(), 13);
        assert_eq!(LdapAttributes::default().values().len(), 13);
    }
}
