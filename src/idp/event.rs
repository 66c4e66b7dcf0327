//! Provider events.
//!
//! Added events carry the full configuration. Changed events carry only the
//! fields that differ from the replayed state; a changed event without any
//! field is never built.

use serde::{Deserialize, Serialize};
use warden_macros::DomainEvent;

use super::{IdpOptions, LdapAttributeChanges, LdapAttributes};
use crate::crypto::CryptoValue;

/// A changed event. Only the fields that differ from the replayed state are
/// set.
pub trait ProviderChanged: warden_core::event::DomainEvent {
    /// Whether the provider-specific sub-configuration changed.
    fn has_config_changes(&self) -> bool;

    fn name(&self) -> Option<&str>;

    fn options(&self) -> Option<&IdpOptions>;

    /// No field is set.
    fn is_empty(&self) -> bool {
        !self.has_config_changes() && self.name().is_none() && self.options().is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
#[event(kind = "idp.oauth.added")]
pub struct OAuthIdpAdded {
    pub id: String,
    pub name: String,
    pub client_id: String,
    pub client_secret: CryptoValue,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub user_endpoint: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub id_attribute: String,
    #[serde(default)]
    pub options: IdpOptions,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
#[event(kind = "idp.oauth.changed")]
pub struct OAuthIdpChanged {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<CryptoValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<IdpOptions>,
}

impl ProviderChanged for OAuthIdpChanged {
    fn has_config_changes(&self) -> bool {
        self.client_id.is_some()
            || self.client_secret.is_some()
            || self.authorization_endpoint.is_some()
            || self.token_endpoint.is_some()
            || self.user_endpoint.is_some()
            || self.scopes.is_some()
            || self.id_attribute.is_some()
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn options(&self) -> Option<&IdpOptions> {
        self.options.as_ref()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
#[event(kind = "idp.github.added")]
pub struct GitHubIdpAdded {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub client_id: String,
    pub client_secret: CryptoValue,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub options: IdpOptions,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
#[event(kind = "idp.github.changed")]
pub struct GitHubIdpChanged {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<CryptoValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<IdpOptions>,
}

impl ProviderChanged for GitHubIdpChanged {
    fn has_config_changes(&self) -> bool {
        self.client_id.is_some() || self.client_secret.is_some() || self.scopes.is_some()
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn options(&self) -> Option<&IdpOptions> {
        self.options.as_ref()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
#[event(kind = "idp.github_enterprise.added")]
pub struct GitHubEnterpriseIdpAdded {
    pub id: String,
    pub name: String,
    pub client_id: String,
    pub client_secret: CryptoValue,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub user_endpoint: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub options: IdpOptions,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
#[event(kind = "idp.github_enterprise.changed")]
pub struct GitHubEnterpriseIdpChanged {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<CryptoValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<IdpOptions>,
}

impl ProviderChanged for GitHubEnterpriseIdpChanged {
    fn has_config_changes(&self) -> bool {
        self.client_id.is_some()
            || self.client_secret.is_some()
            || self.authorization_endpoint.is_some()
            || self.token_endpoint.is_some()
            || self.user_endpoint.is_some()
            || self.scopes.is_some()
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn options(&self) -> Option<&IdpOptions> {
        self.options.as_ref()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
#[event(kind = "idp.google.added")]
pub struct GoogleIdpAdded {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub client_id: String,
    pub client_secret: CryptoValue,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub options: IdpOptions,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
#[event(kind = "idp.google.changed")]
pub struct GoogleIdpChanged {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<CryptoValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<IdpOptions>,
}

impl ProviderChanged for GoogleIdpChanged {
    fn has_config_changes(&self) -> bool {
        self.client_id.is_some() || self.client_secret.is_some() || self.scopes.is_some()
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn options(&self) -> Option<&IdpOptions> {
        self.options.as_ref()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
#[event(kind = "idp.ldap.added")]
pub struct LdapIdpAdded {
    pub id: String,
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub tls: bool,
    pub base_dn: String,
    pub user_object_class: String,
    pub user_unique_attribute: String,
    pub admin: String,
    pub password: CryptoValue,
    #[serde(default)]
    pub attributes: LdapAttributes,
    #[serde(default)]
    pub options: IdpOptions,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
#[event(kind = "idp.ldap.changed")]
pub struct LdapIdpChanged {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_object_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_unique_attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<CryptoValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<LdapAttributeChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<IdpOptions>,
}

impl ProviderChanged for LdapIdpChanged {
    fn has_config_changes(&self) -> bool {
        self.host.is_some()
            || self.port.is_some()
            || self.tls.is_some()
            || self.base_dn.is_some()
            || self.user_object_class.is_some()
            || self.user_unique_attribute.is_some()
            || self.admin.is_some()
            || self.password.is_some()
            || self.attributes.is_some()
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn options(&self) -> Option<&IdpOptions> {
        self.options.as_ref()
    }
}

/// A provider of any kind was deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
#[event(kind = "idp.removed")]
pub struct IdpRemoved {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[cfg(test)]
mod tests {
    use warden_core::event::{DomainEvent, PendingEvent};

    use super::*;

    #[test]
    fn changed_events_only_serialize_supplied_fields() {
        let changed = OAuthIdpChanged {
            id: "1".into(),
            name: Some("acme".into()),
            ..OAuthIdpChanged::default()
        };
        let pending = PendingEvent::new(&changed).unwrap();
        assert_eq!(pending.event_type, "idp.oauth.changed");
        assert_eq!(
            pending.payload,
            serde_json::json!({ "id": "1", "name": "acme" })
        );
        assert!(!changed.is_empty());
        assert!(!changed.has_config_changes());
    }

    #[test]
    fn event_kinds_are_namespaced_per_provider() {
        assert_eq!(GitHubIdpAdded::KIND, "idp.github.added");
        assert_eq!(GitHubEnterpriseIdpChanged::KIND, "idp.github_enterprise.changed");
        assert_eq!(GoogleIdpAdded::KIND, "idp.google.added");
        assert_eq!(LdapIdpChanged::KIND, "idp.ldap.changed");
        assert_eq!(IdpRemoved::KIND, "idp.removed");
    }

    #[test]
    fn empty_change_sets_are_detected() {
        assert!(GitHubIdpChanged::default().is_empty());
        assert!(GoogleIdpChanged::default().is_empty());
        assert!(LdapIdpChanged::default().is_empty());
        assert!(
            !LdapIdpChanged {
                tls: Some(true),
                ..LdapIdpChanged::default()
            }
            .is_empty()
        );
    }
}
