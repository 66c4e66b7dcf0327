//! Per-kind provider state, rebuilt for every command.
//!
//! A model only listens to the events of its own kind plus
//! [`IdpRemoved`]. Replaying a GitHub stream into the OAuth model therefore
//! leaves it nonexistent, which turns a kind mismatch into `NotFound`.

use warden_core::write_model::Apply;
use warden_macros::WriteModel;

use super::{
    IdpOptions, IdpState, LdapAttributes, ProviderKind, changed, changed_text,
    command::{GenericOAuthProvider, GitHubEnterpriseProvider, GitHubProvider, GoogleProvider, LdapProvider},
    event::{
        GitHubEnterpriseIdpAdded, GitHubEnterpriseIdpChanged, GitHubIdpAdded, GitHubIdpChanged,
        GoogleIdpAdded, GoogleIdpChanged, IdpRemoved, LdapIdpAdded, LdapIdpChanged, OAuthIdpAdded,
        OAuthIdpChanged,
    },
};
use crate::crypto::CryptoValue;

fn set<T: Clone>(field: &mut T, change: Option<&T>) {
    if let Some(value) = change {
        field.clone_from(value);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, WriteModel)]
#[write_model(
    aggregate = "idp",
    event_enum = "OAuthIdpEvent",
    events(OAuthIdpAdded, OAuthIdpChanged, IdpRemoved),
    derives(Debug, PartialEq)
)]
pub struct OAuthIdpWriteModel {
    pub state: IdpState,
    pub name: String,
    pub client_id: String,
    pub client_secret: CryptoValue,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub user_endpoint: String,
    pub scopes: Vec<String>,
    pub id_attribute: String,
    pub options: IdpOptions,
}

impl Apply<OAuthIdpAdded> for OAuthIdpWriteModel {
    fn apply(&mut self, event: &OAuthIdpAdded) {
        *self = Self {
            state: IdpState::Active,
            name: event.name.clone(),
            client_id: event.client_id.clone(),
            client_secret: event.client_secret.clone(),
            authorization_endpoint: event.authorization_endpoint.clone(),
            token_endpoint: event.token_endpoint.clone(),
            user_endpoint: event.user_endpoint.clone(),
            scopes: event.scopes.clone(),
            id_attribute: event.id_attribute.clone(),
            options: event.options,
        };
    }
}

impl Apply<OAuthIdpChanged> for OAuthIdpWriteModel {
    fn apply(&mut self, event: &OAuthIdpChanged) {
        set(&mut self.name, event.name.as_ref());
        set(&mut self.client_id, event.client_id.as_ref());
        set(&mut self.client_secret, event.client_secret.as_ref());
        set(&mut self.authorization_endpoint, event.authorization_endpoint.as_ref());
        set(&mut self.token_endpoint, event.token_endpoint.as_ref());
        set(&mut self.user_endpoint, event.user_endpoint.as_ref());
        set(&mut self.scopes, event.scopes.as_ref());
        set(&mut self.id_attribute, event.id_attribute.as_ref());
        set(&mut self.options, event.options.as_ref());
    }
}

impl Apply<IdpRemoved> for OAuthIdpWriteModel {
    fn apply(&mut self, _event: &IdpRemoved) {
        self.state = IdpState::Removed;
    }
}

impl OAuthIdpWriteModel {
    pub const KIND: ProviderKind = ProviderKind::OAuth;

    /// Fields of `next` that differ from the replayed state.
    #[must_use]
    pub fn changes(
        &self,
        id: &str,
        next: &GenericOAuthProvider,
        client_secret: Option<CryptoValue>,
    ) -> OAuthIdpChanged {
        OAuthIdpChanged {
            id: id.to_string(),
            name: changed_text(&self.name, &next.name),
            client_id: changed_text(&self.client_id, &next.client_id),
            client_secret,
            authorization_endpoint: changed_text(
                &self.authorization_endpoint,
                &next.authorization_endpoint,
            ),
            token_endpoint: changed_text(&self.token_endpoint, &next.token_endpoint),
            user_endpoint: changed_text(&self.user_endpoint, &next.user_endpoint),
            scopes: changed(&self.scopes, &next.scopes),
            id_attribute: changed_text(&self.id_attribute, &next.id_attribute),
            options: changed(&self.options, &next.options),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, WriteModel)]
#[write_model(
    aggregate = "idp",
    event_enum = "GitHubIdpEvent",
    events(GitHubIdpAdded, GitHubIdpChanged, IdpRemoved),
    derives(Debug, PartialEq)
)]
pub struct GitHubIdpWriteModel {
    pub state: IdpState,
    pub name: String,
    pub client_id: String,
    pub client_secret: CryptoValue,
    pub scopes: Vec<String>,
    pub options: IdpOptions,
}

impl Apply<GitHubIdpAdded> for GitHubIdpWriteModel {
    fn apply(&mut self, event: &GitHubIdpAdded) {
        *self = Self {
            state: IdpState::Active,
            name: event.name.clone(),
            client_id: event.client_id.clone(),
            client_secret: event.client_secret.clone(),
            scopes: event.scopes.clone(),
            options: event.options,
        };
    }
}

impl Apply<GitHubIdpChanged> for GitHubIdpWriteModel {
    fn apply(&mut self, event: &GitHubIdpChanged) {
        set(&mut self.name, event.name.as_ref());
        set(&mut self.client_id, event.client_id.as_ref());
        set(&mut self.client_secret, event.client_secret.as_ref());
        set(&mut self.scopes, event.scopes.as_ref());
        set(&mut self.options, event.options.as_ref());
    }
}

impl Apply<IdpRemoved> for GitHubIdpWriteModel {
    fn apply(&mut self, _event: &IdpRemoved) {
        self.state = IdpState::Removed;
    }
}

impl GitHubIdpWriteModel {
    pub const KIND: ProviderKind = ProviderKind::GitHub;

    #[must_use]
    pub fn changes(
        &self,
        id: &str,
        next: &GitHubProvider,
        client_secret: Option<CryptoValue>,
    ) -> GitHubIdpChanged {
        GitHubIdpChanged {
            id: id.to_string(),
            name: changed_text(&self.name, &next.name),
            client_id: changed_text(&self.client_id, &next.client_id),
            client_secret,
            scopes: changed(&self.scopes, &next.scopes),
            options: changed(&self.options, &next.options),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, WriteModel)]
#[write_model(
    aggregate = "idp",
    event_enum = "GitHubEnterpriseIdpEvent",
    events(GitHubEnterpriseIdpAdded, GitHubEnterpriseIdpChanged, IdpRemoved),
    derives(Debug, PartialEq)
)]
pub struct GitHubEnterpriseIdpWriteModel {
    pub state: IdpState,
    pub name: String,
    pub client_id: String,
    pub client_secret: CryptoValue,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub user_endpoint: String,
    pub scopes: Vec<String>,
    pub options: IdpOptions,
}

impl Apply<GitHubEnterpriseIdpAdded> for GitHubEnterpriseIdpWriteModel {
    fn apply(&mut self, event: &GitHubEnterpriseIdpAdded) {
        *self = Self {
            state: IdpState::Active,
            name: event.name.clone(),
            client_id: event.client_id.clone(),
            client_secret: event.client_secret.clone(),
            authorization_endpoint: event.authorization_endpoint.clone(),
            token_endpoint: event.token_endpoint.clone(),
            user_endpoint: event.user_endpoint.clone(),
            scopes: event.scopes.clone(),
            options: event.options,
        };
    }
}

impl Apply<GitHubEnterpriseIdpChanged> for GitHubEnterpriseIdpWriteModel {
    fn apply(&mut self, event: &GitHubEnterpriseIdpChanged) {
        set(&mut self.name, event.name.as_ref());
        set(&mut self.client_id, event.client_id.as_ref());
        set(&mut self.client_secret, event.client_secret.as_ref());
        set(&mut self.authorization_endpoint, event.authorization_endpoint.as_ref());
        set(&mut self.token_endpoint, event.token_endpoint.as_ref());
        set(&mut self.user_endpoint, event.user_endpoint.as_ref());
        set(&mut self.scopes, event.scopes.as_ref());
        set(&mut self.options, event.options.as_ref());
    }
}

impl Apply<IdpRemoved> for GitHubEnterpriseIdpWriteModel {
    fn apply(&mut self, _event: &IdpRemoved) {
        self.state = IdpState::Removed;
    }
}

impl GitHubEnterpriseIdpWriteModel {
    pub const KIND: ProviderKind = ProviderKind::GitHubEnterprise;

    #[must_use]
    pub fn changes(
        &self,
        id: &str,
        next: &GitHubEnterpriseProvider,
        client_secret: Option<CryptoValue>,
    ) -> GitHubEnterpriseIdpChanged {
        GitHubEnterpriseIdpChanged {
            id: id.to_string(),
            name: changed_text(&self.name, &next.name),
            client_id: changed_text(&self.client_id, &next.client_id),
            client_secret,
            authorization_endpoint: changed_text(
                &self.authorization_endpoint,
                &next.authorization_endpoint,
            ),
            token_endpoint: changed_text(&self.token_endpoint, &next.token_endpoint),
            user_endpoint: changed_text(&self.user_endpoint, &next.user_endpoint),
            scopes: changed(&self.scopes, &next.scopes),
            options: changed(&self.options, &next.options),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, WriteModel)]
#[write_model(
    aggregate = "idp",
    event_enum = "GoogleIdpEvent",
    events(GoogleIdpAdded, GoogleIdpChanged, IdpRemoved),
    derives(Debug, PartialEq)
)]
pub struct GoogleIdpWriteModel {
    pub state: IdpState,
    pub name: String,
    pub client_id: String,
    pub client_secret: CryptoValue,
    pub scopes: Vec<String>,
    pub options: IdpOptions,
}

impl Apply<GoogleIdpAdded> for GoogleIdpWriteModel {
    fn apply(&mut self, event: &GoogleIdpAdded) {
        *self = Self {
            state: IdpState::Active,
            name: event.name.clone(),
            client_id: event.client_id.clone(),
            client_secret: event.client_secret.clone(),
            scopes: event.scopes.clone(),
            options: event.options,
        };
    }
}

impl Apply<GoogleIdpChanged> for GoogleIdpWriteModel {
    fn apply(&mut self, event: &GoogleIdpChanged) {
        set(&mut self.name, event.name.as_ref());
        set(&mut self.client_id, event.client_id.as_ref());
        set(&mut self.client_secret, event.client_secret.as_ref());
        set(&mut self.scopes, event.scopes.as_ref());
        set(&mut self.options, event.options.as_ref());
    }
}

impl Apply<IdpRemoved> for GoogleIdpWriteModel {
    fn apply(&mut self, _event: &IdpRemoved) {
        self.state = IdpState::Removed;
    }
}

impl GoogleIdpWriteModel {
    pub const KIND: ProviderKind = ProviderKind::Google;

    #[must_use]
    pub fn changes(
        &self,
        id: &str,
        next: &GoogleProvider,
        client_secret: Option<CryptoValue>,
    ) -> GoogleIdpChanged {
        GoogleIdpChanged {
            id: id.to_string(),
            name: changed_text(&self.name, &next.name),
            client_id: changed_text(&self.client_id, &next.client_id),
            client_secret,
            scopes: changed(&self.scopes, &next.scopes),
            options: changed(&self.options, &next.options),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, WriteModel)]
#[write_model(
    aggregate = "idp",
    event_enum = "LdapIdpEvent",
    events(LdapIdpAdded, LdapIdpChanged, IdpRemoved),
    derives(Debug, PartialEq)
)]
pub struct LdapIdpWriteModel {
    pub state: IdpState,
    pub name: String,
    pub host: String,
    pub port: String,
    pub tls: bool,
    pub base_dn: String,
    pub user_object_class: String,
    pub user_unique_attribute: String,
    pub admin: String,
    pub password: CryptoValue,
    pub attributes: LdapAttributes,
    pub options: IdpOptions,
}

impl Apply<LdapIdpAdded> for LdapIdpWriteModel {
    fn apply(&mut self, event: &LdapIdpAdded) {
        *self = Self {
            state: IdpState::Active,
            name: event.name.clone(),
            host: event.host.clone(),
            port: event.port.clone(),
            tls: event.tls,
            base_dn: event.base_dn.clone(),
            user_object_class: event.user_object_class.clone(),
            user_unique_attribute: event.user_unique_attribute.clone(),
            admin: event.admin.clone(),
            password: event.password.clone(),
            attributes: event.attributes.clone(),
            options: event.options,
        };
    }
}

impl Apply<LdapIdpChanged> for LdapIdpWriteModel {
    fn apply(&mut self, event: &LdapIdpChanged) {
        set(&mut self.name, event.name.as_ref());
        set(&mut self.host, event.host.as_ref());
        set(&mut self.port, event.port.as_ref());
        set(&mut self.tls, event.tls.as_ref());
        set(&mut self.base_dn, event.base_dn.as_ref());
        set(&mut self.user_object_class, event.user_object_class.as_ref());
        set(&mut self.user_unique_attribute, event.user_unique_attribute.as_ref());
        set(&mut self.admin, event.admin.as_ref());
        set(&mut self.password, event.password.as_ref());
        if let Some(attributes) = &event.attributes {
            self.attributes.apply(attributes);
        }
        set(&mut self.options, event.options.as_ref());
    }
}

impl Apply<IdpRemoved> for LdapIdpWriteModel {
    fn apply(&mut self, _event: &IdpRemoved) {
        self.state = IdpState::Removed;
    }
}

impl LdapIdpWriteModel {
    pub const KIND: ProviderKind = ProviderKind::Ldap;

    #[must_use]
    pub fn changes(&self, id: &str, next: &LdapProvider, password: Option<CryptoValue>) -> LdapIdpChanged {
        let attributes = self.attributes.changes(&next.attributes);
        LdapIdpChanged {
            id: id.to_string(),
            name: changed_text(&self.name, &next.name),
            host: changed_text(&self.host, &next.host),
            port: changed_text(&self.port, &next.port),
            tls: changed(&self.tls, &next.tls),
            base_dn: changed_text(&self.base_dn, &next.base_dn),
            user_object_class: changed_text(&self.user_object_class, &next.user_object_class),
            user_unique_attribute: changed_text(
                &self.user_unique_attribute,
                &next.user_unique_attribute,
            ),
            admin: changed_text(&self.admin, &next.admin),
            password,
            attributes: (!attributes.is_empty()).then_some(attributes),
            options: changed(&self.options, &next.options),
        }
    }
}

/// Kind-agnostic state for deleting a provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, WriteModel)]
#[write_model(
    aggregate = "idp",
    event_enum = "IdpLifecycleEvent",
    events(
        OAuthIdpAdded,
        OAuthIdpChanged,
        GitHubIdpAdded,
        GitHubIdpChanged,
        GitHubEnterpriseIdpAdded,
        GitHubEnterpriseIdpChanged,
        GoogleIdpAdded,
        GoogleIdpChanged,
        LdapIdpAdded,
        LdapIdpChanged,
        IdpRemoved
    ),
    derives(Debug, PartialEq)
)]
pub struct IdpRemoveWriteModel {
    pub state: IdpState,
    pub name: String,
    pub kind: Option<ProviderKind>,
}

impl IdpRemoveWriteModel {
    fn added(&mut self, kind: ProviderKind, name: &str) {
        self.state = IdpState::Active;
        self.kind = Some(kind);
        name.clone_into(&mut self.name);
    }

    fn renamed(&mut self, name: Option<&String>) {
        set(&mut self.name, name);
    }
}

impl Apply<OAuthIdpAdded> for IdpRemoveWriteModel {
    fn apply(&mut self, event: &OAuthIdpAdded) {
        self.added(ProviderKind::OAuth, &event.name);
    }
}

impl Apply<OAuthIdpChanged> for IdpRemoveWriteModel {
    fn apply(&mut self, event: &OAuthIdpChanged) {
        self.renamed(event.name.as_ref());
    }
}

impl Apply<GitHubIdpAdded> for IdpRemoveWriteModel {
    fn apply(&mut self, event: &GitHubIdpAdded) {
        self.added(ProviderKind::GitHub, &event.name);
    }
}

impl Apply<GitHubIdpChanged> for IdpRemoveWriteModel {
    fn apply(&mut self, event: &GitHubIdpChanged) {
        self.renamed(event.name.as_ref());
    }
}

impl Apply<GitHubEnterpriseIdpAdded> for IdpRemoveWriteModel {
    fn apply(&mut self, event: &GitHubEnterpriseIdpAdded) {
        self.added(ProviderKind::GitHubEnterprise, &event.name);
    }
}

impl Apply<GitHubEnterpriseIdpChanged> for IdpRemoveWriteModel {
    fn apply(&mut self, event: &GitHubEnterpriseIdpChanged) {
        self.renamed(event.name.as_ref());
    }
}

impl Apply<GoogleIdpAdded> for IdpRemoveWriteModel {
    fn apply(&mut self, event: &GoogleIdpAdded) {
        self.added(ProviderKind::Google, &event.name);
    }
}

impl Apply<GoogleIdpChanged> for IdpRemoveWriteModel {
    fn apply(&mut self, event: &GoogleIdpChanged) {
        self.renamed(event.name.as_ref());
    }
}

impl Apply<LdapIdpAdded> for IdpRemoveWriteModel {
    fn apply(&mut self, event: &LdapIdpAdded) {
        self.added(ProviderKind::Ldap, &event.name);
    }
}

impl Apply<LdapIdpChanged> for IdpRemoveWriteModel {
    fn apply(&mut self, event: &LdapIdpChanged) {
        self.renamed(event.name.as_ref());
    }
}

impl Apply<IdpRemoved> for IdpRemoveWriteModel {
    fn apply(&mut self, _event: &IdpRemoved) {
        self.state = IdpState::Removed;
    }
}
