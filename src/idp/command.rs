//! Provider payloads and the intents that turn them into events.
//!
//! Every kind flows through the same three intents, [`AddProvider`],
//! [`UpdateProvider`] and [`DeleteProvider`]. The kind-specific parts
//! (required fields, event shapes, the diff) sit behind [`ProviderPayload`].

use serde::{Deserialize, Serialize};
use warden_core::{
    command::{CommandError, Intent, IntentMode, require},
    event::{EncodeError, PendingEvent},
    write_model::{Replay, WriteModel},
};

use super::{
    IdpOptions, LdapAttributes, ProviderKind,
    event::{
        GitHubEnterpriseIdpAdded, GitHubEnterpriseIdpChanged, GitHubIdpAdded, GitHubIdpChanged,
        GoogleIdpAdded, GoogleIdpChanged, IdpRemoved, LdapIdpAdded, LdapIdpChanged, OAuthIdpAdded,
        OAuthIdpChanged, ProviderChanged,
    },
    write_model::{
        GitHubEnterpriseIdpWriteModel, GitHubIdpWriteModel, GoogleIdpWriteModel,
        IdpRemoveWriteModel, LdapIdpWriteModel, OAuthIdpWriteModel,
    },
};
use crate::crypto::{CryptoValue, Encryption};

/// Trim `value` in place. Unlike [`require`], an empty result is accepted.
fn trim(value: &mut String) {
    if value.trim().len() != value.len() {
        *value = value.trim().to_string();
    }
}

/// Trim every scope and drop the empty ones.
fn trim_scopes(scopes: &mut Vec<String>) {
    for scope in scopes.iter_mut() {
        trim(scope);
    }
    scopes.retain(|scope| !scope.is_empty());
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenericOAuthProvider {
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub user_endpoint: String,
    pub scopes: Vec<String>,
    /// Claim of the user endpoint response holding the external user id.
    pub id_attribute: String,
    pub options: IdpOptions,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubProvider {
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    pub options: IdpOptions,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubEnterpriseProvider {
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub user_endpoint: String,
    pub scopes: Vec<String>,
    pub options: IdpOptions,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleProvider {
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    pub options: IdpOptions,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LdapProvider {
    pub name: String,
    pub host: String,
    pub port: String,
    pub tls: bool,
    pub base_dn: String,
    pub user_object_class: String,
    pub user_unique_attribute: String,
    pub admin: String,
    /// Bind password of `admin`.
    pub password: String,
    pub attributes: LdapAttributes,
    pub options: IdpOptions,
}

/// Kind-specific behaviour of a provider payload.
pub trait ProviderPayload: Send + Sized {
    const KIND: ProviderKind;

    /// Write model of this kind. Its events include the kind's added and
    /// changed events and [`IdpRemoved`].
    type Model: WriteModel;

    /// Change event of this kind.
    type Changed: ProviderChanged;

    /// Trim every field and check the ones required on add.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidArgument`] for the first blank required
    /// field.
    fn validate_add(&mut self) -> Result<(), CommandError>;

    /// Trim every field and check the ones required on update. The secret is
    /// never required.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidArgument`] for the first blank required
    /// field.
    fn validate_update(&mut self) -> Result<(), CommandError>;

    /// Plaintext secret, empty when not supplied.
    fn secret(&self) -> &str;

    /// Creation event carrying every field.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if the payload cannot be encoded.
    fn added(self, id: String, secret: CryptoValue) -> Result<PendingEvent, EncodeError>;

    /// Fields of `self` that differ from `model`.
    fn diff(&self, id: &str, model: &Self::Model, secret: Option<CryptoValue>) -> Self::Changed;

    /// Change event against `model`, `None` when nothing differs.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if the payload cannot be encoded.
    fn changed(
        &self,
        id: &str,
        model: &Self::Model,
        secret: Option<CryptoValue>,
    ) -> Result<Option<PendingEvent>, EncodeError> {
        let changes = self.diff(id, model, secret);
        (!changes.is_empty())
            .then(|| PendingEvent::new(&changes))
            .transpose()
    }
}

impl ProviderPayload for GenericOAuthProvider {
    const KIND: ProviderKind = ProviderKind::OAuth;
    type Model = OAuthIdpWriteModel;
    type Changed = OAuthIdpChanged;

    fn validate_add(&mut self) -> Result<(), CommandError> {
        self.validate_update()?;
        require("client_secret", &mut self.client_secret)
    }

    fn validate_update(&mut self) -> Result<(), CommandError> {
        require("name", &mut self.name)?;
        require("client_id", &mut self.client_id)?;
        require("authorization_endpoint", &mut self.authorization_endpoint)?;
        require("token_endpoint", &mut self.token_endpoint)?;
        require("user_endpoint", &mut self.user_endpoint)?;
        trim(&mut self.client_secret);
        trim(&mut self.id_attribute);
        trim_scopes(&mut self.scopes);
        Ok(())
    }

    fn secret(&self) -> &str {
        &self.client_secret
    }

    fn added(self, id: String, client_secret: CryptoValue) -> Result<PendingEvent, EncodeError> {
        PendingEvent::new(&OAuthIdpAdded {
            id,
            name: self.name,
            client_id: self.client_id,
            client_secret,
            authorization_endpoint: self.authorization_endpoint,
            token_endpoint: self.token_endpoint,
            user_endpoint: self.user_endpoint,
            scopes: self.scopes,
            id_attribute: self.id_attribute,
            options: self.options,
        })
    }

    fn diff(&self, id: &str, model: &Self::Model, secret: Option<CryptoValue>) -> Self::Changed {
        model.changes(id, self, secret)
    }
}

impl ProviderPayload for GitHubProvider {
    const KIND: ProviderKind = ProviderKind::GitHub;
    type Model = GitHubIdpWriteModel;
    type Changed = GitHubIdpChanged;

    fn validate_add(&mut self) -> Result<(), CommandError> {
        self.validate_update()?;
        require("client_secret", &mut self.client_secret)
    }

    fn validate_update(&mut self) -> Result<(), CommandError> {
        require("client_id", &mut self.client_id)?;
        trim(&mut self.name);
        trim(&mut self.client_secret);
        trim_scopes(&mut self.scopes);
        Ok(())
    }

    fn secret(&self) -> &str {
        &self.client_secret
    }

    fn added(self, id: String, client_secret: CryptoValue) -> Result<PendingEvent, EncodeError> {
        PendingEvent::new(&GitHubIdpAdded {
            id,
            name: self.name,
            client_id: self.client_id,
            client_secret,
            scopes: self.scopes,
            options: self.options,
        })
    }

    fn diff(&self, id: &str, model: &Self::Model, secret: Option<CryptoValue>) -> Self::Changed {
        model.changes(id, self, secret)
    }
}

impl ProviderPayload for GitHubEnterpriseProvider {
    const KIND: ProviderKind = ProviderKind::GitHubEnterprise;
    type Model = GitHubEnterpriseIdpWriteModel;
    type Changed = GitHubEnterpriseIdpChanged;

    fn validate_add(&mut self) -> Result<(), CommandError> {
        self.validate_update()?;
        require("client_secret", &mut self.client_secret)
    }

    fn validate_update(&mut self) -> Result<(), CommandError> {
        require("name", &mut self.name)?;
        require("client_id", &mut self.client_id)?;
        require("authorization_endpoint", &mut self.authorization_endpoint)?;
        require("token_endpoint", &mut self.token_endpoint)?;
        require("user_endpoint", &mut self.user_endpoint)?;
        trim(&mut self.client_secret);
        trim_scopes(&mut self.scopes);
        Ok(())
    }

    fn secret(&self) -> &str {
        &self.client_secret
    }

    fn added(self, id: String, client_secret: CryptoValue) -> Result<PendingEvent, EncodeError> {
        PendingEvent::new(&GitHubEnterpriseIdpAdded {
            id,
            name: self.name,
            client_id: self.client_id,
            client_secret,
            authorization_endpoint: self.authorization_endpoint,
            token_endpoint: self.token_endpoint,
            user_endpoint: self.user_endpoint,
            scopes: self.scopes,
            options: self.options,
        })
    }

    fn diff(&self, id: &str, model: &Self::Model, secret: Option<CryptoValue>) -> Self::Changed {
        model.changes(id, self, secret)
    }
}

impl ProviderPayload for GoogleProvider {
    const KIND: ProviderKind = ProviderKind::Google;
    type Model = GoogleIdpWriteModel;
    type Changed = GoogleIdpChanged;

    fn validate_add(&mut self) -> Result<(), CommandError> {
        self.validate_update()?;
        require("client_secret", &mut self.client_secret)
    }

    fn validate_update(&mut self) -> Result<(), CommandError> {
        require("client_id", &mut self.client_id)?;
        trim(&mut self.name);
        trim(&mut self.client_secret);
        trim_scopes(&mut self.scopes);
        Ok(())
    }

    fn secret(&self) -> &str {
        &self.client_secret
    }

    fn added(self, id: String, client_secret: CryptoValue) -> Result<PendingEvent, EncodeError> {
        PendingEvent::new(&GoogleIdpAdded {
            id,
            name: self.name,
            client_id: self.client_id,
            client_secret,
            scopes: self.scopes,
            options: self.options,
        })
    }

    fn diff(&self, id: &str, model: &Self::Model, secret: Option<CryptoValue>) -> Self::Changed {
        model.changes(id, self, secret)
    }
}

impl ProviderPayload for LdapProvider {
    const KIND: ProviderKind = ProviderKind::Ldap;
    type Model = LdapIdpWriteModel;
    type Changed = LdapIdpChanged;

    fn validate_add(&mut self) -> Result<(), CommandError> {
        self.validate_update()?;
        require("password", &mut self.password)
    }

    fn validate_update(&mut self) -> Result<(), CommandError> {
        require("name", &mut self.name)?;
        require("host", &mut self.host)?;
        require("base_dn", &mut self.base_dn)?;
        require("user_object_class", &mut self.user_object_class)?;
        require("user_unique_attribute", &mut self.user_unique_attribute)?;
        require("admin", &mut self.admin)?;
        trim(&mut self.port);
        trim(&mut self.password);
        self.attributes.trim();
        Ok(())
    }

    fn secret(&self) -> &str {
        &self.password
    }

    fn added(self, id: String, password: CryptoValue) -> Result<PendingEvent, EncodeError> {
        PendingEvent::new(&LdapIdpAdded {
            id,
            name: self.name,
            host: self.host,
            port: self.port,
            tls: self.tls,
            base_dn: self.base_dn,
            user_object_class: self.user_object_class,
            user_unique_attribute: self.user_unique_attribute,
            admin: self.admin,
            password,
            attributes: self.attributes,
            options: self.options,
        })
    }

    fn diff(&self, id: &str, model: &Self::Model, secret: Option<CryptoValue>) -> Self::Changed {
        model.changes(id, self, secret)
    }
}

fn encrypt(encryption: &dyn Encryption, secret: &str) -> Result<CryptoValue, CommandError> {
    encryption
        .encrypt(secret.as_bytes())
        .map_err(CommandError::internal)
}

/// Create a provider under a freshly generated id.
pub struct AddProvider<'a, P> {
    id: String,
    provider: P,
    encryption: &'a dyn Encryption,
}

impl<'a, P: ProviderPayload> AddProvider<'a, P> {
    pub fn new(id: impl Into<String>, provider: P, encryption: &'a dyn Encryption) -> Self {
        Self {
            id: id.into(),
            provider,
            encryption,
        }
    }
}

impl<P: ProviderPayload> Intent for AddProvider<'_, P> {
    type Model = P::Model;

    const MODE: IntentMode = IntentMode::Create;

    fn aggregate_id(&self) -> &str {
        &self.id
    }

    fn validate(&mut self) -> Result<(), CommandError> {
        require("id", &mut self.id)?;
        self.provider.validate_add()
    }

    fn build(self, _state: &Replay<Self::Model>) -> Result<Vec<PendingEvent>, CommandError> {
        let secret = encrypt(self.encryption, self.provider.secret())?;
        let event = self
            .provider
            .added(self.id, secret)
            .map_err(CommandError::internal)?;
        Ok(vec![event])
    }
}

/// Patch an existing provider of kind `P`.
///
/// Only fields that differ from the replayed state are written. A supplied
/// secret is always re-encrypted and written; an empty one keeps the stored
/// secret.
pub struct UpdateProvider<'a, P> {
    id: String,
    provider: P,
    encryption: &'a dyn Encryption,
}

impl<'a, P: ProviderPayload> UpdateProvider<'a, P> {
    pub fn new(id: impl Into<String>, provider: P, encryption: &'a dyn Encryption) -> Self {
        Self {
            id: id.into(),
            provider,
            encryption,
        }
    }
}

impl<P: ProviderPayload> Intent for UpdateProvider<'_, P> {
    type Model = P::Model;

    const MODE: IntentMode = IntentMode::Mutate;

    fn aggregate_id(&self) -> &str {
        &self.id
    }

    fn validate(&mut self) -> Result<(), CommandError> {
        require("id", &mut self.id)?;
        self.provider.validate_update()
    }

    fn build(self, state: &Replay<Self::Model>) -> Result<Vec<PendingEvent>, CommandError> {
        let secret = match self.provider.secret() {
            "" => None,
            plain => Some(encrypt(self.encryption, plain)?),
        };
        let event = self
            .provider
            .changed(&self.id, state.model(), secret)
            .map_err(CommandError::internal)?;
        Ok(event.into_iter().collect())
    }
}

/// Remove a provider of any kind.
pub struct DeleteProvider {
    id: String,
}

impl DeleteProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl Intent for DeleteProvider {
    type Model = IdpRemoveWriteModel;

    const MODE: IntentMode = IntentMode::Mutate;

    fn aggregate_id(&self) -> &str {
        &self.id
    }

    fn validate(&mut self) -> Result<(), CommandError> {
        require("id", &mut self.id)
    }

    fn build(self, state: &Replay<Self::Model>) -> Result<Vec<PendingEvent>, CommandError> {
        let event = PendingEvent::new(&IdpRemoved {
            name: state.model().name.clone(),
            id: self.id,
        })
        .map_err(CommandError::internal)?;
        Ok(vec![event])
    }
}
