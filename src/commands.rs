//! Entry points for provider commands.
//!
//! [`Commands`] bundles the [`Pipeline`] with the id generator and the
//! secret encryption, so callers only hand in a context and a payload.

use std::sync::Arc;

use warden_core::{
    command::{CommandContext, CommandError, ObjectDetails, Pipeline},
    log::EventLog,
};

use crate::{
    crypto::Encryption,
    id::IdGenerator,
    idp::command::{
        AddProvider, DeleteProvider, GenericOAuthProvider, GitHubEnterpriseProvider, GitHubProvider,
        GoogleProvider, LdapProvider, ProviderPayload, UpdateProvider,
    },
};

/// Provider commands against one event log.
#[derive(Clone)]
pub struct Commands<L> {
    pipeline: Pipeline<L>,
    ids: Arc<dyn IdGenerator>,
    encryption: Arc<dyn Encryption>,
}

impl<L> Commands<L> {
    pub fn new(log: L, ids: Arc<dyn IdGenerator>, encryption: Arc<dyn Encryption>) -> Self {
        Self {
            pipeline: Pipeline::new(log),
            ids,
            encryption,
        }
    }

    #[must_use]
    pub const fn pipeline(&self) -> &Pipeline<L> {
        &self.pipeline
    }
}

impl<L: EventLog> Commands<L> {
    async fn add<P: ProviderPayload>(
        &self,
        ctx: &CommandContext,
        provider: P,
    ) -> Result<(String, ObjectDetails), CommandError> {
        let id = self.ids.next_id().map_err(CommandError::internal)?;
        let details = self
            .pipeline
            .execute(ctx, AddProvider::new(id.clone(), provider, &*self.encryption))
            .await?;
        tracing::info!(id = %id, kind = %P::KIND, "identity provider added");
        Ok((id, details))
    }

    async fn update<P: ProviderPayload>(
        &self,
        ctx: &CommandContext,
        id: &str,
        provider: P,
    ) -> Result<ObjectDetails, CommandError> {
        let details = self
            .pipeline
            .execute(ctx, UpdateProvider::new(id, provider, &*self.encryption))
            .await?;
        if !details.is_noop() {
            tracing::info!(id, kind = %P::KIND, sequence = details.sequence, "identity provider changed");
        }
        Ok(details)
    }

    /// Add a generic OAuth 2.0 provider. Returns the generated id.
    ///
    /// # Errors
    ///
    /// [`CommandError::InvalidArgument`] for missing fields, or
    /// [`CommandError::Internal`] when id generation, encryption or the log
    /// fails.
    #[tracing::instrument(skip_all, fields(instance_id = %ctx.instance_id))]
    pub async fn add_generic_oauth_provider(
        &self,
        ctx: &CommandContext,
        provider: GenericOAuthProvider,
    ) -> Result<(String, ObjectDetails), CommandError> {
        self.add(ctx, provider).await
    }

    /// Patch a generic OAuth 2.0 provider.
    ///
    /// # Errors
    ///
    /// [`CommandError::NotFound`] when no live OAuth provider with `id`
    /// belongs to the context's owner, [`CommandError::Conflict`] on a
    /// concurrent write.
    #[tracing::instrument(skip_all, fields(instance_id = %ctx.instance_id, id))]
    pub async fn update_generic_oauth_provider(
        &self,
        ctx: &CommandContext,
        id: &str,
        provider: GenericOAuthProvider,
    ) -> Result<ObjectDetails, CommandError> {
        self.update(ctx, id, provider).await
    }

    /// # Errors
    ///
    /// See [`add_generic_oauth_provider`](Self::add_generic_oauth_provider).
    #[tracing::instrument(skip_all, fields(instance_id = %ctx.instance_id))]
    pub async fn add_github_provider(
        &self,
        ctx: &CommandContext,
        provider: GitHubProvider,
    ) -> Result<(String, ObjectDetails), CommandError> {
        self.add(ctx, provider).await
    }

    /// # Errors
    ///
    /// See [`update_generic_oauth_provider`](Self::update_generic_oauth_provider).
    #[tracing::instrument(skip_all, fields(instance_id = %ctx.instance_id, id))]
    pub async fn update_github_provider(
        &self,
        ctx: &CommandContext,
        id: &str,
        provider: GitHubProvider,
    ) -> Result<ObjectDetails, CommandError> {
        self.update(ctx, id, provider).await
    }

    /// # Errors
    ///
    /// See [`add_generic_oauth_provider`](Self::add_generic_oauth_provider).
    #[tracing::instrument(skip_all, fields(instance_id = %ctx.instance_id))]
    pub async fn add_github_enterprise_provider(
        &self,
        ctx: &CommandContext,
        provider: GitHubEnterpriseProvider,
    ) -> Result<(String, ObjectDetails), CommandError> {
        self.add(ctx, provider).await
    }

    /// # Errors
    ///
    /// See [`update_generic_oauth_provider`](Self::update_generic_oauth_provider).
    #[tracing::instrument(skip_all, fields(instance_id = %ctx.instance_id, id))]
    pub async fn update_github_enterprise_provider(
        &self,
        ctx: &CommandContext,
        id: &str,
        provider: GitHubEnterpriseProvider,
    ) -> Result<ObjectDetails, CommandError> {
        self.update(ctx, id, provider).await
    }

    /// # Errors
    ///
    /// See [`add_generic_oauth_provider`](Self::add_generic_oauth_provider).
    #[tracing::instrument(skip_all, fields(instance_id = %ctx.instance_id))]
    pub async fn add_google_provider(
        &self,
        ctx: &CommandContext,
        provider: GoogleProvider,
    ) -> Result<(String, ObjectDetails), CommandError> {
        self.add(ctx, provider).await
    }

    /// # Errors
    ///
    /// See [`update_generic_oauth_provider`](Self::update_generic_oauth_provider).
    #[tracing::instrument(skip_all, fields(instance_id = %ctx.instance_id, id))]
    pub async fn update_google_provider(
        &self,
        ctx: &CommandContext,
        id: &str,
        provider: GoogleProvider,
    ) -> Result<ObjectDetails, CommandError> {
        self.update(ctx, id, provider).await
    }

    /// Add an LDAP provider. The bind password is encrypted.
    ///
    /// # Errors
    ///
    /// See [`add_generic_oauth_provider`](Self::add_generic_oauth_provider).
    #[tracing::instrument(skip_all, fields(instance_id = %ctx.instance_id))]
    pub async fn add_ldap_provider(
        &self,
        ctx: &CommandContext,
        provider: LdapProvider,
    ) -> Result<(String, ObjectDetails), CommandError> {
        self.add(ctx, provider).await
    }

    /// # Errors
    ///
    /// See [`update_generic_oauth_provider`](Self::update_generic_oauth_provider).
    #[tracing::instrument(skip_all, fields(instance_id = %ctx.instance_id, id))]
    pub async fn update_ldap_provider(
        &self,
        ctx: &CommandContext,
        id: &str,
        provider: LdapProvider,
    ) -> Result<ObjectDetails, CommandError> {
        self.update(ctx, id, provider).await
    }

    /// Remove a provider of any kind.
    ///
    /// # Errors
    ///
    /// [`CommandError::NotFound`] when the provider does not exist, was
    /// already removed, or belongs to another owner.
    #[tracing::instrument(skip_all, fields(instance_id = %ctx.instance_id, id))]
    pub async fn delete_provider(
        &self,
        ctx: &CommandContext,
        id: &str,
    ) -> Result<ObjectDetails, CommandError> {
        let details = self.pipeline.execute(ctx, DeleteProvider::new(id)).await?;
        tracing::info!(id, "identity provider removed");
        Ok(details)
    }
}
