//! Persistence seams used by the login flow.
//!
//! [`PgStore`] backs them with the `db` repositories; [`MemoryStore`] keeps
//! everything in process for tests and local development.

mod memory;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

pub use memory::MemoryStore;

use crate::{
    auth::{AuthSession, Provider},
    db::{
        identity_errors::StoreError,
        login_providers::{LinkedAccount, LoginProviderRepository},
        registration_tokens::{RegistrationToken, RegistrationTokenRepository},
        remember_tokens::{RememberToken, RememberTokenRepository},
        sessions::OAuthSessionRepository,
        users::{User, UserRepository},
    },
};

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Resolves the user linked to `(provider, identifier)`, recording the login.
    async fn log_in(&self, provider: Provider, identifier: &str)
    -> Result<Option<User>, StoreError>;
    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_link(
        &self,
        provider: Provider,
        identifier: &str,
    ) -> Result<Option<LinkedAccount>, StoreError>;
    /// Fails with [`StoreError::Conflict`] if the pair or the user's provider slot is taken.
    async fn create_link(
        &self,
        user_id: Uuid,
        provider: Provider,
        identifier: &str,
    ) -> Result<LinkedAccount, StoreError>;
    async fn remove_link(&self, user_id: Uuid, provider: Provider) -> Result<bool, StoreError>;
    async fn list_links(&self, user_id: Uuid) -> Result<Vec<LinkedAccount>, StoreError>;
    async fn save_registration_token(&self, token: &RegistrationToken) -> Result<(), StoreError>;
    async fn save_remember_token(&self, token: &RememberToken) -> Result<(), StoreError>;
    async fn touch_remember_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RememberToken>, StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<AuthSession>, StoreError>;
    /// Upserts the session and drops other sessions whose state has lapsed.
    async fn save(&self, session_id: &str, session: &AuthSession) -> Result<(), StoreError>;
    async fn delete(&self, session_id: &str) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn log_in(
        &self,
        provider: Provider,
        identifier: &str,
    ) -> Result<Option<User>, StoreError> {
        LoginProviderRepository::new(&self.pool)
            .log_in(provider.as_str(), identifier)
            .await
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        UserRepository::new(&self.pool).find(user_id).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        UserRepository::new(&self.pool).find_by_email(email).await
    }

    async fn find_link(
        &self,
        provider: Provider,
        identifier: &str,
    ) -> Result<Option<LinkedAccount>, StoreError> {
        LoginProviderRepository::new(&self.pool)
            .find(provider.as_str(), identifier)
            .await
    }

    async fn create_link(
        &self,
        user_id: Uuid,
        provider: Provider,
        identifier: &str,
    ) -> Result<LinkedAccount, StoreError> {
        LoginProviderRepository::new(&self.pool)
            .create(user_id, provider.as_str(), identifier)
            .await
    }

    async fn remove_link(&self, user_id: Uuid, provider: Provider) -> Result<bool, StoreError> {
        LoginProviderRepository::new(&self.pool)
            .delete(user_id, provider.as_str())
            .await
    }

    async fn list_links(&self, user_id: Uuid) -> Result<Vec<LinkedAccount>, StoreError> {
        LoginProviderRepository::new(&self.pool)
            .list_by_user(user_id)
            .await
    }

    async fn save_registration_token(&self, token: &RegistrationToken) -> Result<(), StoreError> {
        RegistrationTokenRepository::new(&self.pool)
            .insert(token)
            .await
    }

    async fn save_remember_token(&self, token: &RememberToken) -> Result<(), StoreError> {
        RememberTokenRepository::new(&self.pool).insert(token).await
    }

    async fn touch_remember_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RememberToken>, StoreError> {
        RememberTokenRepository::new(&self.pool)
            .touch(token_hash)
            .await
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn load(&self, session_id: &str) -> Result<Option<AuthSession>, StoreError> {
        OAuthSessionRepository::new(&self.pool).load(session_id).await
    }

    async fn save(&self, session_id: &str, session: &AuthSession) -> Result<(), StoreError> {
        let repo = OAuthSessionRepository::new(&self.pool);
        repo.save(session_id, session).await?;
        repo.prune_expired(session_id).await
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        OAuthSessionRepository::new(&self.pool)
            .delete(session_id)
            .await
    }
}
