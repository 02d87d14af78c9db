use std::{
    collections::HashMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{IdentityStore, SessionStore};
use crate::{
    auth::{AuthSession, Provider},
    db::{
        identity_errors::StoreError, login_providers::LinkedAccount,
        registration_tokens::RegistrationToken, remember_tokens::RememberToken, users::User,
    },
};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    links: Vec<LinkedAccount>,
    registration_tokens: HashMap<String, RegistrationToken>,
    remember_tokens: HashMap<String, RememberToken>,
    sessions: HashMap<String, AuthSession>,
}

/// In-process store with the same uniqueness rules as the Postgres schema.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_user(&self, username: &str, email: Option<&str>) -> User {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.map(str::to_string),
        };
        self.write().users.insert(user.id, user.clone());
        user
    }

    pub fn links(&self) -> Vec<LinkedAccount> {
        self.read().links.clone()
    }

    pub fn registration_tokens(&self) -> Vec<RegistrationToken> {
        self.read().registration_tokens.values().cloned().collect()
    }

    pub fn remember_tokens(&self) -> Vec<RememberToken> {
        self.read().remember_tokens.values().cloned().collect()
    }

    pub fn session(&self, session_id: &str) -> Option<AuthSession> {
        self.read().sessions.get(session_id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.read().sessions.len()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn log_in(
        &self,
        provider: Provider,
        identifier: &str,
    ) -> Result<Option<User>, StoreError> {
        let mut inner = self.write();
        let Some(link) = inner
            .links
            .iter_mut()
            .find(|link| link.provider == provider.as_str() && link.identifier == identifier)
        else {
            return Ok(None);
        };
        link.last_login_at = Some(Utc::now());
        let user_id = link.user_id;
        Ok(inner.users.get(&user_id).cloned())
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.read().users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .read()
            .users
            .values()
            .find(|user| user.email.as_deref() == Some(email))
            .cloned())
    }

    async fn find_link(
        &self,
        provider: Provider,
        identifier: &str,
    ) -> Result<Option<LinkedAccount>, StoreError> {
        Ok(self
            .read()
            .links
            .iter()
            .find(|link| link.provider == provider.as_str() && link.identifier == identifier)
            .cloned())
    }

    async fn create_link(
        &self,
        user_id: Uuid,
        provider: Provider,
        identifier: &str,
    ) -> Result<LinkedAccount, StoreError> {
        let mut inner = self.write();
        if !inner.users.contains_key(&user_id) {
            return Err(StoreError::NotFound);
        }
        let taken = inner.links.iter().any(|link| {
            link.provider == provider.as_str()
                && (link.identifier == identifier || link.user_id == user_id)
        });
        if taken {
            return Err(StoreError::Conflict(
                "provider account is already linked".to_string(),
            ));
        }

        let now = Utc::now();
        let link = LinkedAccount {
            id: Uuid::new_v4(),
            user_id,
            provider: provider.as_str().to_string(),
            identifier: identifier.to_string(),
            created_at: now,
            last_login_at: Some(now),
        };
        inner.links.push(link.clone());
        Ok(link)
    }

    async fn remove_link(&self, user_id: Uuid, provider: Provider) -> Result<bool, StoreError> {
        let mut inner = self.write();
        let before = inner.links.len();
        inner
            .links
            .retain(|link| !(link.user_id == user_id && link.provider == provider.as_str()));
        Ok(inner.links.len() != before)
    }

    async fn list_links(&self, user_id: Uuid) -> Result<Vec<LinkedAccount>, StoreError> {
        let mut links: Vec<_> = self
            .read()
            .links
            .iter()
            .filter(|link| link.user_id == user_id)
            .cloned()
            .collect();
        links.sort_by(|a, b| a.provider.cmp(&b.provider));
        Ok(links)
    }

    async fn save_registration_token(&self, token: &RegistrationToken) -> Result<(), StoreError> {
        let mut inner = self.write();
        if inner.registration_tokens.contains_key(&token.token) {
            return Err(StoreError::Conflict(
                "registration token collision".to_string(),
            ));
        }
        inner
            .registration_tokens
            .insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn save_remember_token(&self, token: &RememberToken) -> Result<(), StoreError> {
        let mut inner = self.write();
        if inner.remember_tokens.contains_key(&token.token_hash) {
            return Err(StoreError::Conflict("remember token collision".to_string()));
        }
        inner
            .remember_tokens
            .insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn touch_remember_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RememberToken>, StoreError> {
        let mut inner = self.write();
        Ok(inner.remember_tokens.get_mut(token_hash).map(|token| {
            token.last_activity_at = Utc::now();
            token.clone()
        }))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, session_id: &str) -> Result<Option<AuthSession>, StoreError> {
        Ok(self.read().sessions.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, session: &AuthSession) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut inner = self.write();
        inner.sessions.retain(|id, stored| {
            id == session_id
                || stored
                    .oauth2state
                    .as_ref()
                    .is_some_and(|state| !state.is_expired(now))
        });
        inner
            .sessions
            .insert(session_id.to_string(), session.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.write().sessions.remove(session_id);
        Ok(())
    }
}
