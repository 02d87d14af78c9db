use chrono::{DateTime, Utc};
use rand::{Rng, distr::Alphanumeric};
use serde_json::{Map, Value};
use sqlx::PgPool;

use super::identity_errors::StoreError;

const TOKEN_LENGTH: usize = 40;

/// Binds an unresolved provider login to the sign-up that will complete it.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RegistrationToken {
    pub token: String,
    pub provider: String,
    pub identifier: String,
    pub user_attributes: Value,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl RegistrationToken {
    pub fn generate(
        provider: &str,
        identifier: &str,
        user_attributes: &Map<String, Value>,
        payload: &Value,
    ) -> Self {
        Self {
            token: rand::rng()
                .sample_iter(&Alphanumeric)
                .take(TOKEN_LENGTH)
                .map(char::from)
                .collect(),
            provider: provider.to_string(),
            identifier: identifier.to_string(),
            user_attributes: Value::Object(user_attributes.clone()),
            payload: payload.clone(),
            created_at: Utc::now(),
        }
    }
}

pub struct RegistrationTokenRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> RegistrationTokenRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, token: &RegistrationToken) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO registration_tokens (
                token,
                provider,
                identifier,
                user_attributes,
                payload,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&token.token)
        .bind(&token.provider)
        .bind(&token.identifier)
        .bind(&token.user_attributes)
        .bind(&token.payload)
        .bind(token.created_at)
        .execute(self.pool)
        .await
        .map_err(|e| StoreError::from_insert(e, "registration token collision"))?;
        Ok(())
    }
}
