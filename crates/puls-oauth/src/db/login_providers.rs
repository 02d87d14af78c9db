use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{identity_errors::StoreError, users::User};

/// Association between a forum user and a `(provider, identifier)` pair.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct LinkedAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub identifier: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

pub struct LoginProviderRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> LoginProviderRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Looks up the user linked to `(provider, identifier)` and records the
    /// login time on the link.
    pub async fn log_in(&self, provider: &str, identifier: &str) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            WITH touched AS (
                UPDATE login_providers
                SET last_login_at = NOW()
                WHERE provider = $1
                  AND identifier = $2
                RETURNING user_id
            )
            SELECT u.id, u.username, u.email
            FROM users u
            JOIN touched t ON t.user_id = u.id
            "#,
        )
        .bind(provider)
        .bind(identifier)
        .fetch_optional(self.pool)
        .await
        .map_err(StoreError::from)
    }

    pub async fn find(
        &self,
        provider: &str,
        identifier: &str,
    ) -> Result<Option<LinkedAccount>, StoreError> {
        sqlx::query_as::<_, LinkedAccount>(
            r#"
            SELECT id, user_id, provider, identifier, created_at, last_login_at
            FROM login_providers
            WHERE provider = $1
              AND identifier = $2
            "#,
        )
        .bind(provider)
        .bind(identifier)
        .fetch_optional(self.pool)
        .await
        .map_err(StoreError::from)
    }

    pub async fn create(
        &self,
        user_id: Uuid,
        provider: &str,
        identifier: &str,
    ) -> Result<LinkedAccount, StoreError> {
        sqlx::query_as::<_, LinkedAccount>(
            r#"
            INSERT INTO login_providers (user_id, provider, identifier, last_login_at)
            VALUES ($1, $2, $3, NOW())
            RETURNING id, user_id, provider, identifier, created_at, last_login_at
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .bind(identifier)
        .fetch_one(self.pool)
        .await
        .map_err(|e| StoreError::from_insert(e, "provider account is already linked"))
    }

    pub async fn delete(&self, user_id: Uuid, provider: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM login_providers
            WHERE user_id = $1
              AND provider = $2
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<LinkedAccount>, StoreError> {
        sqlx::query_as::<_, LinkedAccount>(
            r#"
            SELECT id, user_id, provider, identifier, created_at, last_login_at
            FROM login_providers
            WHERE user_id = $1
            ORDER BY provider
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await
        .map_err(StoreError::from)
    }
}
