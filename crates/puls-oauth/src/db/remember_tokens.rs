use std::fmt::Write;

use chrono::{DateTime, Utc};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use super::identity_errors::StoreError;

const TOKEN_LENGTH: usize = 40;

/// Long-lived login credential. Only the hash is stored.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RememberToken {
    pub token_hash: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// A freshly minted token together with the plain value for the cookie.
#[derive(Debug, Clone)]
pub struct IssuedRememberToken {
    pub plain: String,
    pub record: RememberToken,
}

impl RememberToken {
    pub fn generate(user_id: Uuid) -> IssuedRememberToken {
        let plain: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();
        let now = Utc::now();
        IssuedRememberToken {
            record: RememberToken {
                token_hash: hash_token(&plain),
                user_id,
                created_at: now,
                last_activity_at: now,
            },
            plain,
        }
    }
}

pub fn hash_token(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(output, "{byte:02x}");
    }
    output
}

pub struct RememberTokenRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> RememberTokenRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, token: &RememberToken) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO remember_tokens (token_hash, user_id, created_at, last_activity_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&token.token_hash)
        .bind(token.user_id)
        .bind(token.created_at)
        .bind(token.last_activity_at)
        .execute(self.pool)
        .await
        .map_err(|e| StoreError::from_insert(e, "remember token collision"))?;
        Ok(())
    }

    /// Resolves a token hash and bumps its activity timestamp.
    pub async fn touch(&self, token_hash: &str) -> Result<Option<RememberToken>, StoreError> {
        sqlx::query_as::<_, RememberToken>(
            r#"
            UPDATE remember_tokens
            SET last_activity_at = NOW()
            WHERE token_hash = $1
            RETURNING token_hash, user_id, created_at, last_activity_at
            "#,
        )
        .bind(token_hash)
        .fetch_optional(self.pool)
        .await
        .map_err(StoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_match_hex_length() {
        assert_eq!(hash_token("example").len(), 64);
    }

    #[test]
    fn generated_token_hash_matches_plain_value() {
        let user_id = Uuid::new_v4();
        let issued = RememberToken::generate(user_id);
        assert_eq!(issued.plain.len(), TOKEN_LENGTH);
        assert_eq!(issued.record.token_hash, hash_token(&issued.plain));
        assert_eq!(issued.record.user_id, user_id);
    }
}
