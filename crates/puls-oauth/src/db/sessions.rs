use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use super::identity_errors::StoreError;
use crate::auth::{AuthSession, PendingState, STATE_TTL};

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    oauth2state: Option<String>,
    state_issued_at: Option<DateTime<Utc>>,
}

impl From<SessionRow> for AuthSession {
    fn from(row: SessionRow) -> Self {
        let oauth2state = match (row.oauth2state, row.state_issued_at) {
            (Some(value), Some(issued_at)) => Some(PendingState { value, issued_at }),
            _ => None,
        };
        AuthSession { oauth2state }
    }
}

pub struct OAuthSessionRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> OAuthSessionRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn load(&self, session_id: &str) -> Result<Option<AuthSession>, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT oauth2state, state_issued_at
            FROM oauth_sessions
            WHERE id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(AuthSession::from))
    }

    pub async fn save(&self, session_id: &str, session: &AuthSession) -> Result<(), StoreError> {
        let (value, issued_at) = match &session.oauth2state {
            Some(state) => (Some(state.value.as_str()), Some(state.issued_at)),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO oauth_sessions (id, oauth2state, state_issued_at, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (id) DO UPDATE
            SET oauth2state = EXCLUDED.oauth2state,
                state_issued_at = EXCLUDED.state_issued_at,
                updated_at = NOW()
            "#,
        )
        .bind(session_id)
        .bind(value)
        .bind(issued_at)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM oauth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Removes every session other than `keep` that holds no redeemable state.
    pub async fn prune_expired(&self, keep: &str) -> Result<(), StoreError> {
        let cutoff = Utc::now() - STATE_TTL;
        let result = sqlx::query(
            r#"
            DELETE FROM oauth_sessions
            WHERE id <> $1
              AND (state_issued_at IS NULL OR state_issued_at < $2)
            "#,
        )
        .bind(keep)
        .bind(cutoff)
        .execute(self.pool)
        .await?;
        if result.rows_affected() > 0 {
            debug!(pruned = result.rows_affected(), "pruned lapsed oauth sessions");
        }
        Ok(())
    }
}
