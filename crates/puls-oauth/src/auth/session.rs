use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const SESSION_COOKIE: &str = "puls_oauth_session";
/// How long a state token issued on the start leg stays redeemable.
pub const STATE_TTL: Duration = Duration::minutes(10);
const STATE_BYTES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingState {
    pub value: String,
    pub issued_at: DateTime<Utc>,
}

impl PendingState {
    pub fn issue(now: DateTime<Utc>) -> Self {
        Self {
            value: generate_state(),
            issued_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.issued_at > STATE_TTL
    }
}

/// Per-browser OAuth session data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub oauth2state: Option<PendingState>,
}

impl AuthSession {
    pub fn put_state(&mut self, state: PendingState) {
        self.oauth2state = Some(state);
    }

    /// Removes the stored state; every callback consumes it.
    pub fn take_state(&mut self) -> Option<PendingState> {
        self.oauth2state.take()
    }

    pub fn state_value(&self) -> Option<&str> {
        self.oauth2state.as_ref().map(|state| state.value.as_str())
    }
}

/// 128 bits from the thread-local CSPRNG, hex encoded.
fn generate_state() -> String {
    let bytes: [u8; STATE_BYTES] = rand::rng().random();
    hex::encode(bytes)
}

pub fn generate_session_id() -> String {
    generate_state()
}
