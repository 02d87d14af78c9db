use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

/// Payload handed to `app.authenticationComplete` once the provider callback
/// has been resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthenticationPayload {
    LoggedIn {
        #[serde(rename = "loggedIn")]
        logged_in: bool,
    },
    Linked {
        linked: bool,
        provider: String,
    },
    PendingRegistration(PendingRegistration),
}

impl AuthenticationPayload {
    pub fn logged_in() -> Self {
        Self::LoggedIn { logged_in: true }
    }

    pub fn linked(provider: impl Into<String>) -> Self {
        Self::Linked {
            linked: true,
            provider: provider.into(),
        }
    }

    /// Whether the forum can treat the user as signed in or linked.
    pub fn is_complete(&self) -> bool {
        match self {
            Self::LoggedIn { logged_in } => *logged_in,
            Self::Linked { linked, .. } => *linked,
            Self::PendingRegistration(_) => false,
        }
    }
}

/// Provided and suggested attributes flattened next to the registration
/// token. `provided` lists the keys that came from the provider and must not
/// be edited by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRegistration {
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
    pub token: String,
    pub provided: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, TS)]
#[ts(export)]
pub struct UnlinkRequest {
    pub provider: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, TS)]
#[ts(export)]
pub struct LinkedProvidersResponse {
    pub is_qq_linked: bool,
    pub is_wx_linked: bool,
    pub is_sina_linked: bool,
    #[serde(rename = "providersCount")]
    pub providers_count: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, TS)]
#[ts(export)]
pub struct ForumSettingsResponse {
    pub oauth_openqq: bool,
    pub oauth_openwx: bool,
    pub oauth_opensina: bool,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn logged_in_payload_uses_camel_case_flag() {
        let value = serde_json::to_value(AuthenticationPayload::logged_in()).unwrap();
        assert_eq!(value, json!({ "loggedIn": true }));
    }

    #[test]
    fn pending_registration_flattens_attributes() {
        let mut attributes = Map::new();
        attributes.insert("avatar_url".into(), json!("https://cdn.example/a.png"));
        attributes.insert("username".into(), json!("lilei"));

        let payload = AuthenticationPayload::PendingRegistration(PendingRegistration {
            attributes,
            token: "tok".into(),
            provided: vec!["avatar_url".into()],
        });

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({
                "avatar_url": "https://cdn.example/a.png",
                "username": "lilei",
                "token": "tok",
                "provided": ["avatar_url"],
            })
        );
        assert!(!payload.is_complete());

        let back: AuthenticationPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back, payload);
    }
}
