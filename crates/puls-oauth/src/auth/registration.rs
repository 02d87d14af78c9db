use serde_json::{Map, Value};

/// Attributes gathered from the provider for a user that may need to sign up.
///
/// `provided` values are trusted and locked in the sign-up form, `suggested`
/// values are editable defaults, `payload` is replayed once sign-up completes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registration {
    provided: Map<String, Value>,
    suggested: Map<String, Value>,
    payload: Value,
}

impl Registration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.provided.insert(key.into(), value.into());
        self
    }

    pub fn provide_trusted_email(self, email: impl Into<String>) -> Self {
        self.provide("email", email.into())
    }

    pub fn provide_avatar(self, url: impl Into<String>) -> Self {
        self.provide("avatar_url", url.into())
    }

    pub fn suggest(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.suggested.insert(key.into(), value.into());
        self
    }

    pub fn suggest_username(self, username: impl Into<String>) -> Self {
        self.suggest("username", username.into())
    }

    pub fn set_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn provided(&self) -> &Map<String, Value> {
        &self.provided
    }

    pub fn suggested(&self) -> &Map<String, Value> {
        &self.suggested
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn provided_email(&self) -> Option<&str> {
        self.provided
            .get("email")
            .and_then(Value::as_str)
            .filter(|email| !email.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn builder_splits_provided_and_suggested() {
        let registration = Registration::new()
            .suggest_username("lilei")
            .provide_avatar("https://cdn.example/a.png")
            .set_payload(json!({ "social_uid": "U1" }));

        assert_eq!(registration.suggested()["username"], "lilei");
        assert_eq!(
            registration.provided().keys().collect::<Vec<_>>(),
            vec!["avatar_url"]
        );
        assert_eq!(registration.payload()["social_uid"], "U1");
        assert_eq!(registration.provided_email(), None);
    }

    #[test]
    fn empty_email_is_not_treated_as_provided() {
        let registration = Registration::new().provide_trusted_email("");
        assert_eq!(registration.provided_email(), None);
        let registration = Registration::new().provide_trusted_email("a@b.c");
        assert_eq!(registration.provided_email(), Some("a@b.c"));
    }
}
