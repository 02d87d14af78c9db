use std::sync::{Arc, LazyLock};

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use cookie::{Cookie, SameSite, time::Duration as CookieDuration};
use regex::Regex;
use serde::Serialize;
use tracing::{error, info, warn};
use utils::api::oauth::{AuthenticationPayload, PendingRegistration};

use super::{Provider, Registration};
use crate::{
    configure_user_scope,
    db::{
        identity_errors::StoreError,
        registration_tokens::RegistrationToken,
        remember_tokens::RememberToken,
        users::User,
    },
    locale::{Locale, Message},
    store::IdentityStore,
};

const REMEMBER_COOKIE_DAYS: i64 = 5 * 365;

static MOBILE_USER_AGENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Android|SymbianOS|iPhone|iPad|iPod|BlackBerry|IEMobile|Opera Mini|Windows Phone|Midp",
    )
    .expect("valid regex")
});

/// How the login flow was opened, which decides how the result is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    /// Desktop: the flow runs in a popup opened by the forum.
    Popup,
    /// Mobile or embedded browser: the flow replaced the forum page.
    Mobile,
}

impl ClientKind {
    pub fn from_user_agent(user_agent: Option<&str>) -> Self {
        match user_agent {
            Some(ua) if MOBILE_USER_AGENT.is_match(ua) => Self::Mobile,
            _ => Self::Popup,
        }
    }
}

/// HTML page that hands the payload back to the forum app.
#[derive(Debug)]
pub struct LoginResponse {
    payload: AuthenticationPayload,
    client: ClientKind,
    locale: Locale,
    remember: Option<Cookie<'static>>,
}

impl LoginResponse {
    pub fn new(payload: AuthenticationPayload, client: ClientKind, locale: Locale) -> Self {
        Self {
            payload,
            client,
            locale,
            remember: None,
        }
    }

    fn with_remember_cookie(mut self, cookie: Cookie<'static>) -> Self {
        self.remember = Some(cookie);
        self
    }

    pub fn payload(&self) -> &AuthenticationPayload {
        &self.payload
    }

    pub fn remember_cookie(&self) -> Option<&Cookie<'static>> {
        self.remember.as_ref()
    }

    pub fn html(&self) -> serde_json::Result<String> {
        let payload = script_literal(&self.payload)?;
        let script = match self.client {
            ClientKind::Mobile if self.payload.is_complete() => format!(
                r#"window.location.href = "/"; window.app.authenticationComplete({payload});"#
            ),
            ClientKind::Mobile => {
                let message = script_literal(self.locale.message(Message::UnlinkedAlert))?;
                format!(
                    r#"alert({message}); window.location.href = "/"; window.app.authenticationComplete({payload});"#
                )
            }
            ClientKind::Popup => format!(
                "window.close(); window.opener.app.authenticationComplete({payload});"
            ),
        };

        Ok(format!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"></head><body><script>{script}</script></body></html>"
        ))
    }
}

impl IntoResponse for LoginResponse {
    fn into_response(self) -> Response {
        let html = match self.html() {
            Ok(html) => html,
            Err(error) => {
                error!(?error, "failed to serialize authentication payload");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        let mut response = (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            html,
        )
            .into_response();

        if let Some(cookie) = self.remember {
            match HeaderValue::from_str(&cookie.to_string()) {
                Ok(value) => {
                    response.headers_mut().append(header::SET_COOKIE, value);
                }
                Err(error) => {
                    error!(?error, name = cookie.name(), "failed to encode remember cookie");
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            }
        }

        response
    }
}

/// Serializes `value` as JSON that is safe inside an inline `<script>`.
fn script_literal<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let json = serde_json::to_string(value)?;
    let mut escaped = String::with_capacity(json.len());
    for ch in json.chars() {
        match ch {
            '<' => escaped.push_str("\\u003c"),
            '>' => escaped.push_str("\\u003e"),
            '&' => escaped.push_str("\\u0026"),
            '\u{2028}' => escaped.push_str("\\u2028"),
            '\u{2029}' => escaped.push_str("\\u2029"),
            _ => escaped.push(ch),
        }
    }
    Ok(escaped)
}

/// Resolves a provider identity to a forum login or a pending sign-up.
pub struct ResponseFactory {
    store: Arc<dyn IdentityStore>,
    remember_cookie: String,
    secure_cookies: bool,
    locale: Locale,
}

impl ResponseFactory {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        remember_cookie: impl Into<String>,
        secure_cookies: bool,
        locale: Locale,
    ) -> Self {
        Self {
            store,
            remember_cookie: remember_cookie.into(),
            secure_cookies,
            locale,
        }
    }

    pub async fn make(
        &self,
        provider: Provider,
        identifier: &str,
        registration: Registration,
        client: ClientKind,
    ) -> Result<LoginResponse, StoreError> {
        if let Some(user) = self.store.log_in(provider, identifier).await? {
            info!(%provider, user_id = %user.id, "logged in through linked account");
            return self.make_logged_in_response(&user, client).await;
        }

        // an email owner already linked to another account of this provider signs up instead
        if let Some(email) = registration.provided_email()
            && let Some(user) = self.store.find_user_by_email(email).await?
        {
            match self.store.create_link(user.id, provider, identifier).await {
                Ok(_) => {
                    info!(%provider, user_id = %user.id, "linked provider account by email");
                    return self.make_logged_in_response(&user, client).await;
                }
                Err(StoreError::Conflict(reason)) => {
                    warn!(
                        %provider,
                        user_id = %user.id,
                        %reason,
                        "email owner already linked; falling back to registration"
                    );
                }
                Err(error) => return Err(error),
            }
        }

        let token = RegistrationToken::generate(
            provider.as_str(),
            identifier,
            registration.provided(),
            registration.payload(),
        );
        self.store.save_registration_token(&token).await?;
        info!(%provider, "provider account not linked; registration pending");

        let provided = registration.provided().keys().cloned().collect();
        let mut attributes = registration.provided().clone();
        attributes.extend(
            registration
                .suggested()
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );

        Ok(self.render(
            AuthenticationPayload::PendingRegistration(PendingRegistration {
                attributes,
                token: token.token,
                provided,
            }),
            client,
        ))
    }

    pub fn render(&self, payload: AuthenticationPayload, client: ClientKind) -> LoginResponse {
        LoginResponse::new(payload, client, self.locale)
    }

    async fn make_logged_in_response(
        &self,
        user: &User,
        client: ClientKind,
    ) -> Result<LoginResponse, StoreError> {
        let issued = RememberToken::generate(user.id);
        self.store.save_remember_token(&issued.record).await?;

        configure_user_scope(user.id, Some(user.username.as_str()), user.email.as_deref());

        let cookie = Cookie::build((self.remember_cookie.clone(), issued.plain))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure_cookies)
            .max_age(CookieDuration::days(REMEMBER_COOKIE_DAYS))
            .build();

        Ok(self
            .render(AuthenticationPayload::logged_in(), client)
            .with_remember_cookie(cookie))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        db::remember_tokens::hash_token,
        store::MemoryStore,
    };

    const IPHONE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15";
    const DESKTOP_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/128.0";

    fn factory(store: Arc<MemoryStore>) -> ResponseFactory {
        ResponseFactory::new(store, "puls_remember", false, Locale::En)
    }

    fn registration() -> Registration {
        Registration::new()
            .suggest_username("lilei")
            .set_payload(json!({ "social_uid": "U1", "nickname": "李雷cool!" }))
    }

    #[test]
    fn mobile_detection_follows_the_device_pattern() {
        assert_eq!(ClientKind::from_user_agent(Some(IPHONE_UA)), ClientKind::Mobile);
        assert_eq!(
            ClientKind::from_user_agent(Some("Opera/9.80 (J2ME/MIDP; Opera Mini/9.80)")),
            ClientKind::Mobile
        );
        assert_eq!(ClientKind::from_user_agent(Some(DESKTOP_UA)), ClientKind::Popup);
        assert_eq!(ClientKind::from_user_agent(Some("android lowercase")), ClientKind::Popup);
        assert_eq!(ClientKind::from_user_agent(None), ClientKind::Popup);
    }

    #[test]
    fn script_literal_escapes_markup() {
        let literal = script_literal(&json!({ "name": "</script><b>&\u{2028}" })).unwrap();
        assert!(!literal.contains('<'));
        assert!(!literal.contains('>'));
        assert!(!literal.contains('&'));
        assert!(!literal.contains('\u{2028}'));
        let decoded: serde_json::Value = serde_json::from_str(&literal).unwrap();
        assert_eq!(decoded["name"], "</script><b>&\u{2028}");
    }

    #[test]
    fn popup_and_mobile_scripts() {
        let popup = LoginResponse::new(AuthenticationPayload::logged_in(), ClientKind::Popup, Locale::En)
            .html()
            .unwrap();
        assert!(popup.contains(
            r#"window.close(); window.opener.app.authenticationComplete({"loggedIn":true});"#
        ));

        let mobile = LoginResponse::new(AuthenticationPayload::logged_in(), ClientKind::Mobile, Locale::En)
            .html()
            .unwrap();
        assert!(mobile.contains(r#"window.location.href = "/"; window.app.authenticationComplete({"loggedIn":true});"#));
        assert!(!mobile.contains("alert("));
    }

    #[test]
    fn mobile_pending_registration_alerts_with_localized_message() {
        let payload = AuthenticationPayload::PendingRegistration(PendingRegistration {
            attributes: Default::default(),
            token: "tok".into(),
            provided: vec![],
        });
        let html = LoginResponse::new(payload, ClientKind::Mobile, Locale::ZhCn)
            .html()
            .unwrap();
        let expected = format!(
            "alert({});",
            serde_json::to_string(Locale::ZhCn.message(Message::UnlinkedAlert)).unwrap()
        );
        assert!(html.contains(&expected));
        assert!(html.contains("window.app.authenticationComplete("));
    }

    #[tokio::test]
    async fn linked_account_logs_in_without_minting_a_registration_token() {
        let store = Arc::new(MemoryStore::new());
        let user = store.insert_user("lilei", None);
        store.create_link(user.id, Provider::Qq, "U1").await.unwrap();

        let response = factory(store.clone())
            .make(Provider::Qq, "U1", registration(), ClientKind::Popup)
            .await
            .unwrap();

        assert_eq!(response.payload(), &AuthenticationPayload::logged_in());
        assert!(store.registration_tokens().is_empty());

        let cookie = response.remember_cookie().expect("remember cookie");
        assert_eq!(cookie.name(), "puls_remember");
        assert_eq!(cookie.http_only(), Some(true));
        let tokens = store.remember_tokens();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].token_hash, hash_token(cookie.value()));
        assert_eq!(tokens[0].user_id, user.id);
    }

    #[tokio::test]
    async fn matching_email_auto_links_and_logs_in() {
        let store = Arc::new(MemoryStore::new());
        let user = store.insert_user("hanmeimei", Some("han@example.com"));

        let response = factory(store.clone())
            .make(
                Provider::Wx,
                "W9",
                registration().provide_trusted_email("han@example.com"),
                ClientKind::Popup,
            )
            .await
            .unwrap();

        assert!(response.payload().is_complete());
        assert!(response.remember_cookie().is_some());
        assert!(store.registration_tokens().is_empty());

        let links = store.links();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].user_id, user.id);
        assert_eq!(links[0].provider, "wx");
        assert_eq!(links[0].identifier, "W9");
    }

    #[tokio::test]
    async fn unknown_identity_gets_a_pending_registration() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user("someone", Some("other@example.com"));

        let response = factory(store.clone())
            .make(
                Provider::Sina,
                "S1",
                registration()
                    .provide_avatar("https://cdn.example/a.png")
                    .provide_trusted_email("new@example.com"),
                ClientKind::Popup,
            )
            .await
            .unwrap();

        assert!(response.remember_cookie().is_none());
        let AuthenticationPayload::PendingRegistration(pending) = response.payload() else {
            panic!("expected pending registration, got {:?}", response.payload());
        };
        assert_eq!(pending.attributes["username"], "lilei");
        assert_eq!(pending.attributes["avatar_url"], "https://cdn.example/a.png");
        assert_eq!(pending.attributes["email"], "new@example.com");
        assert_eq!(pending.provided, vec!["avatar_url".to_string(), "email".to_string()]);

        let tokens = store.registration_tokens();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].token, pending.token);
        assert_eq!(tokens[0].provider, "sina");
        assert_eq!(tokens[0].identifier, "S1");
        assert_eq!(tokens[0].payload["social_uid"], "U1");
        assert!(store.links().is_empty());
    }

    #[tokio::test]
    async fn email_owner_with_another_link_gets_a_pending_registration() {
        let store = Arc::new(MemoryStore::new());
        let user = store.insert_user("hanmeimei", Some("han@example.com"));
        store.create_link(user.id, Provider::Qq, "OLD").await.unwrap();

        let response = factory(store.clone())
            .make(
                Provider::Qq,
                "NEW",
                registration().provide_trusted_email("han@example.com"),
                ClientKind::Popup,
            )
            .await
            .unwrap();

        assert!(response.remember_cookie().is_none());
        assert!(matches!(
            response.payload(),
            AuthenticationPayload::PendingRegistration(_)
        ));
        assert!(store.remember_tokens().is_empty());

        let tokens = store.registration_tokens();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].identifier, "NEW");

        let links = store.links();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].identifier, "OLD");
    }

    #[tokio::test]
    async fn unencodable_remember_cookie_fails_the_response() {
        let store = Arc::new(MemoryStore::new());
        let user = store.insert_user("lilei", None);
        store.create_link(user.id, Provider::Qq, "U1").await.unwrap();

        let response = ResponseFactory::new(store, "puls\nremember", false, Locale::En)
            .make(Provider::Qq, "U1", registration(), ClientKind::Popup)
            .await
            .unwrap()
            .into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }
}
