use std::sync::Arc;

use anyhow::Error as AnyhowError;
use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;
use utils::{api::oauth::AuthenticationPayload, text::username_seed};

use super::{
    AuthSession, ClientKind, LoginResponse, PendingState, Provider, ProviderIdentity,
    Registration, ResponseFactory, SocialLoginClient,
};
use crate::{
    db::{identity_errors::StoreError, users::User},
    store::IdentityStore,
};

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid oauth state")]
    InvalidState,
    #[error(transparent)]
    ProviderExchange(#[from] AnyhowError),
    #[error("a signed-in user is required")]
    Unauthenticated,
    #[error("provider account is linked to another user")]
    AlreadyLinked,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Query string of both legs: `type` on start, `type`, `code` and `state`
/// on the provider callback.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct LoginQuery {
    #[serde(rename = "type")]
    pub provider: Option<String>,
    pub code: Option<String>,
    pub state: Option<String>,
}

/// Everything the handler needs from the incoming request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub user_agent: Option<String>,
    pub session: AuthSession,
    pub current_user: Option<User>,
}

impl RequestContext {
    pub fn new(user_agent: Option<String>, session: AuthSession) -> Self {
        Self {
            user_agent,
            session,
            current_user: None,
        }
    }

    pub fn with_user(mut self, user: Option<User>) -> Self {
        self.current_user = user;
        self
    }

    pub fn client_kind(&self) -> ClientKind {
        ClientKind::from_user_agent(self.user_agent.as_deref())
    }
}

/// Which endpoint the provider calls back into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Login,
    Link,
}

impl Flow {
    fn callback_path(&self) -> &'static str {
        match self {
            Self::Login => "/api/oauth/login",
            Self::Link => "/api/oauth/link",
        }
    }
}

#[derive(Debug)]
pub enum LoginOutcome {
    Redirect(Url),
    Rendered(LoginResponse),
}

impl IntoResponse for LoginOutcome {
    fn into_response(self) -> Response {
        match self {
            Self::Redirect(url) => {
                (StatusCode::FOUND, [(header::LOCATION, url.to_string())]).into_response()
            }
            Self::Rendered(response) => response.into_response(),
        }
    }
}

pub struct LoginHandler {
    client: Arc<dyn SocialLoginClient>,
    responses: Arc<ResponseFactory>,
    store: Arc<dyn IdentityStore>,
    enabled_providers: Vec<Provider>,
    public_origin: String,
}

impl LoginHandler {
    pub fn new(
        client: Arc<dyn SocialLoginClient>,
        responses: Arc<ResponseFactory>,
        store: Arc<dyn IdentityStore>,
        enabled_providers: Vec<Provider>,
        public_origin: &str,
    ) -> Self {
        Self {
            client,
            responses,
            store,
            enabled_providers,
            public_origin: public_origin.trim_end_matches('/').to_string(),
        }
    }

    pub async fn handle_login(
        &self,
        query: &LoginQuery,
        ctx: &mut RequestContext,
    ) -> Result<LoginOutcome, LoginError> {
        self.handle(Flow::Login, query, ctx).await
    }

    pub async fn handle_link(
        &self,
        query: &LoginQuery,
        ctx: &mut RequestContext,
    ) -> Result<LoginOutcome, LoginError> {
        if ctx.current_user.is_none() {
            return Err(LoginError::Unauthenticated);
        }
        self.handle(Flow::Link, query, ctx).await
    }

    async fn handle(
        &self,
        flow: Flow,
        query: &LoginQuery,
        ctx: &mut RequestContext,
    ) -> Result<LoginOutcome, LoginError> {
        let Some(code) = non_empty(query.code.as_deref()) else {
            return self.start(flow, query, ctx).map(LoginOutcome::Redirect);
        };

        self.verify_state(query.state.as_deref(), &mut ctx.session)?;
        let provider = self.provider(query)?;

        let identity = self.client.exchange_code(provider, code).await.map_err(|err| {
            warn!(?err, %provider, "provider code exchange failed");
            LoginError::ProviderExchange(err)
        })?;

        let response = match flow {
            Flow::Login => self.complete_login(provider, identity, ctx).await?,
            Flow::Link => self.complete_link(provider, identity, ctx).await?,
        };
        Ok(LoginOutcome::Rendered(response))
    }

    fn start(
        &self,
        flow: Flow,
        query: &LoginQuery,
        ctx: &mut RequestContext,
    ) -> Result<Url, LoginError> {
        let provider = self.provider(query)?;
        let state = PendingState::issue(Utc::now());
        let redirect_uri = format!("{}{}", self.public_origin, flow.callback_path());

        let url = self
            .client
            .authorize_url(provider, &state.value, &redirect_uri)?;
        ctx.session.put_state(state);

        info!(%provider, ?flow, "redirecting to provider authorization");
        Ok(url)
    }

    /// Consumes the session state; the callback must echo it before it expires.
    fn verify_state(
        &self,
        received: Option<&str>,
        session: &mut AuthSession,
    ) -> Result<(), LoginError> {
        let expected = session.take_state();
        match (non_empty(received), expected) {
            (Some(received), Some(expected))
                if bool::from(received.as_bytes().ct_eq(expected.value.as_bytes()))
                    && !expected.is_expired(Utc::now()) =>
            {
                Ok(())
            }
            (_, expected) => {
                warn!(
                    had_state = expected.is_some(),
                    "rejecting oauth callback with invalid state"
                );
                Err(LoginError::InvalidState)
            }
        }
    }

    fn provider(&self, query: &LoginQuery) -> Result<Provider, LoginError> {
        let raw = non_empty(query.provider.as_deref())
            .ok_or_else(|| LoginError::InvalidRequest("missing `type` parameter".into()))?;
        let provider = raw
            .parse::<Provider>()
            .map_err(|err| LoginError::InvalidRequest(err.to_string()))?;
        if !self.enabled_providers.contains(&provider) {
            return Err(LoginError::InvalidRequest(format!(
                "provider `{provider}` is not enabled"
            )));
        }
        Ok(provider)
    }

    async fn complete_login(
        &self,
        provider: Provider,
        identity: ProviderIdentity,
        ctx: &RequestContext,
    ) -> Result<LoginResponse, LoginError> {
        let registration = registration_for(&identity);
        let response = self
            .responses
            .make(provider, &identity.social_uid, registration, ctx.client_kind())
            .await?;
        Ok(response)
    }

    async fn complete_link(
        &self,
        provider: Provider,
        identity: ProviderIdentity,
        ctx: &RequestContext,
    ) -> Result<LoginResponse, LoginError> {
        let user = ctx
            .current_user
            .as_ref()
            .ok_or(LoginError::Unauthenticated)?;

        match self.store.find_link(provider, &identity.social_uid).await? {
            Some(link) if link.user_id == user.id => {}
            Some(_) => return Err(LoginError::AlreadyLinked),
            None => match self
                .store
                .create_link(user.id, provider, &identity.social_uid)
                .await
            {
                Ok(_) => info!(%provider, user_id = %user.id, "linked provider account"),
                Err(StoreError::Conflict(_)) => return Err(LoginError::AlreadyLinked),
                Err(err) => return Err(err.into()),
            },
        }

        Ok(self
            .responses
            .render(AuthenticationPayload::linked(provider.as_str()), ctx.client_kind()))
    }
}

fn registration_for(identity: &ProviderIdentity) -> Registration {
    let nickname = identity.nickname.as_deref().unwrap_or_default();
    let registration = Registration::new()
        .suggest_username(username_seed(nickname))
        .set_payload(identity.raw.clone());

    match non_empty(identity.avatar_url.as_deref()) {
        Some(avatar) => registration.provide_avatar(avatar),
        None => registration,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{locale::Locale, store::MemoryStore};

    struct FakeClient {
        identity: Option<ProviderIdentity>,
        exchanged: Mutex<Vec<String>>,
    }

    impl FakeClient {
        fn returning(identity: ProviderIdentity) -> Self {
            Self {
                identity: Some(identity),
                exchanged: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                identity: None,
                exchanged: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SocialLoginClient for FakeClient {
        fn authorize_url(
            &self,
            provider: Provider,
            state: &str,
            redirect_uri: &str,
        ) -> anyhow::Result<Url> {
            let mut url = Url::parse("https://login.example.com/connect.php")?;
            url.query_pairs_mut()
                .append_pair("type", provider.as_str())
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("appid", "1001")
                .append_pair("state", state);
            Ok(url)
        }

        async fn exchange_code(
            &self,
            _provider: Provider,
            code: &str,
        ) -> anyhow::Result<ProviderIdentity> {
            self.exchanged.lock().unwrap().push(code.to_string());
            self.identity
                .clone()
                .ok_or_else(|| anyhow::anyhow!("aggregator unavailable"))
        }
    }

    fn identity() -> ProviderIdentity {
        ProviderIdentity {
            social_uid: "U1".into(),
            nickname: Some("李雷cool!".into()),
            avatar_url: None,
            raw: json!({ "social_uid": "U1", "nickname": "李雷cool!", "faceimg": "" }),
        }
    }

    fn handler(client: Arc<FakeClient>, store: Arc<MemoryStore>) -> LoginHandler {
        let responses = Arc::new(ResponseFactory::new(
            store.clone(),
            "puls_remember",
            false,
            Locale::En,
        ));
        LoginHandler::new(
            client,
            responses,
            store,
            vec![Provider::Qq, Provider::Wx],
            "https://forum.example/",
        )
    }

    fn query(provider: Option<&str>, code: Option<&str>, state: Option<&str>) -> LoginQuery {
        LoginQuery {
            provider: provider.map(str::to_string),
            code: code.map(str::to_string),
            state: state.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn start_leg_redirects_and_stores_state() {
        let handler = handler(
            Arc::new(FakeClient::returning(identity())),
            Arc::new(MemoryStore::new()),
        );
        let mut ctx = RequestContext::default();

        let outcome = handler
            .handle_login(&query(Some("qq"), None, None), &mut ctx)
            .await
            .unwrap();

        let LoginOutcome::Redirect(url) = outcome else {
            panic!("expected redirect");
        };
        let state = ctx.session.state_value().expect("state stored").to_string();
        assert_eq!(state.len(), 32);
        assert!(url.as_str().contains(&format!("appid=1001&state={state}")));
        assert!(url.as_str().contains(
            "redirect_uri=https%3A%2F%2Fforum.example%2Fapi%2Foauth%2Flogin"
        ));
    }

    #[tokio::test]
    async fn start_leg_rejects_missing_unknown_and_disabled_providers() {
        let handler = handler(
            Arc::new(FakeClient::returning(identity())),
            Arc::new(MemoryStore::new()),
        );

        for provider in [None, Some(""), Some("github"), Some("sina")] {
            let mut ctx = RequestContext::default();
            let result = handler
                .handle_login(&query(provider, None, None), &mut ctx)
                .await;
            assert!(
                matches!(result, Err(LoginError::InvalidRequest(_))),
                "provider {provider:?}"
            );
            assert_eq!(ctx.session.oauth2state, None);
        }
    }

    #[tokio::test]
    async fn mismatched_state_is_rejected_and_cleared() {
        let client = Arc::new(FakeClient::returning(identity()));
        let handler = handler(client.clone(), Arc::new(MemoryStore::new()));
        let mut ctx = RequestContext::default();
        ctx.session.put_state(PendingState {
            value: "S1".into(),
            issued_at: Utc::now(),
        });

        let result = handler
            .handle_login(&query(Some("qq"), Some("abc"), Some("S2")), &mut ctx)
            .await;

        assert!(matches!(result, Err(LoginError::InvalidState)));
        assert_eq!(ctx.session.oauth2state, None);
        assert!(client.exchanged.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_or_expired_state_is_rejected() {
        let handler = handler(
            Arc::new(FakeClient::returning(identity())),
            Arc::new(MemoryStore::new()),
        );

        let mut ctx = RequestContext::default();
        let result = handler
            .handle_login(&query(Some("qq"), Some("abc"), Some("S1")), &mut ctx)
            .await;
        assert!(matches!(result, Err(LoginError::InvalidState)));

        let mut ctx = RequestContext::default();
        ctx.session.put_state(PendingState {
            value: "S1".into(),
            issued_at: Utc::now() - chrono::Duration::minutes(30),
        });
        let result = handler
            .handle_login(&query(Some("qq"), Some("abc"), Some("S1")), &mut ctx)
            .await;
        assert!(matches!(result, Err(LoginError::InvalidState)));
        assert_eq!(ctx.session.oauth2state, None);

        let mut ctx = RequestContext::default();
        ctx.session.put_state(PendingState {
            value: "S1".into(),
            issued_at: Utc::now(),
        });
        let result = handler
            .handle_login(&query(Some("qq"), Some("abc"), None), &mut ctx)
            .await;
        assert!(matches!(result, Err(LoginError::InvalidState)));
    }

    #[tokio::test]
    async fn callback_builds_pending_registration_from_sanitized_nickname() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(FakeClient::returning(identity()));
        let handler = handler(client.clone(), store.clone());
        let mut ctx = RequestContext::default();
        ctx.session.put_state(PendingState {
            value: "S1".into(),
            issued_at: Utc::now(),
        });

        let outcome = handler
            .handle_login(&query(Some("qq"), Some("abc"), Some("S1")), &mut ctx)
            .await
            .unwrap();

        let LoginOutcome::Rendered(response) = outcome else {
            panic!("expected rendered response");
        };
        let AuthenticationPayload::PendingRegistration(pending) = response.payload() else {
            panic!("expected pending registration");
        };
        assert_eq!(pending.attributes["username"], "李雷cool");
        assert!(!pending.attributes.contains_key("avatar_url"));
        assert!(pending.provided.is_empty());
        assert!(response.remember_cookie().is_none());
        assert_eq!(ctx.session.oauth2state, None);
        assert_eq!(*client.exchanged.lock().unwrap(), vec!["abc".to_string()]);

        let tokens = store.registration_tokens();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].token, pending.token);
        assert_eq!(tokens[0].identifier, "U1");
    }

    #[tokio::test]
    async fn provider_failures_propagate() {
        let handler = handler(Arc::new(FakeClient::failing()), Arc::new(MemoryStore::new()));
        let mut ctx = RequestContext::default();
        ctx.session.put_state(PendingState {
            value: "S1".into(),
            issued_at: Utc::now(),
        });

        let result = handler
            .handle_login(&query(Some("wx"), Some("abc"), Some("S1")), &mut ctx)
            .await;
        assert!(matches!(result, Err(LoginError::ProviderExchange(_))));
    }

    #[tokio::test]
    async fn link_flow_requires_a_user_and_refuses_foreign_links() {
        let store = Arc::new(MemoryStore::new());
        let alice = store.insert_user("alice", None);
        let bob = store.insert_user("bob", None);
        let handler = handler(Arc::new(FakeClient::returning(identity())), store.clone());

        let mut anonymous = RequestContext::default();
        let result = handler
            .handle_link(&query(Some("qq"), None, None), &mut anonymous)
            .await;
        assert!(matches!(result, Err(LoginError::Unauthenticated)));

        let callback = |ctx: &mut RequestContext| {
            ctx.session.put_state(PendingState {
                value: "S1".into(),
                issued_at: Utc::now(),
            });
            query(Some("qq"), Some("abc"), Some("S1"))
        };

        let mut ctx = RequestContext::default().with_user(Some(alice.clone()));
        let q = callback(&mut ctx);
        let LoginOutcome::Rendered(response) = handler.handle_link(&q, &mut ctx).await.unwrap()
        else {
            panic!("expected rendered response");
        };
        assert_eq!(response.payload(), &AuthenticationPayload::linked("qq"));
        assert!(response.remember_cookie().is_none());

        // linking the same account again is a no-op
        let q = callback(&mut ctx);
        assert!(handler.handle_link(&q, &mut ctx).await.is_ok());

        let mut ctx = RequestContext::default().with_user(Some(bob));
        let q = callback(&mut ctx);
        let result = handler.handle_link(&q, &mut ctx).await;
        assert!(matches!(result, Err(LoginError::AlreadyLinked)));

        let links = store.links();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].user_id, alice.id);
    }
}
