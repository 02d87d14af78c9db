use std::sync::Arc;

use url::Url;

use crate::{
    auth::{LoginHandler, ResponseFactory, SocialLoginClient},
    config::AuthConfig,
    store::{IdentityStore, SessionStore},
};

#[derive(Clone)]
pub struct AppState {
    config: AuthConfig,
    identities: Arc<dyn IdentityStore>,
    sessions: Arc<dyn SessionStore>,
    login: Arc<LoginHandler>,
    secure_cookies: bool,
}

impl AppState {
    pub fn new(
        config: AuthConfig,
        public_base_url: &Url,
        client: Arc<dyn SocialLoginClient>,
        identities: Arc<dyn IdentityStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let secure_cookies = public_base_url.scheme() == "https";

        let responses = Arc::new(ResponseFactory::new(
            identities.clone(),
            config.remember_cookie(),
            secure_cookies,
            config.locale(),
        ));

        let login = Arc::new(LoginHandler::new(
            client,
            responses,
            identities.clone(),
            config.enabled_providers().to_vec(),
            public_base_url.as_str(),
        ));

        Self {
            config,
            identities,
            sessions,
            login,
            secure_cookies,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn identities(&self) -> Arc<dyn IdentityStore> {
        Arc::clone(&self.identities)
    }

    pub fn sessions(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.sessions)
    }

    pub fn login(&self) -> Arc<LoginHandler> {
        Arc::clone(&self.login)
    }

    pub fn secure_cookies(&self) -> bool {
        self.secure_cookies
    }
}
