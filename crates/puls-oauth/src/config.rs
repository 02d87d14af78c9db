use std::{env, time::Duration};

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use crate::{auth::Provider, locale::Locale};

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8081";
const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:8081";
const DEFAULT_REMEMBER_COOKIE: &str = "puls_remember";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable `{0}` is not set")]
    MissingVar(&'static str),
    #[error("invalid value for environment variable `{0}`")]
    InvalidVar(&'static str),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: Option<String>,
    pub listen_addr: String,
    pub public_base_url: Url,
    pub sentry_dsn: Option<String>,
    pub auth: AuthConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("SERVER_DATABASE_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .ok();

        let listen_addr =
            env::var("SERVER_LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());

        let public_base_url = env::var("SERVER_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_PUBLIC_BASE_URL.to_string());
        let public_base_url = Url::parse(&public_base_url)
            .map_err(|_| ConfigError::InvalidVar("SERVER_PUBLIC_BASE_URL"))?;

        let sentry_dsn = env::var("SENTRY_DSN").ok().filter(|dsn| !dsn.is_empty());

        let auth = AuthConfig::from_env()?;

        Ok(Self {
            database_url,
            listen_addr,
            public_base_url,
            sentry_dsn,
            auth,
        })
    }
}

/// Credentials for the social login aggregator.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    api_url: Url,
    app_id: String,
    app_key: SecretString,
}

impl AggregatorConfig {
    pub fn new(api_url: Url, app_id: impl Into<String>, app_key: SecretString) -> Self {
        Self {
            api_url,
            app_id: app_id.into(),
            app_key,
        }
    }

    fn from_env() -> Result<Self, ConfigError> {
        let api_url =
            env::var("PULS_OAUTH_APPURL").map_err(|_| ConfigError::MissingVar("PULS_OAUTH_APPURL"))?;
        let api_url =
            Url::parse(&api_url).map_err(|_| ConfigError::InvalidVar("PULS_OAUTH_APPURL"))?;

        let app_id =
            env::var("PULS_OAUTH_APPID").map_err(|_| ConfigError::MissingVar("PULS_OAUTH_APPID"))?;
        if app_id.trim().is_empty() {
            return Err(ConfigError::InvalidVar("PULS_OAUTH_APPID"));
        }

        let app_key = env::var("PULS_OAUTH_APPKEY")
            .map_err(|_| ConfigError::MissingVar("PULS_OAUTH_APPKEY"))?;

        Ok(Self::new(api_url, app_id, SecretString::new(app_key.into())))
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn app_key(&self) -> &SecretString {
        &self.app_key
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    aggregator: AggregatorConfig,
    enabled_providers: Vec<Provider>,
    remember_cookie: String,
    locale: Locale,
    http_timeout: Duration,
}

impl AuthConfig {
    pub fn new(aggregator: AggregatorConfig) -> Self {
        Self {
            aggregator,
            enabled_providers: Provider::ALL.to_vec(),
            remember_cookie: DEFAULT_REMEMBER_COOKIE.to_string(),
            locale: Locale::default(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }

    fn from_env() -> Result<Self, ConfigError> {
        let aggregator = AggregatorConfig::from_env()?;

        let enabled_providers = match env::var("PULS_OAUTH_PROVIDERS") {
            Ok(list) => parse_provider_list(&list)?,
            Err(_) => Provider::ALL.to_vec(),
        };

        let remember_cookie = env::var("PULS_OAUTH_REMEMBER_COOKIE")
            .unwrap_or_else(|_| DEFAULT_REMEMBER_COOKIE.to_string());

        let locale = match env::var("PULS_OAUTH_LOCALE") {
            Ok(tag) => tag
                .parse()
                .map_err(|_| ConfigError::InvalidVar("PULS_OAUTH_LOCALE"))?,
            Err(_) => Locale::default(),
        };

        let http_timeout = env::var("PULS_OAUTH_HTTP_TIMEOUT_SECS")
            .ok()
            .map(|v| {
                v.parse::<u64>()
                    .map_err(|_| ConfigError::InvalidVar("PULS_OAUTH_HTTP_TIMEOUT_SECS"))
            })
            .transpose()?
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);

        Ok(Self {
            aggregator,
            enabled_providers,
            remember_cookie,
            locale,
            http_timeout: Duration::from_secs(http_timeout),
        })
    }

    pub fn with_enabled_providers(mut self, providers: Vec<Provider>) -> Self {
        self.enabled_providers = providers;
        self
    }

    pub fn aggregator(&self) -> &AggregatorConfig {
        &self.aggregator
    }

    pub fn enabled_providers(&self) -> &[Provider] {
        &self.enabled_providers
    }

    pub fn is_enabled(&self, provider: Provider) -> bool {
        self.enabled_providers.contains(&provider)
    }

    pub fn remember_cookie(&self) -> &str {
        &self.remember_cookie
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }
}

fn parse_provider_list(list: &str) -> Result<Vec<Provider>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<Provider>()
                .map_err(|_| ConfigError::InvalidVar("PULS_OAUTH_PROVIDERS"))
        })
        .collect()
}
