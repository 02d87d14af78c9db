use std::{fmt, str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::config::AggregatorConfig;

const USER_AGENT: &str = "PulsOAuth/1.0";
const CONNECT_ENDPOINT: &str = "connect.php";

/// Social networks reachable through the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Qq,
    Wx,
    Sina,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Qq, Provider::Wx, Provider::Sina];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qq => "qq",
            Self::Wx => "wx",
            Self::Sina => "sina",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported provider `{0}`")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "qq" => Ok(Self::Qq),
            "wx" => Ok(Self::Wx),
            "sina" => Ok(Self::Sina),
            _ => Err(UnknownProvider(input.to_string())),
        }
    }
}

/// Profile returned by the aggregator for an authorization code.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderIdentity {
    pub social_uid: String,
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
    /// Profile fields as returned, minus credentials.
    pub raw: Value,
}

#[async_trait]
pub trait SocialLoginClient: Send + Sync {
    fn authorize_url(&self, provider: Provider, state: &str, redirect_uri: &str) -> Result<Url>;
    async fn exchange_code(&self, provider: Provider, code: &str) -> Result<ProviderIdentity>;
}

pub struct PulsOAuthClient {
    client: Client,
    config: AggregatorConfig,
}

impl PulsOAuthClient {
    pub fn new(config: AggregatorConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> Result<Url> {
        let mut base = self.config.api_url().clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(CONNECT_ENDPOINT)
            .context("invalid aggregator api url")
    }
}

#[async_trait]
impl SocialLoginClient for PulsOAuthClient {
    fn authorize_url(&self, provider: Provider, state: &str, redirect_uri: &str) -> Result<Url> {
        let mut url = self.endpoint()?;
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("act", "login");
            qp.append_pair("type", provider.as_str());
            qp.append_pair("redirect_uri", redirect_uri);
            qp.append_pair("appid", self.config.app_id());
            qp.append_pair("state", state);
        }
        Ok(url)
    }

    async fn exchange_code(&self, provider: Provider, code: &str) -> Result<ProviderIdentity> {
        let body: Value = self
            .client
            .get(self.endpoint()?)
            .query(&[
                ("act", "callback"),
                ("appid", self.config.app_id()),
                ("appkey", self.config.app_key().expose_secret()),
                ("type", provider.as_str()),
                ("code", code),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("failed to parse aggregator callback response")?;

        parse_callback_response(provider, body)
    }
}

fn parse_callback_response(provider: Provider, mut body: Value) -> Result<ProviderIdentity> {
    let status = match body.get("code") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse::<i64>().ok(),
        _ => None,
    };
    if status != Some(0) {
        let detail = body
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        anyhow::bail!("{provider} code exchange failed: {detail}");
    }

    let object = body
        .as_object_mut()
        .ok_or_else(|| anyhow!("{provider} code exchange returned a non-object body"))?;
    object.remove("access_token");

    let social_uid = match object.get("social_uid") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => anyhow::bail!("{provider} code exchange returned no social_uid"),
    };

    let text_field = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let nickname = text_field("nickname");
    let avatar_url = text_field("faceimg").filter(|url| !url.is_empty());

    Ok(ProviderIdentity {
        social_uid,
        nickname,
        avatar_url,
        raw: body,
    })
}
