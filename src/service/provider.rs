//! OAuth 2.0 provider clients: authorization URL, code exchange and a minimal profile lookup.
//!
//! Response bodies are parsed into provider-specific structs; nothing is passed around as
//! untyped JSON.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::config::{ProviderConfig, ProvidersConfig};
use crate::models::session::{Provider, ProviderTokens, ProviderUser};

const USER_AGENT: &str = concat!("socialnest/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("{0} client credentials are not configured")]
    NotConfigured(Provider),
    #[error("{0} rate limit reached")]
    RateLimited(Provider),
    #[error("{0} refused the request")]
    Forbidden(Provider),
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
    #[error("profile request failed: {0}")]
    Profile(String),
}

impl ProviderError {
    /// Errors a best-effort profile fetch may swallow.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_) | ProviderError::Forbidden(_))
    }
}

#[async_trait]
pub trait OAuthProviderClient: Send + Sync {
    fn provider(&self) -> Provider;

    fn authorization_url(&self, state: &str, code_challenge: &str) -> Result<String, ProviderError>;

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<ProviderTokens, ProviderError>;

    async fn fetch_user(&self, tokens: &ProviderTokens) -> Result<ProviderUser, ProviderError>;
}

/// Provider clients keyed by provider, managed as Rocket state.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    clients: HashMap<Provider, Arc<dyn OAuthProviderClient>>,
}

impl ProviderRegistry {
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let http = reqwest::Client::new();
        let mut registry = Self::default();
        for provider in Provider::ALL {
            registry.register(Arc::new(HttpProviderClient::new(provider, config.get(provider).clone(), http.clone())));
        }
        registry
    }

    pub fn register(&mut self, client: Arc<dyn OAuthProviderClient>) {
        self.clients.insert(client.provider(), client);
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn OAuthProviderClient>, ProviderError> {
        self.clients.get(&provider).cloned().ok_or(ProviderError::NotConfigured(provider))
    }
}

/// Generic authorization-code + PKCE client driven by [`ProviderConfig`].
pub struct HttpProviderClient {
    provider: Provider,
    config: ProviderConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TwitterUserEnvelope {
    data: TwitterUser,
}

#[derive(Debug, Deserialize)]
struct TwitterUser {
    id: String,
    username: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RedditUser {
    id: String,
    name: String,
}

impl HttpProviderClient {
    pub fn new(provider: Provider, config: ProviderConfig, http: reqwest::Client) -> Self {
        Self { provider, config, http }
    }

    fn ensure_configured(&self) -> Result<(), ProviderError> {
        if self.config.is_configured() {
            Ok(())
        } else {
            Err(ProviderError::NotConfigured(self.provider))
        }
    }

    fn parse_user(&self, body: &str) -> Result<ProviderUser, ProviderError> {
        let unexpected = |e: serde_json::Error| ProviderError::Profile(format!("unexpected response: {e}"));
        match self.provider {
            Provider::Twitter => {
                let envelope: TwitterUserEnvelope = serde_json::from_str(body).map_err(unexpected)?;
                Ok(ProviderUser {
                    provider: self.provider,
                    id: envelope.data.id,
                    username: envelope.data.username,
                    name: envelope.data.name,
                })
            }
            Provider::Reddit => {
                let user: RedditUser = serde_json::from_str(body).map_err(unexpected)?;
                Ok(ProviderUser {
                    provider: self.provider,
                    id: user.id,
                    username: user.name,
                    name: None,
                })
            }
        }
    }
}

#[async_trait]
impl OAuthProviderClient for HttpProviderClient {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn authorization_url(&self, state: &str, code_challenge: &str) -> Result<String, ProviderError> {
        self.ensure_configured()?;

        let mut url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256",
            self.config.auth_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(&self.config.scopes.join(" ")),
            urlencoding::encode(state),
            urlencoding::encode(code_challenge),
        );
        // Reddit only issues refresh tokens for permanent grants.
        if self.provider == Provider::Reddit {
            url.push_str("&duration=permanent");
        }
        Ok(url)
    }

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<ProviderTokens, ProviderError> {
        self.ensure_configured()?;

        let resp = self
            .http
            .post(&self.config.token_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .header("User-Agent", USER_AGENT)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("code_verifier", code_verifier),
                ("client_id", self.config.client_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::TokenExchange(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| ProviderError::TokenExchange(e.to_string()))?;
        if !status.is_success() {
            return Err(ProviderError::TokenExchange(format!("{status}: {body}")));
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|_| ProviderError::TokenExchange(format!("unexpected response: {body}")))?;

        Ok(ProviderTokens {
            provider: self.provider,
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token.expires_in.map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
            scope: token.scope,
        })
    }

    async fn fetch_user(&self, tokens: &ProviderTokens) -> Result<ProviderUser, ProviderError> {
        let resp = self
            .http
            .get(&self.config.user_info_url)
            .bearer_auth(&tokens.access_token)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| ProviderError::Profile(e.to_string()))?;

        match resp.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(ProviderError::RateLimited(self.provider)),
            StatusCode::FORBIDDEN => return Err(ProviderError::Forbidden(self.provider)),
            status if !status.is_success() => {
                let body = resp.text().await.unwrap_or_default();
                return Err(ProviderError::Profile(format!("{status}: {body}")));
            }
            _ => {}
        }

        let body = resp.text().await.map_err(|e| ProviderError::Profile(e.to_string()))?;
        self.parse_user(&body)
    }
}
