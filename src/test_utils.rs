use crate::config::Config;
use crate::models::session::{Provider, ProviderTokens, ProviderUser};
use crate::service::provider::{OAuthProviderClient, ProviderError, ProviderRegistry};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub enum ProfileBehavior {
    Ok,
    RateLimited,
    Forbidden,
    Broken,
}

/// Provider client that never leaves the process.
#[derive(Debug, Clone)]
pub struct MockProviderClient {
    provider: Provider,
    configured: bool,
    exchange_error: Option<String>,
    profile: ProfileBehavior,
}

impl MockProviderClient {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            configured: true,
            exchange_error: None,
            profile: ProfileBehavior::Ok,
        }
    }

    pub fn unconfigured(mut self) -> Self {
        self.configured = false;
        self
    }

    pub fn failing_exchange(mut self, message: &str) -> Self {
        self.exchange_error = Some(message.to_string());
        self
    }

    pub fn with_profile(mut self, profile: ProfileBehavior) -> Self {
        self.profile = profile;
        self
    }
}

#[async_trait]
impl OAuthProviderClient for MockProviderClient {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn authorization_url(&self, state: &str, code_challenge: &str) -> Result<String, ProviderError> {
        if !self.configured {
            return Err(ProviderError::NotConfigured(self.provider));
        }
        Ok(format!(
            "https://auth.example.com/{}/authorize?state={}&code_challenge={}",
            self.provider, state, code_challenge
        ))
    }

    async fn exchange_code(&self, code: &str, _code_verifier: &str) -> Result<ProviderTokens, ProviderError> {
        if let Some(message) = &self.exchange_error {
            return Err(ProviderError::TokenExchange(message.clone()));
        }
        Ok(ProviderTokens {
            provider: self.provider,
            access_token: format!("access-{code}"),
            refresh_token: Some(format!("refresh-{code}")),
            expires_at: None,
            scope: None,
        })
    }

    async fn fetch_user(&self, _tokens: &ProviderTokens) -> Result<ProviderUser, ProviderError> {
        match self.profile {
            ProfileBehavior::Ok => Ok(ProviderUser {
                provider: self.provider,
                id: "1001".to_string(),
                username: format!("mock_{}", self.provider),
                name: Some("Mock User".to_string()),
            }),
            ProfileBehavior::RateLimited => Err(ProviderError::RateLimited(self.provider)),
            ProfileBehavior::Forbidden => Err(ProviderError::Forbidden(self.provider)),
            ProfileBehavior::Broken => Err(ProviderError::Profile("500: upstream exploded".to_string())),
        }
    }
}

pub fn registry_with(clients: Vec<Arc<dyn OAuthProviderClient>>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::default();
    for client in clients {
        registry.register(client);
    }
    registry
}

pub fn mock_registry() -> ProviderRegistry {
    registry_with(vec![
        Arc::new(MockProviderClient::new(Provider::Twitter)),
        Arc::new(MockProviderClient::new(Provider::Reddit).with_profile(ProfileBehavior::Forbidden)),
    ])
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.redirect.base_url = "https://app.example.com".to_string();
    config.api.enable_diagnostics = true;
    config
}
