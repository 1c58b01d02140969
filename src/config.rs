use crate::models::session::Provider;
use rocket::figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE_PATH: &str = "/api";
pub const DEFAULT_SESSION_COOKIE_NAME: &str = "session-id";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub cors: CorsConfig,
    pub api: ApiConfig,
    pub session: SessionConfig,
    pub redirect: RedirectConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub address: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    pub base_path: String,
    /// Mounts `GET /sessions`, which lists every live session.
    pub enable_diagnostics: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// Overall session liveness, measured from the last mutation.
    pub ttl_seconds: i64,
    /// Maximum age of an in-flight authorization attempt at callback time.
    pub oauth_state_ttl_seconds: i64,
    pub cleanup_interval_seconds: u64,
    pub cookie_name: String,
    pub cookie_max_age_seconds: i64,
    pub cookie_secure: bool,
}

/// Where the browser lands after a connect attempt finishes.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RedirectConfig {
    pub base_url: String,
    pub success_path: String,
    pub error_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub twitter: ProviderConfig,
    pub reddit: ProviderConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
    pub user_info_url: String,
    pub scopes: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            address: "127.0.0.1".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            allow_credentials: true,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_API_BASE_PATH.to_string(),
            enable_diagnostics: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 24 * 60 * 60,
            oauth_state_ttl_seconds: 10 * 60,
            cleanup_interval_seconds: 5 * 60,
            cookie_name: DEFAULT_SESSION_COOKIE_NAME.to_string(),
            cookie_max_age_seconds: 24 * 60 * 60,
            cookie_secure: true,
        }
    }
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            success_path: "/success-destination".to_string(),
            error_path: "/error-destination".to_string(),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            twitter: ProviderConfig::defaults_for(Provider::Twitter),
            reddit: ProviderConfig::defaults_for(Provider::Reddit),
        }
    }
}

impl ProviderConfig {
    /// Public endpoints for a provider with empty credentials.
    pub fn defaults_for(provider: Provider) -> Self {
        let (auth_url, token_url, user_info_url, scopes): (&str, &str, &str, &[&str]) = match provider {
            Provider::Twitter => (
                "https://twitter.com/i/oauth2/authorize",
                "https://api.twitter.com/2/oauth2/token",
                "https://api.twitter.com/2/users/me",
                &["tweet.read", "tweet.write", "users.read", "offline.access"],
            ),
            Provider::Reddit => (
                "https://www.reddit.com/api/v1/authorize",
                "https://www.reddit.com/api/v1/access_token",
                "https://oauth.reddit.com/api/v1/me",
                &["identity", "read", "submit"],
            ),
        };

        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: format!("http://localhost:8000/api/auth/{}/callback", provider),
            auth_url: auth_url.to_string(),
            token_url: token_url.to_string(),
            user_info_url: user_info_url.to_string(),
            scopes: scopes.iter().map(|scope| scope.to_string()).collect(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

impl ProvidersConfig {
    pub fn get(&self, provider: Provider) -> &ProviderConfig {
        match provider {
            Provider::Twitter => &self.twitter,
            Provider::Reddit => &self.reddit,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources in priority order:
    /// 1. Built-in defaults
    /// 2. SocialNest.toml (optional)
    /// 3. Environment variables prefixed with SOCIALNEST_, nested with `__`
    ///    (e.g. SOCIALNEST_SESSION__TTL_SECONDS)
    /// 4. Provider credential variables without prefix (TWITTER_CLIENT_ID, ...)
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("SocialNest.toml").nested())
            .merge(Env::prefixed("SOCIALNEST_").split("__"))
            .merge(Env::raw().only(&["TWITTER_CLIENT_ID"]).map(|_| "providers.twitter.client_id".into()))
            .merge(Env::raw().only(&["TWITTER_CLIENT_SECRET"]).map(|_| "providers.twitter.client_secret".into()))
            .merge(Env::raw().only(&["TWITTER_REDIRECT_URI"]).map(|_| "providers.twitter.redirect_uri".into()))
            .merge(Env::raw().only(&["REDDIT_CLIENT_ID"]).map(|_| "providers.reddit.client_id".into()))
            .merge(Env::raw().only(&["REDDIT_CLIENT_SECRET"]).map(|_| "providers.reddit.client_secret".into()))
            .merge(Env::raw().only(&["REDDIT_REDIRECT_URI"]).map(|_| "providers.reddit.redirect_uri".into()))
            .merge(Env::raw().only(&["APP_BASE_URL"]).map(|_| "redirect.base_url".into()))
    }
}
