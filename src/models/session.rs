use chrono::{DateTime, Utc};
use rocket::request::FromParam;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Third-party service a session can be connected to.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Twitter,
    Reddit,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Twitter, Provider::Reddit];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Twitter => "twitter",
            Provider::Reddit => "reddit",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "twitter" | "x" => Ok(Provider::Twitter),
            "reddit" => Ok(Provider::Reddit),
            _ => Err(UnknownProvider(value.to_string())),
        }
    }
}

impl<'a> FromParam<'a> for Provider {
    type Error = UnknownProvider;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        param.parse()
    }
}

/// An authorization attempt waiting for the provider's redirect back.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OAuthState {
    pub state: String,
    pub code_verifier: String,
    pub provider: Provider,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub return_to: Option<String>,
}

impl OAuthState {
    /// Age of the attempt relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProviderTokens {
    pub provider: Provider,
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
}

/// Minimal identity snapshot, cached so rate-limited profile endpoints are hit once per connect.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProviderUser {
    pub provider: Provider,
    pub id: String,
    pub username: String,
    pub name: Option<String>,
}

impl ProviderUser {
    /// Identity stored when the profile endpoint refuses us (rate limit, forbidden).
    pub fn placeholder(provider: Provider) -> Self {
        Self {
            provider,
            id: "unknown".to_string(),
            username: format!("{}_user", provider),
            name: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    pub oauth_state: Option<OAuthState>,
    pub provider_tokens: Option<ProviderTokens>,
    pub provider_user: Option<ProviderUser>,
}

impl SessionRecord {
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            oauth_state: None,
            provider_tokens: None,
            provider_user: None,
        }
    }

    pub fn is_connected_to(&self, provider: Provider) -> bool {
        self.provider_tokens.as_ref().is_some_and(|tokens| tokens.provider == provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parses_case_insensitively() {
        assert_eq!("Twitter".parse::<Provider>(), Ok(Provider::Twitter));
        assert_eq!("x".parse::<Provider>(), Ok(Provider::Twitter));
        assert_eq!("reddit".parse::<Provider>(), Ok(Provider::Reddit));
        assert!("gemini".parse::<Provider>().is_err());
    }

    #[test]
    fn session_record_serializes_timestamps_as_millis() {
        let now = DateTime::from_timestamp_millis(1_700_000_000_123).expect("valid timestamp");
        let record = SessionRecord::new("abc", now);
        let json = serde_json::to_value(&record).expect("serializable");
        assert_eq!(json["created_at"], 1_700_000_000_123_i64);
        assert_eq!(json["updated_at"], 1_700_000_000_123_i64);
        assert!(json["oauth_state"].is_null());
    }

    #[test]
    fn placeholder_user_is_tagged_with_provider() {
        let user = ProviderUser::placeholder(Provider::Reddit);
        assert_eq!(user.provider, Provider::Reddit);
        assert_eq!(user.username, "reddit_user");
    }
}
