// src/service/oauth.rs

use crate::config::{Config, RedirectConfig};
use crate::models::session::{OAuthState, Provider, ProviderUser, UnknownProvider};
use crate::pkce::{generate_code_challenge, generate_code_verifier, generate_state};
use crate::service::provider::{ProviderError, ProviderRegistry};
use crate::store::session::{AttemptClaim, SessionStore, short_id};
use chrono::Utc;
use rocket::http::uri::Origin;
use thiserror::Error;
use tracing::{info, warn};

/// Terminal failures of a connect attempt. Each maps to the reason code sent to the browser.
#[derive(Debug, Clone, Error)]
pub enum CallbackFailure {
    #[error("Could not build the authorization URL: {0}")]
    AuthGenerationFailed(ProviderError),
    #[error("Provider reported an error: {0}")]
    OAuthError(String),
    #[error("Callback is missing the code or state parameter")]
    InvalidCallback,
    #[error("{0}")]
    UnknownProvider(UnknownProvider),
    #[error("No session matches this authorization attempt")]
    InvalidState,
    #[error("Authorization state does not match")]
    StateMismatch,
    #[error("Authorization attempt expired, please try again")]
    StateExpired,
    #[error("Could not complete the connection: {0}")]
    CallbackProcessingFailed(ProviderError),
}

impl CallbackFailure {
    pub fn code(&self) -> &'static str {
        match self {
            CallbackFailure::AuthGenerationFailed(_) => "auth_generation_failed",
            CallbackFailure::OAuthError(_) => "oauth_error",
            CallbackFailure::InvalidCallback | CallbackFailure::UnknownProvider(_) => "invalid_callback",
            CallbackFailure::InvalidState => "invalid_state",
            CallbackFailure::StateMismatch => "state_mismatch",
            CallbackFailure::StateExpired => "state_expired",
            CallbackFailure::CallbackProcessingFailed(_) => "callback_processing_failed",
        }
    }
}

/// Query parameters of the provider redirect back to us.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug)]
pub struct AuthorizationRedirect {
    pub session_id: String,
    pub url: String,
}

#[derive(Debug)]
pub struct ConnectedAccount {
    pub session_id: String,
    pub user: ProviderUser,
    pub return_to: Option<String>,
}

/// A failed callback, with the session it was resolved to when lookup got that far.
#[derive(Debug)]
pub struct FailedCallback {
    pub session_id: Option<String>,
    pub failure: CallbackFailure,
}

pub struct OAuthService<'a> {
    pub store: &'a SessionStore,
    pub providers: &'a ProviderRegistry,
    pub config: &'a Config,
}

impl<'a> OAuthService<'a> {
    pub fn new(store: &'a SessionStore, providers: &'a ProviderRegistry, config: &'a Config) -> Self {
        Self { store, providers, config }
    }

    /// Starts a connect attempt and returns the provider URL to send the browser to.
    pub async fn begin(&self, provider: Provider, cookie_session: Option<&str>, return_to: Option<&str>) -> Result<AuthorizationRedirect, CallbackFailure> {
        let client = self.providers.get(provider).map_err(CallbackFailure::AuthGenerationFailed)?;

        let state = generate_state();
        let code_verifier = generate_code_verifier();
        let url = client
            .authorization_url(&state, &generate_code_challenge(&code_verifier))
            .map_err(CallbackFailure::AuthGenerationFailed)?;

        let session = match cookie_session {
            Some(id) => self.store.get_or_create_forced(id).await,
            None => self.store.get_or_create(None).await,
        };

        let return_to = return_to.and_then(|path| {
            let sanitized = sanitize_return_to(path);
            if sanitized.is_none() {
                warn!(%provider, return_to = %path, "ignoring unsafe return_to");
            }
            sanitized
        });

        self.store
            .set_oauth_state(
                &session.id,
                OAuthState {
                    state,
                    code_verifier,
                    provider,
                    created_at: Utc::now(),
                    return_to,
                },
            )
            .await;

        info!(%provider, session_id = %short_id(&session.id), "oauth attempt initiated");

        Ok(AuthorizationRedirect { session_id: session.id, url })
    }

    /// Resolves a provider callback to a connected account or a terminal failure.
    pub async fn complete(&self, provider: Provider, cookie_session: Option<&str>, params: CallbackParams) -> Result<ConnectedAccount, FailedCallback> {
        if let Some(error) = params.error {
            let message = params.error_description.unwrap_or(error);
            return Err(FailedCallback {
                session_id: None,
                failure: CallbackFailure::OAuthError(message),
            });
        }

        let (Some(code), Some(callback_state)) = (params.code, params.state) else {
            return Err(FailedCallback {
                session_id: None,
                failure: CallbackFailure::InvalidCallback,
            });
        };

        let (session_id, pending) = match self.store.take_oauth_attempt(cookie_session, &callback_state, provider).await {
            AttemptClaim::Claimed { session_id, attempt } => (session_id, attempt),
            AttemptClaim::Mismatch { session_id } => {
                return Err(FailedCallback {
                    session_id: Some(session_id),
                    failure: CallbackFailure::StateMismatch,
                });
            }
            AttemptClaim::Unknown => {
                return Err(FailedCallback {
                    session_id: None,
                    failure: CallbackFailure::InvalidState,
                });
            }
        };

        match self.finish(provider, &session_id, &pending, &code).await {
            Ok(user) => {
                info!(%provider, session_id = %short_id(&session_id), username = %user.username, "oauth attempt completed");
                Ok(ConnectedAccount {
                    session_id,
                    user,
                    return_to: pending.return_to,
                })
            }
            Err(failure) => Err(FailedCallback {
                session_id: Some(session_id),
                failure,
            }),
        }
    }

    /// Runs on an attempt already claimed from the store. Nothing is written unless the
    /// exchange and the profile step both succeed.
    async fn finish(&self, provider: Provider, session_id: &str, pending: &OAuthState, code: &str) -> Result<ProviderUser, CallbackFailure> {
        let max_age = chrono::Duration::seconds(self.config.session.oauth_state_ttl_seconds);
        if pending.age(Utc::now()) > max_age {
            return Err(CallbackFailure::StateExpired);
        }

        let client = self.providers.get(provider).map_err(CallbackFailure::CallbackProcessingFailed)?;
        let tokens = client
            .exchange_code(code, &pending.code_verifier)
            .await
            .map_err(CallbackFailure::CallbackProcessingFailed)?;

        let user = match client.fetch_user(&tokens).await {
            Ok(user) => user,
            Err(e) if e.is_recoverable() => {
                warn!(%provider, error = %e, "profile lookup refused, storing placeholder identity");
                ProviderUser::placeholder(provider)
            }
            Err(e) => return Err(CallbackFailure::CallbackProcessingFailed(e)),
        };

        self.store.set_provider_tokens(session_id, tokens).await;
        self.store.set_provider_user(session_id, user.clone()).await;

        Ok(user)
    }
}

/// Accepts only same-site absolute paths that parse as origin-form URIs.
pub fn sanitize_return_to(path: &str) -> Option<String> {
    let path = path.trim();
    let safe = path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') && !path.contains("://");
    (safe && Origin::parse(path).is_ok()).then(|| path.to_string())
}

/// Browser destination after a successful connect.
pub fn success_redirect_url(config: &RedirectConfig, provider: Provider, account: &ConnectedAccount) -> String {
    let path = account.return_to.as_deref().unwrap_or(&config.success_path);
    let separator = if path.contains('?') { '&' } else { '?' };
    format!(
        "{}{}{}success=true&provider={}&username={}",
        config.base_url.trim_end_matches('/'),
        path,
        separator,
        provider,
        urlencoding::encode(&account.user.username)
    )
}

/// Browser destination for any terminal failure.
pub fn error_redirect_url(config: &RedirectConfig, failure: &CallbackFailure) -> String {
    format!(
        "{}{}?error={}&message={}",
        config.base_url.trim_end_matches('/'),
        config.error_path,
        failure.code(),
        urlencoding::encode(&failure.to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockProviderClient, ProfileBehavior, registry_with, test_config};
    use std::sync::Arc;

    struct Fixture {
        store: SessionStore,
        providers: ProviderRegistry,
        config: Config,
    }

    impl Fixture {
        fn new(client: MockProviderClient) -> Self {
            let config = test_config();
            Self {
                store: SessionStore::new(&config.session),
                providers: registry_with(vec![Arc::new(client)]),
                config,
            }
        }

        fn service(&self) -> OAuthService<'_> {
            OAuthService::new(&self.store, &self.providers, &self.config)
        }
    }

    fn callback(code: &str, state: &str) -> CallbackParams {
        CallbackParams {
            code: Some(code.to_string()),
            state: Some(state.to_string()),
            ..CallbackParams::default()
        }
    }

    #[rocket::async_test]
    async fn begin_stores_state_under_cookie_session() {
        let fixture = Fixture::new(MockProviderClient::new(Provider::Twitter));
        let redirect = fixture.service().begin(Provider::Twitter, Some("cookie-id"), Some("/onboarding")).await.expect("url generated");

        assert_eq!(redirect.session_id, "cookie-id");
        let pending = fixture.store.get_oauth_state("cookie-id").await.expect("state attached");
        assert!(redirect.url.contains(&format!("state={}", pending.state)));
        assert_eq!(pending.return_to.as_deref(), Some("/onboarding"));
        assert_eq!(pending.provider, Provider::Twitter);
    }

    #[rocket::async_test]
    async fn begin_without_cookie_creates_session() {
        let fixture = Fixture::new(MockProviderClient::new(Provider::Twitter));
        let redirect = fixture.service().begin(Provider::Twitter, None, None).await.expect("url generated");
        assert_eq!(redirect.session_id.len(), 64);
        assert!(fixture.store.get_oauth_state(&redirect.session_id).await.is_some());
    }

    #[rocket::async_test]
    async fn begin_drops_unsafe_return_to() {
        let fixture = Fixture::new(MockProviderClient::new(Provider::Twitter));
        let redirect = fixture.service().begin(Provider::Twitter, None, Some("https://evil.example")).await.expect("url generated");
        let pending = fixture.store.get_oauth_state(&redirect.session_id).await.expect("state attached");
        assert!(pending.return_to.is_none());
    }

    #[rocket::async_test]
    async fn begin_fails_fast_without_credentials() {
        let fixture = Fixture::new(MockProviderClient::new(Provider::Twitter).unconfigured());
        let failure = fixture.service().begin(Provider::Twitter, None, None).await.expect_err("not configured");
        assert_eq!(failure.code(), "auth_generation_failed");
        assert_eq!(fixture.store.len().await, 0);
    }

    #[rocket::async_test]
    async fn begin_for_unregistered_provider_fails() {
        let fixture = Fixture::new(MockProviderClient::new(Provider::Twitter));
        let failure = fixture.service().begin(Provider::Reddit, None, None).await.expect_err("no reddit client");
        assert_eq!(failure.code(), "auth_generation_failed");
    }

    #[rocket::async_test]
    async fn complete_with_cookie_connects_and_clears_state() {
        let fixture = Fixture::new(MockProviderClient::new(Provider::Twitter));
        let redirect = fixture.service().begin(Provider::Twitter, Some("s1"), Some("/onboarding?step=2")).await.expect("url generated");
        let pending = fixture.store.get_oauth_state(&redirect.session_id).await.expect("state attached");

        let account = fixture
            .service()
            .complete(Provider::Twitter, Some("s1"), callback("code-1", &pending.state))
            .await
            .expect("connected");

        assert_eq!(account.session_id, "s1");
        assert_eq!(account.user.username, "mock_twitter");
        assert_eq!(account.return_to.as_deref(), Some("/onboarding?step=2"));

        let record = fixture.store.get("s1").await.expect("session kept");
        assert!(record.oauth_state.is_none());
        assert!(record.is_connected_to(Provider::Twitter));
        assert_eq!(record.provider_tokens.map(|t| t.access_token), Some("access-code-1".to_string()));
    }

    #[rocket::async_test]
    async fn complete_without_cookie_recovers_session_by_state() {
        let fixture = Fixture::new(MockProviderClient::new(Provider::Twitter));
        fixture
            .store
            .set_oauth_state(
                "session-a",
                OAuthState {
                    state: "xyz".to_string(),
                    code_verifier: "v1".to_string(),
                    provider: Provider::Twitter,
                    created_at: Utc::now(),
                    return_to: None,
                },
            )
            .await;

        let account = fixture.service().complete(Provider::Twitter, None, callback("c", "xyz")).await.expect("connected");
        assert_eq!(account.session_id, "session-a");
        assert!(fixture.store.get_oauth_state("session-a").await.is_none());
        assert!(fixture.store.get("session-a").await.is_some());
    }

    #[rocket::async_test]
    async fn stale_cookie_falls_back_to_state_lookup() {
        let fixture = Fixture::new(MockProviderClient::new(Provider::Twitter));
        let redirect = fixture.service().begin(Provider::Twitter, None, None).await.expect("url generated");
        let pending = fixture.store.get_oauth_state(&redirect.session_id).await.expect("state attached");

        let account = fixture
            .service()
            .complete(Provider::Twitter, Some("unrelated-cookie"), callback("c", &pending.state))
            .await
            .expect("connected");
        assert_eq!(account.session_id, redirect.session_id);
    }

    #[rocket::async_test]
    async fn provider_error_is_reported() {
        let fixture = Fixture::new(MockProviderClient::new(Provider::Twitter));
        let params = CallbackParams {
            error: Some("access_denied".to_string()),
            ..CallbackParams::default()
        };
        let failed = fixture.service().complete(Provider::Twitter, None, params).await.expect_err("provider error");
        assert_eq!(failed.failure.code(), "oauth_error");
        assert!(failed.failure.to_string().contains("access_denied"));
    }

    #[rocket::async_test]
    async fn missing_code_is_invalid_callback() {
        let fixture = Fixture::new(MockProviderClient::new(Provider::Twitter));
        let params = CallbackParams {
            state: Some("xyz".to_string()),
            ..CallbackParams::default()
        };
        let failed = fixture.service().complete(Provider::Twitter, None, params).await.expect_err("missing code");
        assert_eq!(failed.failure.code(), "invalid_callback");
    }

    #[rocket::async_test]
    async fn unknown_state_is_invalid_state() {
        let fixture = Fixture::new(MockProviderClient::new(Provider::Twitter));
        let failed = fixture.service().complete(Provider::Twitter, None, callback("c", "nope")).await.expect_err("no session");
        assert_eq!(failed.failure.code(), "invalid_state");
        assert!(failed.session_id.is_none());
    }

    #[rocket::async_test]
    async fn cookie_session_with_other_state_is_mismatch() {
        let fixture = Fixture::new(MockProviderClient::new(Provider::Twitter));
        fixture.service().begin(Provider::Twitter, Some("s1"), None).await.expect("url generated");

        let failed = fixture
            .service()
            .complete(Provider::Twitter, Some("s1"), callback("c", "forged-state"))
            .await
            .expect_err("mismatch");
        assert_eq!(failed.failure.code(), "state_mismatch");
        assert_eq!(failed.session_id.as_deref(), Some("s1"));

        // A forged callback must not cancel the attempt that is still in flight.
        let pending = fixture.store.get_oauth_state("s1").await.expect("attempt kept");
        fixture
            .service()
            .complete(Provider::Twitter, Some("s1"), callback("c", &pending.state))
            .await
            .expect("genuine callback still completes");
    }

    #[rocket::async_test]
    async fn callback_for_other_provider_is_mismatch() {
        let fixture = Fixture::new(MockProviderClient::new(Provider::Twitter));
        let redirect = fixture.service().begin(Provider::Twitter, None, None).await.expect("url generated");
        let pending = fixture.store.get_oauth_state(&redirect.session_id).await.expect("state attached");

        let failed = fixture
            .service()
            .complete(Provider::Reddit, None, callback("c", &pending.state))
            .await
            .expect_err("wrong provider");
        assert_eq!(failed.failure.code(), "state_mismatch");
        assert!(fixture.store.get_oauth_state(&redirect.session_id).await.is_some());
    }

    #[rocket::async_test]
    async fn attempt_older_than_attempt_ttl_expires_while_session_lives() {
        let fixture = Fixture::new(MockProviderClient::new(Provider::Twitter));
        fixture
            .store
            .set_oauth_state(
                "s1",
                OAuthState {
                    state: "old".to_string(),
                    code_verifier: "v".to_string(),
                    provider: Provider::Twitter,
                    created_at: Utc::now() - chrono::Duration::minutes(11),
                    return_to: None,
                },
            )
            .await;

        // The parent session was just written, so it is well inside the session TTL.
        assert!(fixture.store.get("s1").await.is_some());

        let failed = fixture.service().complete(Provider::Twitter, Some("s1"), callback("c", "old")).await.expect_err("expired");
        assert_eq!(failed.failure.code(), "state_expired");
        assert_eq!(failed.session_id.as_deref(), Some("s1"));
        assert!(fixture.store.get("s1").await.is_some());
        assert!(fixture.store.get_oauth_state("s1").await.is_none());
    }

    #[rocket::async_test]
    async fn rate_limited_profile_stores_placeholder() {
        let fixture = Fixture::new(MockProviderClient::new(Provider::Twitter).with_profile(ProfileBehavior::RateLimited));
        let redirect = fixture.service().begin(Provider::Twitter, None, None).await.expect("url generated");
        let pending = fixture.store.get_oauth_state(&redirect.session_id).await.expect("state attached");

        let account = fixture
            .service()
            .complete(Provider::Twitter, None, callback("c", &pending.state))
            .await
            .expect("placeholder identity is not a failure");
        assert_eq!(account.user, ProviderUser::placeholder(Provider::Twitter));

        let record = fixture.store.get(&redirect.session_id).await.expect("session kept");
        assert_eq!(record.provider_user, Some(ProviderUser::placeholder(Provider::Twitter)));
    }

    #[rocket::async_test]
    async fn broken_profile_fails_processing() {
        let fixture = Fixture::new(MockProviderClient::new(Provider::Twitter).with_profile(ProfileBehavior::Broken));
        let redirect = fixture.service().begin(Provider::Twitter, None, None).await.expect("url generated");
        let pending = fixture.store.get_oauth_state(&redirect.session_id).await.expect("state attached");

        let failed = fixture.service().complete(Provider::Twitter, None, callback("c", &pending.state)).await.expect_err("profile broken");
        assert_eq!(failed.failure.code(), "callback_processing_failed");

        let record = fixture.store.get(&redirect.session_id).await.expect("session kept");
        assert!(!record.is_connected_to(Provider::Twitter));
        assert!(record.provider_tokens.is_none());
        assert!(record.oauth_state.is_none());
    }

    #[rocket::async_test]
    async fn exchange_failure_preserves_message() {
        let fixture = Fixture::new(MockProviderClient::new(Provider::Twitter).failing_exchange("invalid_grant"));
        let redirect = fixture.service().begin(Provider::Twitter, None, None).await.expect("url generated");
        let pending = fixture.store.get_oauth_state(&redirect.session_id).await.expect("state attached");

        let failed = fixture.service().complete(Provider::Twitter, None, callback("c", &pending.state)).await.expect_err("exchange failed");
        assert_eq!(failed.failure.code(), "callback_processing_failed");
        assert!(failed.failure.to_string().contains("invalid_grant"));
        assert!(fixture.store.get_oauth_state(&redirect.session_id).await.is_none());
    }

    #[rocket::async_test]
    async fn replayed_callback_is_rejected() {
        let fixture = Fixture::new(MockProviderClient::new(Provider::Twitter));
        let redirect = fixture.service().begin(Provider::Twitter, None, None).await.expect("url generated");
        let pending = fixture.store.get_oauth_state(&redirect.session_id).await.expect("state attached");

        fixture.service().complete(Provider::Twitter, None, callback("c", &pending.state)).await.expect("first callback");
        let failed = fixture.service().complete(Provider::Twitter, None, callback("c", &pending.state)).await.expect_err("replay");
        assert_eq!(failed.failure.code(), "invalid_state");
    }

    #[rocket::async_test]
    async fn concurrent_callbacks_with_same_state_connect_once() {
        let fixture = Fixture::new(MockProviderClient::new(Provider::Twitter));
        let redirect = fixture.service().begin(Provider::Twitter, None, None).await.expect("url generated");
        let pending = fixture.store.get_oauth_state(&redirect.session_id).await.expect("state attached");

        let service = fixture.service();
        let (first, second) = tokio::join!(
            service.complete(Provider::Twitter, None, callback("c1", &pending.state)),
            service.complete(Provider::Twitter, None, callback("c2", &pending.state)),
        );

        let outcomes = [first.is_ok(), second.is_ok()];
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
        let rejected = first.err().or(second.err()).expect("one callback rejected");
        assert_eq!(rejected.failure.code(), "invalid_state");
    }

    #[test]
    fn unknown_provider_maps_to_invalid_callback() {
        let failure = CallbackFailure::UnknownProvider(UnknownProvider("myspace".to_string()));
        assert_eq!(failure.code(), "invalid_callback");
        assert_eq!(failure.to_string(), "Unknown provider: myspace");
    }

    #[test]
    fn return_to_must_be_local_path() {
        assert_eq!(sanitize_return_to("/onboarding"), Some("/onboarding".to_string()));
        assert_eq!(sanitize_return_to("//evil.example"), None);
        assert_eq!(sanitize_return_to("https://evil.example"), None);
        assert_eq!(sanitize_return_to("/\\evil.example"), None);
        assert_eq!(sanitize_return_to("relative"), None);
        assert_eq!(sanitize_return_to("/on boarding"), None);
        assert_eq!(sanitize_return_to("/onboarding?step=2"), Some("/onboarding?step=2".to_string()));
    }

    #[test]
    fn redirect_urls_carry_reason_and_identity() {
        let config = RedirectConfig {
            base_url: "https://app.example.com/".to_string(),
            ..RedirectConfig::default()
        };

        let error = error_redirect_url(&config, &CallbackFailure::StateExpired);
        assert!(error.starts_with("https://app.example.com/error-destination?error=state_expired&message="));

        let account = ConnectedAccount {
            session_id: "s".to_string(),
            user: ProviderUser {
                provider: Provider::Twitter,
                id: "1".to_string(),
                username: "nest bird".to_string(),
                name: None,
            },
            return_to: None,
        };
        assert_eq!(
            success_redirect_url(&config, Provider::Twitter, &account),
            "https://app.example.com/success-destination?success=true&provider=twitter&username=nest%20bird"
        );

        let resumed = ConnectedAccount {
            return_to: Some("/onboarding?step=2".to_string()),
            ..account
        };
        assert!(success_redirect_url(&config, Provider::Twitter, &resumed).starts_with("https://app.example.com/onboarding?step=2&success=true"));
    }
}
