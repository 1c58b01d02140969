use crate::models::session::{Provider, ProviderUser, SessionRecord};
use crate::service::oauth::CallbackParams;
use chrono::{DateTime, Utc};
use rocket::FromForm;
use rocket::serde::Serialize;

/// Query string of the provider redirect back to `/auth/<provider>/callback`.
#[derive(FromForm, Debug, Default)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    #[field(name = "error")]
    pub oauth_error: Option<String>,
    pub error_description: Option<String>,
}

impl From<CallbackQuery> for CallbackParams {
    fn from(query: CallbackQuery) -> Self {
        Self {
            code: query.code.filter(|code| !code.is_empty()),
            state: query.state.filter(|state| !state.is_empty()),
            error: query.oauth_error,
            error_description: query.error_description,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ProviderUserResponse {
    pub id: String,
    pub username: String,
    pub name: Option<String>,
}

impl From<&ProviderUser> for ProviderUserResponse {
    fn from(user: &ProviderUser) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            name: user.name.clone(),
        }
    }
}

/// Connection state of one provider for the calling session. Never carries tokens.
#[derive(Serialize, Debug)]
pub struct ConnectionStatusResponse {
    pub provider: Provider,
    pub connected: bool,
    /// An authorization attempt for this provider is still waiting for its callback.
    pub pending: bool,
    pub user: Option<ProviderUserResponse>,
}

impl ConnectionStatusResponse {
    pub fn for_session(provider: Provider, session: Option<&SessionRecord>) -> Self {
        let Some(session) = session else {
            return Self {
                provider,
                connected: false,
                pending: false,
                user: None,
            };
        };

        let user = session
            .provider_user
            .as_ref()
            .filter(|user| user.provider == provider)
            .map(ProviderUserResponse::from);

        Self {
            provider,
            connected: session.is_connected_to(provider),
            pending: session.oauth_state.as_ref().is_some_and(|state| state.provider == provider),
            user,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct SessionSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pending_provider: Option<Provider>,
    pub connected_provider: Option<Provider>,
    pub username: Option<String>,
}

impl From<&SessionRecord> for SessionSummary {
    fn from(record: &SessionRecord) -> Self {
        Self {
            id: record.id.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            pending_provider: record.oauth_state.as_ref().map(|state| state.provider),
            connected_provider: record.provider_tokens.as_ref().map(|tokens| tokens.provider),
            username: record.provider_user.as_ref().map(|user| user.username.clone()),
        }
    }
}
