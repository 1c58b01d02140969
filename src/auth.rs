use crate::config::{Config, DEFAULT_SESSION_COOKIE_NAME, SessionConfig};
use rocket::http::{Cookie, SameSite};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::time::Duration;

/// Session id carried by the `session-id` cookie, if the browser sent one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie(pub Option<String>);

impl SessionCookie {
    pub fn id(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

pub(crate) fn parse_session_cookie_value(value: &str) -> Option<String> {
    let value = value.trim();
    let valid = !value.is_empty() && value.len() <= 128 && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then(|| value.to_string())
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SessionCookie {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let cookie_name = req
            .rocket()
            .state::<Config>()
            .map(|config| config.session.cookie_name.as_str())
            .unwrap_or(DEFAULT_SESSION_COOKIE_NAME);

        let id = req.cookies().get(cookie_name).and_then(|cookie| parse_session_cookie_value(cookie.value()));
        Outcome::Success(SessionCookie(id))
    }
}

/// `HttpOnly; Secure; SameSite=None; Path=/` so the cookie survives the cross-site provider redirect.
pub(crate) fn session_cookie(config: &SessionConfig, session_id: &str) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), session_id.to_string()))
        .path("/")
        .http_only(true)
        .secure(config.cookie_secure)
        .same_site(SameSite::None)
        .max_age(Duration::seconds(config.cookie_max_age_seconds))
        .build()
}
