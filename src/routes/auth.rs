use crate::auth::{SessionCookie, session_cookie};
use crate::config::Config;
use crate::error::app_error::AppError;
use crate::models::auth::{CallbackQuery, ConnectionStatusResponse};
use crate::models::session::{Provider, UnknownProvider};
use crate::service::oauth::{CallbackFailure, OAuthService, error_redirect_url, success_redirect_url};
use crate::service::provider::ProviderRegistry;
use crate::store::session::{SessionStore, short_id};
use rocket::http::CookieJar;
use rocket::response::Redirect;
use rocket::serde::json::Json;
use rocket::{State, get, post, routes};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Start connecting a provider: remember the attempt on the session and send the browser to the provider.
#[get("/<provider>?<return_to>")]
pub async fn connect(
    provider: Result<Provider, UnknownProvider>,
    return_to: Option<String>,
    session: SessionCookie,
    cookies: &CookieJar<'_>,
    store: &State<Arc<SessionStore>>,
    providers: &State<ProviderRegistry>,
    config: &State<Config>,
) -> Result<Redirect, AppError> {
    let provider = provider?;
    let service = OAuthService::new(store.inner().as_ref(), providers.inner(), config.inner());

    match service.begin(provider, session.id(), return_to.as_deref()).await {
        Ok(redirect) => {
            cookies.add(session_cookie(&config.session, &redirect.session_id));
            Ok(Redirect::to(redirect.url))
        }
        Err(failure) => {
            error!(%provider, error = %failure, reason = failure.code(), "failed to start oauth attempt");
            Ok(Redirect::to(error_redirect_url(&config.redirect, &failure)))
        }
    }
}

/// Provider redirect target. Always answers with a redirect to the dashboard.
#[get("/<provider>/callback?<query..>")]
pub async fn callback(
    provider: Result<Provider, UnknownProvider>,
    query: CallbackQuery,
    session: SessionCookie,
    cookies: &CookieJar<'_>,
    store: &State<Arc<SessionStore>>,
    providers: &State<ProviderRegistry>,
    config: &State<Config>,
) -> Redirect {
    let provider = match provider {
        Ok(provider) => provider,
        Err(unknown) => {
            let failure = CallbackFailure::UnknownProvider(unknown);
            warn!(error = %failure, reason = failure.code(), "oauth callback rejected");
            return Redirect::to(error_redirect_url(&config.redirect, &failure));
        }
    };
    let service = OAuthService::new(store.inner().as_ref(), providers.inner(), config.inner());

    match service.complete(provider, session.id(), query.into()).await {
        Ok(account) => {
            cookies.add(session_cookie(&config.session, &account.session_id));
            Redirect::to(success_redirect_url(&config.redirect, provider, &account))
        }
        Err(failed) => {
            let session_id = failed.session_id.as_deref().map(short_id).unwrap_or("none");
            match &failed.failure {
                CallbackFailure::CallbackProcessingFailed(source) => {
                    error!(%provider, session_id, error = %source, reason = failed.failure.code(), "oauth callback failed")
                }
                failure => warn!(%provider, session_id, error = %failure, reason = failure.code(), "oauth callback rejected"),
            }

            if let Some(id) = &failed.session_id {
                cookies.add(session_cookie(&config.session, id));
            }
            Redirect::to(error_redirect_url(&config.redirect, &failed.failure))
        }
    }
}

/// Forget the provider's tokens and identity for the calling session.
#[post("/<provider>/disconnect")]
pub async fn disconnect(
    provider: Result<Provider, UnknownProvider>,
    session: SessionCookie,
    store: &State<Arc<SessionStore>>,
) -> Result<Json<ConnectionStatusResponse>, AppError> {
    let provider = provider?;
    let id = session.id().ok_or(AppError::SessionNotFound)?;
    let record = store.get(id).await.ok_or(AppError::SessionNotFound)?;
    if !record.is_connected_to(provider) {
        return Err(AppError::NotConnected(provider));
    }

    let record = store.clear_provider(id, provider).await.ok_or(AppError::SessionNotFound)?;
    info!(%provider, session_id = %short_id(id), "provider disconnected");

    Ok(Json(ConnectionStatusResponse::for_session(provider, Some(&record))))
}

#[get("/<provider>/status")]
pub async fn status(
    provider: Result<Provider, UnknownProvider>,
    session: SessionCookie,
    store: &State<Arc<SessionStore>>,
) -> Result<Json<ConnectionStatusResponse>, AppError> {
    let provider = provider?;
    let record = match session.id() {
        Some(id) => store.get(id).await,
        None => None,
    };

    Ok(Json(ConnectionStatusResponse::for_session(provider, record.as_ref())))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![connect, callback, disconnect, status]
}
