use crate::models::session::{Provider, UnknownProvider};
use rocket::http::Status;
use rocket::response::Responder;
use rocket::{Request, Response};
use std::io::Cursor;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Session not found")]
    SessionNotFound,
    #[error("{0} is not connected")]
    NotConnected(Provider),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<&AppError> for Status {
    fn from(e: &AppError) -> Self {
        match e {
            AppError::SessionNotFound => Status::NotFound,
            AppError::NotConnected(_) => Status::Conflict,
            AppError::NotFound(_) => Status::NotFound,
        }
    }
}

impl<'r> Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &Request<'_>) -> rocket::response::Result<'static> {
        let method = req.method();
        let path = req.uri().path();

        let request_id = req
            .local_cache(|| None::<crate::middleware::RequestId>)
            .as_ref()
            .map(|r| r.0.as_str())
            .unwrap_or("unknown");

        error!(
            error = ?self,
            request_id = %request_id,
            method = %method,
            path = %path,
            "request failed"
        );

        let status = Status::from(&self);
        let body = self.to_string();

        Response::build().status(status).sized_body(body.len(), Cursor::new(body)).ok()
    }
}

impl From<UnknownProvider> for AppError {
    fn from(e: UnknownProvider) -> Self {
        AppError::NotFound(e.to_string())
    }
}
