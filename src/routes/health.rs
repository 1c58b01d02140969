use crate::models::health::HealthResponse;
use crate::store::session::SessionStore;
use rocket::serde::json::Json;
use rocket::{State, routes};
use std::sync::Arc;

#[rocket::get("/")]
pub async fn healthcheck(store: &State<Arc<SessionStore>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        live_sessions: store.live_len().await,
    })
}

pub fn routes() -> Vec<rocket::Route> {
    routes![healthcheck]
}
