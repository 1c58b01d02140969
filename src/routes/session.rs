use crate::models::auth::SessionSummary;
use crate::store::session::SessionStore;
use rocket::serde::json::Json;
use rocket::{State, get, routes};
use std::sync::Arc;

/// Every live session, newest activity first. Mounted only when diagnostics are enabled.
#[get("/")]
pub async fn list_sessions(store: &State<Arc<SessionStore>>) -> Json<Vec<SessionSummary>> {
    let mut sessions: Vec<SessionSummary> = store.get_all_sessions().await.iter().map(SessionSummary::from).collect();
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Json(sessions)
}

pub fn routes() -> Vec<rocket::Route> {
    routes![list_sessions]
}
