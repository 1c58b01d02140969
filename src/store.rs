pub mod session;

use crate::config::SessionConfig;
use crate::store::session::SessionStore;
use rocket::fairing::{self, Fairing, Info, Kind};
use rocket::{Build, Orbit, Rocket};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

/// Handle to the background sweep so shutdown can stop it.
#[derive(Debug, Default)]
pub struct CleanupTask(Mutex<Option<JoinHandle<()>>>);

impl CleanupTask {
    pub fn start(store: Arc<SessionStore>) -> Self {
        Self(Mutex::new(Some(store.spawn_cleanup_task())))
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.0.lock().await.take() {
            handle.abort();
        }
    }
}

/// Owns the session store lifecycle: built and swept from ignite, stopped on shutdown.
pub struct SessionStoreFairing {
    config: SessionConfig,
}

pub fn stage_session_store(config: SessionConfig) -> SessionStoreFairing {
    SessionStoreFairing { config }
}

#[rocket::async_trait]
impl Fairing for SessionStoreFairing {
    fn info(&self) -> Info {
        Info {
            name: "Session Store",
            kind: Kind::Ignite | Kind::Shutdown,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> fairing::Result {
        let store = Arc::new(SessionStore::new(&self.config));
        let cleanup = CleanupTask::start(store.clone());

        info!(
            ttl_seconds = self.config.ttl_seconds,
            cleanup_interval_seconds = self.config.cleanup_interval_seconds,
            "session store initialized"
        );

        Ok(rocket.manage(store).manage(cleanup))
    }

    async fn on_shutdown(&self, rocket: &Rocket<Orbit>) {
        if let Some(cleanup) = rocket.state::<CleanupTask>() {
            cleanup.stop().await;
            info!("session cleanup task stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocket::local::asynchronous::Client;

    #[rocket::async_test]
    async fn fairing_manages_store_and_cleanup_task() {
        let rocket = rocket::build().attach(stage_session_store(SessionConfig::default()));
        let client = Client::tracked(rocket).await.expect("valid rocket instance");

        let store = client.rocket().state::<Arc<SessionStore>>().expect("store is managed");
        assert!(store.is_empty().await);

        let cleanup = client.rocket().state::<CleanupTask>().expect("cleanup task is managed");
        cleanup.stop().await;
        assert!(cleanup.0.lock().await.is_none());
    }
}
