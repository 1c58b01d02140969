use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::models::session::{OAuthState, Provider, ProviderTokens, ProviderUser, SessionRecord};
use crate::pkce::generate_session_id;

/// In-memory session registry with TTL expiry and lookup by OAuth `state`.
///
/// Records live for one process only. Running more than one instance needs an
/// external shared store (e.g. Redis) in place of this map.
#[derive(Debug)]
pub struct SessionStore {
    ttl: chrono::Duration,
    cleanup_interval: Duration,
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            ttl: chrono::Duration::seconds(config.ttl_seconds.max(1)),
            cleanup_interval: Duration::from_secs(config.cleanup_interval_seconds.max(1)),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    fn is_live(&self, record: &SessionRecord, now: DateTime<Utc>) -> bool {
        now - record.updated_at < self.ttl
    }

    /// Returns the live record for `id`, or stores a new record under a freshly generated id.
    pub async fn get_or_create(&self, id: Option<&str>) -> SessionRecord {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;

        if let Some(id) = id
            && let Some(record) = self.live_entry(&mut sessions, id, now)
        {
            return record.clone();
        }

        let record = SessionRecord::new(generate_session_id(), now);
        sessions.insert(record.id.clone(), record.clone());
        record
    }

    /// Like [`get_or_create`](Self::get_or_create) but keeps the caller's id, e.g. a cookie
    /// that outlived a process restart. A live record under that id is returned untouched.
    pub async fn get_or_create_forced(&self, id: &str) -> SessionRecord {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;
        force_entry(&mut sessions, id, now, self.ttl).clone()
    }

    /// Returns the live record, evicting it when it has expired.
    pub async fn get(&self, id: &str) -> Option<SessionRecord> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;
        self.live_entry(&mut sessions, id, now).cloned()
    }

    /// Upserts the record; `updated_at` is always set to now.
    pub async fn save(&self, mut record: SessionRecord) -> SessionRecord {
        record.updated_at = Utc::now();
        let mut sessions = self.sessions.lock().await;
        sessions.insert(record.id.clone(), record.clone());
        record
    }

    pub async fn delete(&self, id: &str) -> bool {
        self.sessions.lock().await.remove(id).is_some()
    }

    /// Attaches an authorization attempt, creating the session if it does not exist yet.
    pub async fn set_oauth_state(&self, id: &str, state: OAuthState) -> SessionRecord {
        self.mutate_forced(id, |record| record.oauth_state = Some(state)).await
    }

    pub async fn get_oauth_state(&self, id: &str) -> Option<OAuthState> {
        self.get(id).await.and_then(|record| record.oauth_state)
    }

    /// Finds the live session whose pending attempt carries `state`.
    ///
    /// Used when the callback arrives without the session cookie.
    pub async fn find_session_by_oauth_state(&self, state: &str) -> Option<SessionRecord> {
        let now = Utc::now();
        let sessions = self.sessions.lock().await;
        sessions
            .values()
            .filter(|record| self.is_live(record, now))
            .find(|record| record.oauth_state.as_ref().is_some_and(|pending| pending.state == state))
            .cloned()
    }

    /// Removes and returns the attempt a callback answers, all under one lock so a replayed
    /// `state` can be claimed at most once.
    ///
    /// The cookie session is checked first; without a pending attempt there the search falls
    /// back to `state`. An attempt whose `state` or provider differs is reported as a mismatch
    /// and left in place.
    pub async fn take_oauth_attempt(&self, cookie_id: Option<&str>, state: &str, provider: Provider) -> AttemptClaim {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;

        if let Some(id) = cookie_id
            && let Some(record) = self.live_entry(&mut sessions, id, now)
            && record.oauth_state.is_some()
        {
            return claim_attempt(record, state, provider, now);
        }

        let Some(record) = sessions
            .values_mut()
            .find(|record| self.is_live(record, now) && record.oauth_state.as_ref().is_some_and(|pending| pending.state == state))
        else {
            return AttemptClaim::Unknown;
        };
        info!(session_id = %short_id(&record.id), "session recovered from oauth state");
        claim_attempt(record, state, provider, now)
    }

    /// Drops the pending attempt. Returns whether one was present.
    pub async fn clear_oauth_state(&self, id: &str) -> bool {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;
        match self.live_entry(&mut sessions, id, now) {
            Some(record) => {
                let cleared = record.oauth_state.take().is_some();
                record.updated_at = now;
                cleared
            }
            None => false,
        }
    }

    pub async fn set_provider_tokens(&self, id: &str, tokens: ProviderTokens) -> SessionRecord {
        self.mutate_forced(id, |record| record.provider_tokens = Some(tokens)).await
    }

    pub async fn set_provider_user(&self, id: &str, user: ProviderUser) -> SessionRecord {
        self.mutate_forced(id, |record| record.provider_user = Some(user)).await
    }

    /// Removes tokens and identity belonging to `provider`. Returns `None` for unknown sessions.
    pub async fn clear_provider(&self, id: &str, provider: Provider) -> Option<SessionRecord> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;
        let record = self.live_entry(&mut sessions, id, now)?;

        if record.provider_tokens.as_ref().is_some_and(|tokens| tokens.provider == provider) {
            record.provider_tokens = None;
        }
        if record.provider_user.as_ref().is_some_and(|user| user.provider == provider) {
            record.provider_user = None;
        }
        record.updated_at = now;
        Some(record.clone())
    }

    /// Deletes every expired record and returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, record| now - record.updated_at < self.ttl);
        before - sessions.len()
    }

    /// Live records at call time.
    pub async fn get_all_sessions(&self) -> Vec<SessionRecord> {
        let now = Utc::now();
        let sessions = self.sessions.lock().await;
        sessions.values().filter(|record| self.is_live(record, now)).cloned().collect()
    }

    /// Number of records still inside the TTL.
    pub async fn live_len(&self) -> usize {
        let now = Utc::now();
        let sessions = self.sessions.lock().await;
        sessions.values().filter(|record| self.is_live(record, now)).count()
    }

    /// Number of stored records, expired-but-unswept ones included.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Sweeps once immediately, then every `cleanup_interval`.
    pub fn spawn_cleanup_task(self: Arc<Self>) -> JoinHandle<()> {
        let cleanup_interval = self.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            loop {
                ticker.tick().await;
                let removed = self.cleanup().await;
                if removed > 0 {
                    info!(removed, "expired sessions swept");
                }
            }
        })
    }

    async fn mutate_forced(&self, id: &str, apply: impl FnOnce(&mut SessionRecord)) -> SessionRecord {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;
        let record = force_entry(&mut sessions, id, now, self.ttl);
        apply(record);
        record.updated_at = now;
        record.clone()
    }

    fn live_entry<'a>(&self, sessions: &'a mut HashMap<String, SessionRecord>, id: &str, now: DateTime<Utc>) -> Option<&'a mut SessionRecord> {
        let expired = !self.is_live(sessions.get(id)?, now);
        if expired {
            sessions.remove(id);
            debug!(session_id = %short_id(id), "evicted expired session on read");
            return None;
        }
        sessions.get_mut(id)
    }
}

/// Outcome of [`SessionStore::take_oauth_attempt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptClaim {
    Claimed { session_id: String, attempt: OAuthState },
    /// A pending attempt exists but belongs to another `state` or provider.
    Mismatch { session_id: String },
    Unknown,
}

fn claim_attempt(record: &mut SessionRecord, state: &str, provider: Provider, now: DateTime<Utc>) -> AttemptClaim {
    let matches = record
        .oauth_state
        .as_ref()
        .is_some_and(|pending| pending.state == state && pending.provider == provider);
    if !matches {
        return AttemptClaim::Mismatch { session_id: record.id.clone() };
    }

    match record.oauth_state.take() {
        Some(attempt) => {
            record.updated_at = now;
            AttemptClaim::Claimed {
                session_id: record.id.clone(),
                attempt,
            }
        }
        None => AttemptClaim::Unknown,
    }
}

fn force_entry<'a>(sessions: &'a mut HashMap<String, SessionRecord>, id: &str, now: DateTime<Utc>, ttl: chrono::Duration) -> &'a mut SessionRecord {
    let record = sessions.entry(id.to_string()).or_insert_with(|| SessionRecord::new(id, now));
    if now - record.updated_at >= ttl {
        *record = SessionRecord::new(id, now);
    }
    record
}

/// Prefix of a session id that is safe to log.
pub(crate) fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

#[cfg(test)]
impl SessionStore {
    /// Stores a record exactly as given, without touching `updated_at`.
    pub(crate) async fn insert_raw(&self, record: SessionRecord) {
        self.sessions.lock().await.insert(record.id.clone(), record);
    }
}
