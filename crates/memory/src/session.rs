//! Two-tier session storage.
//!
//! Tier one is the shared cache; tier two is a process-local map used when
//! the cache is disabled, unreachable or missing the key. Both tiers hold the
//! same window of turns and expire on the same TTL, so a read returns the
//! same shape whichever tier served it. When both tiers hold a session, the
//! one with the newer last turn wins.

use crate::cache::{key_segment, CacheStore};
use parking_lot::Mutex;
use parley_common::ConversationTurn;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Local-tier writes between sweeps of expired sessions.
const PURGE_EVERY: u64 = 64;

/// Key prefix shared by every session of a user.
fn user_prefix(user_id: &str) -> String {
    format!("session:{}:", key_segment(user_id))
}

/// Cache key of a session. Both ids are percent-encoded, so distinct
/// `(user_id, session_id)` pairs never share a key.
pub fn session_key(user_id: &str, session_id: &str) -> String {
    format!("{}{}", user_prefix(user_id), key_segment(session_id))
}

fn last_timestamp(turns: &[ConversationTurn]) -> Option<f64> {
    turns.last().map(|t| t.timestamp)
}

struct LocalSession {
    turns: Vec<ConversationTurn>,
    expires_at: Instant,
}

/// Bounded, expiring turn history per `(user_id, session_id)`.
pub struct SessionStore {
    cache: Arc<CacheStore>,
    local: Mutex<HashMap<String, LocalSession>>,
    local_writes: AtomicU64,
    window: usize,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(cache: Arc<CacheStore>, window: usize, ttl: Duration) -> Self {
        Self {
            cache,
            local: Mutex::new(HashMap::new()),
            local_writes: AtomicU64::new(0),
            window: window.max(1),
            ttl,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Keep only the most recent `window` turns.
    fn truncate(&self, turns: &mut Vec<ConversationTurn>) {
        if turns.len() > self.window {
            let excess = turns.len() - self.window;
            turns.drain(..excess);
        }
    }

    fn load_local(&self, key: &str) -> Option<Vec<ConversationTurn>> {
        let mut local = self.local.lock();
        match local.get(key) {
            Some(session) if session.expires_at > Instant::now() => Some(session.turns.clone()),
            Some(_) => {
                local.remove(key);
                None
            }
            None => None,
        }
    }

    fn store_local(&self, key: String, turns: Vec<ConversationTurn>) {
        self.local.lock().insert(
            key,
            LocalSession {
                turns,
                expires_at: Instant::now() + self.ttl,
            },
        );

        let writes = self.local_writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % PURGE_EVERY == 0 {
            let purged = self.purge_expired();
            if purged > 0 {
                debug!(purged, "Swept expired local sessions");
            }
        }
    }

    /// Current turns, oldest first. Empty for unknown or expired sessions.
    pub async fn load(&self, user_id: &str, session_id: &str) -> Vec<ConversationTurn> {
        let key = session_key(user_id, session_id);

        let cached = self.cache.get::<Vec<ConversationTurn>>(&key).await;
        let local = self.load_local(&key);
        let mut turns = match (cached, local) {
            // Turns appended while the cache was unreachable only reached the local tier
            (Some(cached), Some(local)) if last_timestamp(&local) > last_timestamp(&cached) => local,
            (Some(cached), _) => cached,
            (None, local) => local.unwrap_or_default(),
        };
        self.truncate(&mut turns);
        turns
    }

    /// Append a turn, dropping the oldest beyond the window, and write both tiers.
    ///
    /// Concurrent appends to one session are last-write-wins.
    #[instrument(skip(self, turn))]
    pub async fn append(&self, user_id: &str, session_id: &str, turn: ConversationTurn) -> Vec<ConversationTurn> {
        let key = session_key(user_id, session_id);
        let mut turns = self.load(user_id, session_id).await;
        turns.push(turn);
        self.truncate(&mut turns);

        if !self.cache.set(&key, &turns, self.ttl).await {
            debug!(key = %key, "Session kept in local tier only");
        }
        self.store_local(key, turns.clone());
        turns
    }

    /// Remove a session from both tiers. Returns how many turns it held.
    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: &str, session_id: &str) -> usize {
        let key = session_key(user_id, session_id);
        let count = self.load(user_id, session_id).await.len();
        self.cache.delete(&key).await;
        self.local.lock().remove(&key);
        count
    }

    /// Remove every session of a user from both tiers.
    ///
    /// Returns the larger of the two tiers' removal counts.
    #[instrument(skip(self))]
    pub async fn clear_user(&self, user_id: &str) -> usize {
        let prefix = user_prefix(user_id);
        let from_cache = self.cache.clear_pattern(&format!("{prefix}*")).await as usize;

        let mut local = self.local.lock();
        let before = local.len();
        local.retain(|key, _| !key.starts_with(&prefix));
        let from_local = before - local.len();

        from_cache.max(from_local)
    }

    /// Drop expired entries from the local tier.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut local = self.local.lock();
        let before = local.len();
        local.retain(|_, session| session.expires_at > now);
        before - local.len()
    }

    /// Number of sessions currently held by the local tier.
    pub fn local_session_count(&self) -> usize {
        self.local.lock().len()
    }
}
