//! Distributed per-user locking.
//!
//! One external account must never be driven by two workers at once: a shared
//! browser session would be corrupted and simultaneous API calls look like a
//! bot. The lock is keyed by (user, action category) where the category
//! embeds the platform (`engagement_linkedin`), so a LinkedIn action and a
//! Meta action for the same user may run concurrently but two LinkedIn
//! actions may not.
//!
//! Locks carry a TTL so a crashed worker cannot block a user forever, and a
//! random owner token so release/extend only ever act on a lock the caller
//! still owns (a TTL-expired-then-reacquired lock has a different token).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

const LOCK_PREFIX: &str = "boostloop:user_lock:";

/// How often a blocking acquire polls the store.
const BLOCKING_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The expiring key-value store behind the lock. All three mutating
/// operations are atomic with respect to each other and to expiry.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Set-if-absent with expiry. An expired holder counts as absent.
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Compare-and-delete: removes the key only while `token` still owns it.
    async fn release(&self, key: &str, token: &str) -> Result<bool>;

    /// Reset the expiry to `ttl` from now, only while `token` still owns it.
    async fn extend(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Non-mutating existence check. Diagnostics only — never a safe
    /// pre-check for acquisition.
    async fn exists(&self, key: &str) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// UserLockManager
// ---------------------------------------------------------------------------

pub struct UserLockManager {
    store: Arc<dyn LockStore>,
    ttl: Duration,
}

impl UserLockManager {
    pub fn new(store: Arc<dyn LockStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(user_id: Uuid, category: &str) -> String {
        format!("{LOCK_PREFIX}{category}:{user_id}")
    }

    /// Non-blocking acquire. None means another worker holds the lock.
    pub async fn acquire(&self, user_id: Uuid, category: &str) -> Result<Option<UserLockGuard>> {
        let key = Self::key(user_id, category);
        let token = Uuid::new_v4().to_string();
        if self.store.try_acquire(&key, &token, self.ttl).await? {
            debug!(key = key.as_str(), "Acquired user lock");
            Ok(Some(UserLockGuard {
                store: self.store.clone(),
                ttl: self.ttl,
                key,
                token,
            }))
        } else {
            Ok(None)
        }
    }

    /// Blocking acquire: polls every second until `timeout` elapses.
    pub async fn acquire_blocking(
        &self,
        user_id: Uuid,
        category: &str,
        timeout: Duration,
    ) -> Result<Option<UserLockGuard>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(guard) = self.acquire(user_id, category).await? {
                return Ok(Some(guard));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(BLOCKING_POLL_INTERVAL.min(remaining)).await;
        }
    }

    /// Whether a lock currently exists for (user, category). Diagnostics/UI
    /// only; racing against expiry makes this useless as a pre-check.
    pub async fn is_locked(&self, user_id: Uuid, category: &str) -> Result<bool> {
        self.store.exists(&Self::key(user_id, category)).await
    }
}

/// An acquired lock. Release explicitly when done; if the worker dies first,
/// the TTL reclaims the lock.
pub struct UserLockGuard {
    store: Arc<dyn LockStore>,
    ttl: Duration,
    key: String,
    token: String,
}

impl UserLockGuard {
    /// Release if still owned. Logs and swallows store errors — at worst the
    /// TTL cleans up.
    pub async fn release(self) {
        match self.store.release(&self.key, &self.token).await {
            Ok(true) => debug!(key = self.key.as_str(), "Released user lock"),
            Ok(false) => warn!(
                key = self.key.as_str(),
                "Lock was no longer ours at release (TTL expired?)"
            ),
            Err(e) => warn!(key = self.key.as_str(), error = %e, "Error releasing user lock"),
        }
    }

    /// Push the expiry out to `additional` past the configured TTL, from now.
    pub async fn extend(&self, additional: Duration) -> Result<bool> {
        self.store
            .extend(&self.key, &self.token, self.ttl + additional)
            .await
    }
}

// ---------------------------------------------------------------------------
// MemoryLockStore
// ---------------------------------------------------------------------------

/// In-process lock store: a mutex-guarded map of key → (owner token, expiry).
/// The production deployment uses [`crate::store::PgLockStore`]; this backend
/// serves tests and single-process setups.
#[derive(Default)]
pub struct MemoryLockStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        match entries.get(key) {
            Some((_, expires)) if *expires > now => Ok(false),
            _ => {
                entries.insert(key.to_string(), (token.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((owner, _)) if owner == token => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn extend(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        match entries.get_mut(key) {
            Some((owner, expires)) if owner == token && *expires > now => {
                *expires = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .get(key)
            .is_some_and(|(_, expires)| *expires > Instant::now()))
    }
}
