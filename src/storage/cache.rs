//! Shared cache interface and in-memory implementation
//!
//! Revocation markers, login counters, one-time codes and permission sets all
//! live behind [`CacheStore`]. The trait exposes only the primitives the security
//! core needs from a Redis-like store: TTL'd writes, an atomic increment and an
//! atomic compare-and-swap.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{Result, RustyGateError};

/// Key/value store shared by every request worker
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read a live value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one and its expiry
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Remove a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Check whether a live value exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Atomically increment an integer value (missing keys start at 0) and
    /// return the new value. Expiry of an existing key is preserved.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Set the expiry of an existing key, returning false if it does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining lifetime of a key; `None` when missing or persistent
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Replace the value only if it still equals `expected`. Expiry is preserved.
    async fn compare_and_swap(&self, key: &str, expected: &str, new_value: &str) -> Result<bool>;

    /// Remove every key starting with `prefix`, returning how many were removed
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;
}

/// Shared reference to a cache store
pub type SharedCacheStore = Arc<dyn CacheStore>;

/// Await a store operation, failing closed once `deadline` elapses
pub async fn with_deadline<T, F>(deadline: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            log::error!("Shared store call '{}' exceeded {:?}", operation, deadline);
            Err(RustyGateError::Timeout(operation.to_string()))
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-memory cache with lazy expiry plus an optional sweeper task
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Drop every expired entry
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|entry| entry.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Start background cleanup task
    pub fn start_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let removed = self.purge_expired().await;
                if removed > 0 {
                    log::debug!("Purged {} expired cache entries", removed);
                }
            }
        });
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.lock().await.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let removed = self.entries.lock().await.remove(key);
        Ok(removed.map_or(false, |entry| entry.is_live(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let live = entries.get(key).filter(|entry| entry.is_live(now)).cloned();

        let (current, expires_at) = match live {
            Some(entry) => {
                let current = entry.value.parse::<i64>().map_err(|_| {
                    RustyGateError::StorageError(format!("Value at '{}' is not an integer", key))
                })?;
                (current, entry.expires_at)
            }
            None => (0, None),
        };

        let next = current + 1;
        entries.insert(
            key.to_string(),
            CacheEntry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, new_value: &str) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) && entry.value == expected => {
                entry.value = new_value.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let keys: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            entries.remove(key);
        }
        // Expired leftovers under the prefix go too, without being counted
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(keys.len())
    }
}
