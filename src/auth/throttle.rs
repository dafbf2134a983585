//! Brute-force login throttling per submitted identifier
//!
//! Each identifier moves through Clear -> Counting -> Locked. Counters live in
//! the shared cache under `login:<identifier>` and are incremented with the
//! store's atomic increment so concurrent failures are never lost.

use std::time::Duration;

use crate::config::ServerConfig;
use crate::constants::{LOGIN_KEY_PREFIX, LOGIN_LOCKOUT_SECS, LOGIN_MAX_FAILED_ATTEMPTS};
use crate::error::Result;
use crate::storage::cache::{with_deadline, SharedCacheStore};

/// Where an identifier currently sits in the throttle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleState {
    Clear,
    Counting(i64),
    Locked,
}

pub struct LoginThrottle {
    cache: SharedCacheStore,
    max_attempts: i64,
    lockout: Duration,
    deadline: Duration,
}

impl LoginThrottle {
    pub fn new(cache: SharedCacheStore, max_attempts: i64, lockout: Duration, deadline: Duration) -> Self {
        Self {
            cache,
            max_attempts: max_attempts.max(1),
            lockout,
            deadline,
        }
    }

    pub fn with_defaults(cache: SharedCacheStore, deadline: Duration) -> Self {
        Self::new(
            cache,
            LOGIN_MAX_FAILED_ATTEMPTS,
            Duration::from_secs(LOGIN_LOCKOUT_SECS),
            deadline,
        )
    }

    pub fn from_config(cache: SharedCacheStore, config: &ServerConfig) -> Self {
        Self::new(cache, config.max_failed_logins, config.lockout_duration, config.store_timeout)
    }

    pub fn lockout_duration(&self) -> Duration {
        self.lockout
    }

    pub fn max_attempts(&self) -> i64 {
        self.max_attempts
    }

    fn key(identifier: &str) -> String {
        format!("{}:{}", LOGIN_KEY_PREFIX, identifier)
    }

    async fn attempts(&self, identifier: &str) -> Result<i64> {
        let key = Self::key(identifier);
        let value = with_deadline(self.deadline, "login counter read", self.cache.get(&key)).await?;
        Ok(value.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0))
    }

    pub async fn state(&self, identifier: &str) -> Result<ThrottleState> {
        let attempts = self.attempts(identifier).await?;
        Ok(match attempts {
            0 => ThrottleState::Clear,
            n if n >= self.max_attempts => ThrottleState::Locked,
            n => ThrottleState::Counting(n),
        })
    }

    /// Whether the identifier is locked out. A locked identifier that keeps
    /// trying has its lockout window pushed back to the full duration.
    pub async fn is_blocked(&self, identifier: &str) -> Result<bool> {
        if self.attempts(identifier).await? < self.max_attempts {
            return Ok(false);
        }

        let key = Self::key(identifier);
        with_deadline(self.deadline, "login lockout refresh", self.cache.expire(&key, self.lockout)).await?;
        log::debug!("Login attempt during lockout for '{}', window refreshed", identifier);
        Ok(true)
    }

    /// Record a failed login and return the new attempt count
    pub async fn increment_failure(&self, identifier: &str) -> Result<i64> {
        let key = Self::key(identifier);
        let attempts = with_deadline(self.deadline, "login counter increment", self.cache.incr(&key)).await?;

        // First failure opens the window; reaching the threshold re-arms it so
        // the lock always lasts the full duration.
        if attempts == 1 || attempts == self.max_attempts {
            with_deadline(self.deadline, "login counter expiry", self.cache.expire(&key, self.lockout)).await?;
        }

        if attempts == self.max_attempts {
            log::warn!(
                "Identifier '{}' locked for {}s after {} failed logins",
                identifier,
                self.lockout.as_secs(),
                attempts
            );
        }
        Ok(attempts)
    }

    /// Reset the identifier after a successful login
    pub async fn clear(&self, identifier: &str) -> Result<()> {
        let key = Self::key(identifier);
        with_deadline(self.deadline, "login counter clear", self.cache.delete(&key)).await?;
        Ok(())
    }

    /// Remaining lockout time, if the identifier is locked
    pub async fn lockout_remaining(&self, identifier: &str) -> Result<Option<Duration>> {
        if self.attempts(identifier).await? < self.max_attempts {
            return Ok(None);
        }
        let key = Self::key(identifier);
        let ttl = with_deadline(self.deadline, "login counter ttl", self.cache.ttl(&key)).await?;
        Ok(Some(ttl.unwrap_or(self.lockout)))
    }
}
