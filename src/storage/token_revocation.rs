//! Token revocation storage and management
//!
//! Revoked credentials are recorded as TTL-bound markers in the shared cache,
//! keyed by their unique id. Each marker expires together with the credential
//! it revokes, so the store never grows beyond the set of revoked credentials
//! that are still alive.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::token::TokenManager;
use crate::error::{Result, RustyGateError};
use crate::storage::cache::{with_deadline, SharedCacheStore};

/// Reason recorded alongside a revocation marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RevocationReason {
    /// User initiated logout
    UserLogout,
    /// User changed password
    CredentialChange,
    /// Single-use credential consumed (reset token, rotated refresh token)
    Consumed,
    /// Administrative action
    AdminRevocation,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::UserLogout => "logout",
            RevocationReason::CredentialChange => "credential_change",
            RevocationReason::Consumed => "consumed",
            RevocationReason::AdminRevocation => "admin",
        }
    }
}

/// Outcome of a successful revocation
#[derive(Debug, Clone)]
pub struct RevokedToken {
    pub token_id: String,
    pub user_id: Option<String>,
    pub ttl: Duration,
    pub reason: RevocationReason,
}

/// Revocation markers in the shared cache
pub struct RevocationStore {
    cache: SharedCacheStore,
    tokens: Arc<TokenManager>,
    namespace: String,
    deadline: Duration,
}

impl RevocationStore {
    pub fn new(cache: SharedCacheStore, tokens: Arc<TokenManager>, namespace: &str, deadline: Duration) -> Self {
        Self {
            cache,
            tokens,
            namespace: namespace.to_string(),
            deadline,
        }
    }

    fn prefix(&self) -> String {
        format!("{}:jti:", self.namespace)
    }

    fn marker_key(&self, token_id: &str) -> String {
        format!("{}{}", self.prefix(), token_id)
    }

    /// Record a credential as revoked for the rest of its natural lifetime
    pub async fn revoke(&self, token: &str, reason: RevocationReason) -> Result<RevokedToken> {
        let pending = self.pending(token, reason)?;
        self.write_marker(pending).await
    }

    /// Spend a single-use credential. Exactly one caller wins; any other
    /// concurrent or later attempt gets `RevokedCredential`.
    pub async fn consume(&self, token: &str) -> Result<RevokedToken> {
        let pending = self.pending(token, RevocationReason::Consumed)?;

        let claim_key = format!("{}:spent", self.marker_key(&pending.token_id));
        let claims = with_deadline(self.deadline, "revocation claim", self.cache.incr(&claim_key)).await?;
        if claims > 1 {
            log::warn!("Single-use token {} presented again", pending.token_id);
            return Err(RustyGateError::RevokedCredential);
        }
        with_deadline(self.deadline, "revocation claim", self.cache.expire(&claim_key, pending.ttl)).await?;

        self.write_marker(pending).await
    }

    fn pending(&self, token: &str, reason: RevocationReason) -> Result<RevokedToken> {
        let registered = self.tokens.inspect(token)?;
        let token_id = registered
            .jti
            .filter(|jti| !jti.is_empty())
            .ok_or(RustyGateError::MissingUniqueId)?;
        let exp = registered.exp.ok_or(RustyGateError::MissingExpiry)?;

        let now = Utc::now();
        if exp < now.timestamp() {
            return Err(RustyGateError::AlreadyExpired);
        }
        // Validation accepts a credential through the whole second `exp`
        let remaining_ms = (exp + 1) * 1000 - now.timestamp_millis();

        Ok(RevokedToken {
            token_id,
            user_id: registered.user_id,
            ttl: Duration::from_millis(remaining_ms.max(1) as u64),
            reason,
        })
    }

    async fn write_marker(&self, revoked: RevokedToken) -> Result<RevokedToken> {
        let key = self.marker_key(&revoked.token_id);
        with_deadline(
            self.deadline,
            "revocation write",
            self.cache.set(&key, revoked.reason.as_str(), Some(revoked.ttl)),
        )
        .await?;

        log::info!(
            "Token revoked: {} ({}, ttl {:?})",
            revoked.token_id,
            revoked.reason.as_str(),
            revoked.ttl
        );
        Ok(revoked)
    }

    /// Check whether a credential has been revoked
    pub async fn is_revoked(&self, token: &str) -> Result<bool> {
        let registered = self.tokens.inspect(token)?;
        let token_id = registered
            .jti
            .filter(|jti| !jti.is_empty())
            .ok_or(RustyGateError::MissingUniqueId)?;
        self.is_jti_revoked(&token_id).await
    }

    /// Check a unique id that has already been extracted from validated claims
    pub async fn is_jti_revoked(&self, token_id: &str) -> Result<bool> {
        let key = self.marker_key(token_id);
        with_deadline(self.deadline, "revocation lookup", self.cache.exists(&key)).await
    }

    /// Administrative bulk delete of every marker in this namespace
    pub async fn clear(&self) -> Result<usize> {
        let prefix = self.prefix();
        let removed = with_deadline(self.deadline, "revocation clear", self.cache.delete_prefix(&prefix)).await?;
        log::warn!("Cleared {} revocation markers", removed);
        Ok(removed)
    }
}
