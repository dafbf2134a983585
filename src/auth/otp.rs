//! One-time codes bound to an identifier and a purpose
//!
//! Records are stored as JSON under `otp:<purpose>:<identifier>` with a TTL
//! equal to the code lifetime. Failed verifications bump the attempt counter
//! with a compare-and-swap against the exact record that was read, so two
//! concurrent wrong guesses are both counted.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::constants::{OTP_KEY_PREFIX, OTP_LENGTH, OTP_LIFETIME_SECS, OTP_MAX_ATTEMPTS};
use crate::error::{Result, RustyGateError};
use crate::security::constant_time_eq;
use crate::storage::cache::{with_deadline, SharedCacheStore};

/// Retries of the read/compare/swap cycle before giving up under contention
const MAX_CAS_RETRIES: usize = 8;

/// Flow a one-time code was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    ForgotPassword,
    Verification,
    Login,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::ForgotPassword => "forgot_password",
            OtpPurpose::Verification => "verification",
            OtpPurpose::Login => "login",
        }
    }
}

impl fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored one-time code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpRecord {
    pub code: String,
    pub purpose: OtpPurpose,
    pub identifier: String,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Public view of a record, without the code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OtpInfo {
    pub identifier: String,
    pub purpose: OtpPurpose,
    pub attempts: u32,
    pub remaining_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

fn generate_code() -> String {
    let upper = 10u32.pow(OTP_LENGTH as u32);
    let value = rand::thread_rng().gen_range(0..upper);
    format!("{:0width$}", value, width = OTP_LENGTH)
}

pub struct OtpManager {
    cache: SharedCacheStore,
    lifetime: Duration,
    max_attempts: u32,
    deadline: Duration,
}

impl OtpManager {
    pub fn new(cache: SharedCacheStore, lifetime: Duration, max_attempts: u32, deadline: Duration) -> Self {
        Self {
            cache,
            lifetime,
            max_attempts: max_attempts.max(1),
            deadline,
        }
    }

    pub fn with_defaults(cache: SharedCacheStore, deadline: Duration) -> Self {
        Self::new(cache, Duration::from_secs(OTP_LIFETIME_SECS), OTP_MAX_ATTEMPTS, deadline)
    }

    pub fn from_config(cache: SharedCacheStore, config: &ServerConfig) -> Self {
        Self::new(cache, config.otp_lifetime, config.otp_max_attempts, config.store_timeout)
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    fn key(identifier: &str, purpose: OtpPurpose) -> String {
        format!("{}:{}:{}", OTP_KEY_PREFIX, purpose.as_str(), identifier)
    }

    /// Generate and store a fresh code, replacing any live one for the pair
    pub async fn issue(&self, identifier: &str, purpose: OtpPurpose) -> Result<String> {
        let now = Utc::now();
        let lifetime = chrono::Duration::from_std(self.lifetime)
            .map_err(|e| RustyGateError::ConfigError(format!("Invalid OTP lifetime: {}", e)))?;

        let record = OtpRecord {
            code: generate_code(),
            purpose,
            identifier: identifier.to_string(),
            attempts: 0,
            created_at: now,
            expires_at: now + lifetime,
        };
        let value = serde_json::to_string(&record)?;

        let key = Self::key(identifier, purpose);
        with_deadline(self.deadline, "otp write", self.cache.set(&key, &value, Some(self.lifetime))).await?;

        log::info!("Issued {} code for '{}'", purpose, identifier);
        Ok(record.code)
    }

    async fn load(&self, key: &str) -> Result<Option<(String, OtpRecord)>> {
        let raw = match with_deadline(self.deadline, "otp read", self.cache.get(key)).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        match serde_json::from_str::<OtpRecord>(&raw) {
            Ok(record) if record.expires_at > Utc::now() => Ok(Some((raw, record))),
            Ok(_) => {
                self.remove(key).await?;
                Ok(None)
            }
            Err(e) => {
                log::warn!("Discarding unreadable OTP record at '{}': {}", key, e);
                self.remove(key).await?;
                Ok(None)
            }
        }
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        with_deadline(self.deadline, "otp delete", self.cache.delete(key)).await
    }

    /// Verify a submitted code. Success consumes the record.
    pub async fn verify(&self, identifier: &str, code: &str, purpose: OtpPurpose) -> Result<()> {
        let key = Self::key(identifier, purpose);

        for _ in 0..MAX_CAS_RETRIES {
            let (raw, record) = self.load(&key).await?.ok_or(RustyGateError::OtpNotFound)?;

            if record.attempts >= self.max_attempts {
                self.remove(&key).await?;
                log::warn!("{} code for '{}' exhausted its attempts", purpose, identifier);
                return Err(RustyGateError::OtpAttemptsExceeded);
            }

            if constant_time_eq(&record.code, code.trim()) {
                // Whoever deletes the record owns the success
                return if self.remove(&key).await? {
                    log::info!("{} code for '{}' verified", purpose, identifier);
                    Ok(())
                } else {
                    Err(RustyGateError::OtpNotFound)
                };
            }

            let attempts = record.attempts + 1;
            let updated = serde_json::to_string(&OtpRecord { attempts, ..record })?;
            let swapped = with_deadline(
                self.deadline,
                "otp attempt update",
                self.cache.compare_and_swap(&key, &raw, &updated),
            )
            .await?;

            if swapped {
                log::debug!("Invalid {} code for '{}' (attempt {})", purpose, identifier, attempts);
                return Err(RustyGateError::InvalidOtpCode {
                    remaining_attempts: self.max_attempts.saturating_sub(attempts),
                });
            }
            // Record changed underneath us; re-read and re-evaluate
        }

        Err(RustyGateError::StorageError(
            "OTP record kept changing during verification".to_string(),
        ))
    }

    /// Inspect a live record without revealing its code
    pub async fn info(&self, identifier: &str, purpose: OtpPurpose) -> Result<OtpInfo> {
        let key = Self::key(identifier, purpose);
        let (_, record) = self.load(&key).await?.ok_or(RustyGateError::OtpNotFound)?;
        Ok(OtpInfo {
            identifier: record.identifier,
            purpose: record.purpose,
            attempts: record.attempts,
            remaining_attempts: self.max_attempts.saturating_sub(record.attempts),
            created_at: record.created_at,
            expires_at: record.expires_at,
        })
    }

    pub async fn delete(&self, identifier: &str, purpose: OtpPurpose) -> Result<()> {
        let key = Self::key(identifier, purpose);
        self.remove(&key).await?;
        Ok(())
    }
}
