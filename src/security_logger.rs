//! Security-focused logging module to track authentication and authorization events

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Types of security events to track
#[derive(Debug, Clone)]
pub enum SecurityEvent {
    // Authentication events
    LoginFailed { identifier: String, reason: String },
    LoginSucceeded { user_id: String, method: String },
    AccountLocked { identifier: String, attempts: i64 },
    TokenRevoked { user_id: Option<String>, token_id: String, reason: String },
    TokenRejected { fingerprint: String, reason: String },

    // One-time codes
    OtpIssued { identifier: String, purpose: String },
    OtpFailed { identifier: String, purpose: String, remaining_attempts: u32 },
    OtpExhausted { identifier: String, purpose: String },

    // Authorization events
    PermissionDenied { user_id: String, required: Vec<String> },

    // Account changes
    PasswordChanged { user_id: String, via: String },

    // Infrastructure
    DependencyFailure { component: String, error: String },
}

/// Security event with timestamp
#[derive(Debug, Clone)]
struct TimestampedEvent {
    event: SecurityEvent,
    timestamp: Instant,
}

/// Short, non-reversible identifier for a bearer token suitable for logs
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().take(6).map(|b| format!("{:02x}", b)).collect()
}

/// Security logger for tracking and alerting on security events
pub struct SecurityLogger {
    events: Arc<RwLock<Vec<TimestampedEvent>>>,
    event_counts: Arc<RwLock<HashMap<&'static str, usize>>>,
    max_events: usize,
    alert_thresholds: HashMap<&'static str, usize>,
}

impl SecurityLogger {
    pub fn new() -> Self {
        let mut alert_thresholds = HashMap::new();
        alert_thresholds.insert("login_failed", 10);
        alert_thresholds.insert("account_locked", 3);
        alert_thresholds.insert("token_rejected", 20);
        alert_thresholds.insert("otp_exhausted", 3);
        alert_thresholds.insert("permission_denied", 20);
        alert_thresholds.insert("dependency_failure", 5);

        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            event_counts: Arc::new(RwLock::new(HashMap::new())),
            max_events: 10000,
            alert_thresholds,
        }
    }

    /// Log a security event
    pub async fn log_event(&self, event: SecurityEvent) {
        let event_key = Self::event_key(&event);

        {
            let mut events = self.events.write().await;
            events.push(TimestampedEvent {
                event: event.clone(),
                timestamp: Instant::now(),
            });

            if events.len() > self.max_events {
                let excess = events.len() - self.max_events;
                events.drain(0..excess);
            }
        }

        {
            let mut counts = self.event_counts.write().await;
            let count = counts.entry(event_key).or_insert(0);
            *count += 1;

            if let Some(&threshold) = self.alert_thresholds.get(event_key) {
                if *count % threshold == 0 {
                    log::error!("SECURITY ALERT: {} events of type '{}' detected", count, event_key);
                    log::error!("Sample event: {:?}", event);
                }
            }
        }

        match event {
            SecurityEvent::LoginFailed { identifier, reason } => {
                log::warn!("SECURITY: Login failed - Identifier: {}, Reason: {}", identifier, reason);
            }
            SecurityEvent::LoginSucceeded { user_id, method } => {
                log::info!("SECURITY: Login success - User: {}, Method: {}", user_id, method);
            }
            SecurityEvent::AccountLocked { identifier, attempts } => {
                log::warn!("SECURITY: Account locked - Identifier: {}, Attempts: {}", identifier, attempts);
            }
            SecurityEvent::TokenRevoked { user_id, token_id, reason } => {
                log::info!("SECURITY: Token revoked - User: {:?}, Token: {}, Reason: {}", user_id, token_id, reason);
            }
            SecurityEvent::TokenRejected { fingerprint, reason } => {
                log::warn!("SECURITY: Token rejected - Fingerprint: {}, Reason: {}", fingerprint, reason);
            }
            SecurityEvent::OtpIssued { identifier, purpose } => {
                log::info!("SECURITY: OTP issued - Identifier: {}, Purpose: {}", identifier, purpose);
            }
            SecurityEvent::OtpFailed { identifier, purpose, remaining_attempts } => {
                log::warn!(
                    "SECURITY: OTP mismatch - Identifier: {}, Purpose: {}, Remaining: {}",
                    identifier, purpose, remaining_attempts
                );
            }
            SecurityEvent::OtpExhausted { identifier, purpose } => {
                log::warn!("SECURITY: OTP attempts exhausted - Identifier: {}, Purpose: {}", identifier, purpose);
            }
            SecurityEvent::PermissionDenied { user_id, required } => {
                log::warn!("SECURITY: Permission denied - User: {}, Required any of: {:?}", user_id, required);
            }
            SecurityEvent::PasswordChanged { user_id, via } => {
                log::info!("SECURITY: Password changed - User: {}, Via: {}", user_id, via);
            }
            SecurityEvent::DependencyFailure { component, error } => {
                log::error!("SECURITY: Dependency failure, denying - Component: {}, Error: {}", component, error);
            }
        }
    }

    fn event_key(event: &SecurityEvent) -> &'static str {
        match event {
            SecurityEvent::LoginFailed { .. } => "login_failed",
            SecurityEvent::LoginSucceeded { .. } => "login_succeeded",
            SecurityEvent::AccountLocked { .. } => "account_locked",
            SecurityEvent::TokenRevoked { .. } => "token_revoked",
            SecurityEvent::TokenRejected { .. } => "token_rejected",
            SecurityEvent::OtpIssued { .. } => "otp_issued",
            SecurityEvent::OtpFailed { .. } => "otp_failed",
            SecurityEvent::OtpExhausted { .. } => "otp_exhausted",
            SecurityEvent::PermissionDenied { .. } => "permission_denied",
            SecurityEvent::PasswordChanged { .. } => "password_changed",
            SecurityEvent::DependencyFailure { .. } => "dependency_failure",
        }
    }

    /// Get recent security events
    pub async fn get_recent_events(&self, duration: Duration) -> Vec<SecurityEvent> {
        let events = self.events.read().await;
        let now = Instant::now();

        events
            .iter()
            .filter(|event| now.duration_since(event.timestamp) <= duration)
            .map(|event| event.event.clone())
            .collect()
    }

    /// Get event statistics
    pub async fn get_event_stats(&self) -> HashMap<String, usize> {
        let counts = self.event_counts.read().await;
        counts.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    /// Drop events older than `max_age`
    pub async fn cleanup_old_events(&self, max_age: Duration) {
        let mut events = self.events.write().await;
        let now = Instant::now();
        events.retain(|event| now.duration_since(event.timestamp) <= max_age);
    }

    /// Start periodic cleanup task
    pub fn start_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                self.cleanup_old_events(Duration::from_secs(3600 * 24)).await;
            }
        });
    }
}

impl Default for SecurityLogger {
    fn default() -> Self {
        Self::new()
    }
}
