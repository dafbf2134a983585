//! Delivery boundary for one-time codes
//!
//! Email and SMS delivery live outside this crate. `AuthService` hands codes
//! to an `OtpNotifier`; the bundled implementations only log or record them.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::auth::otp::OtpPurpose;
use crate::error::Result;

#[async_trait]
pub trait OtpNotifier: Send + Sync {
    /// Deliver `code` to the owner of `identifier`
    async fn send_code(&self, identifier: &str, purpose: OtpPurpose, code: &str) -> Result<()>;
}

pub type SharedNotifier = Arc<dyn OtpNotifier>;

/// Writes codes to the log. Development only: codes are secrets.
pub struct LogNotifier;

#[async_trait]
impl OtpNotifier for LogNotifier {
    async fn send_code(&self, identifier: &str, purpose: OtpPurpose, code: &str) -> Result<()> {
        log::info!("[dev] {} code for '{}': {}", purpose, identifier, code);
        Ok(())
    }
}

/// Keeps every delivered code in memory so callers can read them back
#[derive(Default)]
pub struct RecordingNotifier {
    sent: RwLock<Vec<(String, OtpPurpose, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent code sent to `identifier` for `purpose`
    pub async fn last_code(&self, identifier: &str, purpose: OtpPurpose) -> Option<String> {
        let sent = self.sent.read().await;
        sent.iter()
            .rev()
            .find(|(id, p, _)| id == identifier && *p == purpose)
            .map(|(_, _, code)| code.clone())
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.read().await.len()
    }
}

#[async_trait]
impl OtpNotifier for RecordingNotifier {
    async fn send_code(&self, identifier: &str, purpose: OtpPurpose, code: &str) -> Result<()> {
        self.sent
            .write()
            .await
            .push((identifier.to_string(), purpose, code.to_string()));
        Ok(())
    }
}
