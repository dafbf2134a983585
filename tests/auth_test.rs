use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use rusty_gate::auth::token::{extract_bearer_token, TokenManager, TokenScope, TokenSubject};
use rusty_gate::auth::{AuthService, LoginThrottle, OtpManager, OtpPurpose, RecordingNotifier};
use rusty_gate::config::ServerConfig;
use rusty_gate::error::{Result, RustyGateError};
use rusty_gate::security_logger::SecurityLogger;
use rusty_gate::storage::{CacheStore, MemoryCache, MemoryRecordStore, RevocationReason, RevocationStore};

const KEY: &str = "k7Hq2v9XbLp4Rz8Wn3Tj6Ys1Md5Fc0Ga";

fn subject() -> TokenSubject {
    TokenSubject::new("user123")
        .with_username("testuser")
        .with_email("test@example.com")
}

#[test]
fn test_token_creation_and_validation() {
    let tokens = TokenManager::new(KEY);
    let issued = tokens.issue(&subject(), TokenScope::Access, None).unwrap();
    assert_eq!(issued.token.split('.').count(), 3);

    let claims = tokens.validate(&issued.token).unwrap();
    assert_eq!(claims.user_id, "user123");
    assert_eq!(claims.username.as_deref(), Some("testuser"));
    assert_eq!(claims.email.as_deref(), Some("test@example.com"));
    assert_eq!(claims.scope, TokenScope::Access);
    assert_eq!(claims.exp - claims.iat, 24 * 3600);
}

#[test]
fn test_invalid_token_validation() {
    let tokens = TokenManager::new(KEY);
    assert!(matches!(
        tokens.validate("invalid.token.here"),
        Err(RustyGateError::MalformedCredential(_))
    ));

    let other = TokenManager::new("a-different-signing-key-0123456789");
    let foreign = other.issue(&subject(), TokenScope::Access, None).unwrap();
    assert!(matches!(tokens.validate(&foreign.token), Err(RustyGateError::InvalidSignature)));
}

#[test]
fn test_extract_bearer_token() {
    assert_eq!(extract_bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi".to_string()));
    assert_eq!(extract_bearer_token("bearer abc"), Some("abc".to_string()));
    assert_eq!(extract_bearer_token("Basic dXNlcjpwYXNz"), None);
    assert_eq!(extract_bearer_token("Bearer "), None);
}

#[tokio::test]
async fn test_revocation_lasts_for_remaining_lifetime() {
    let cache = Arc::new(MemoryCache::new());
    let tokens = Arc::new(TokenManager::new(KEY));
    let store = RevocationStore::new(cache.clone(), tokens.clone(), "auth", Duration::from_secs(1));

    let issued = tokens
        .issue(&subject(), TokenScope::Access, Some(Duration::from_secs(2)))
        .unwrap();
    let revoked = store.revoke(&issued.token, RevocationReason::UserLogout).await.unwrap();
    assert!(revoked.ttl <= Duration::from_secs(3));
    assert!(revoked.ttl > Duration::from_secs(1));
    assert!(store.is_revoked(&issued.token).await.unwrap());

    let key = format!("auth:jti:{}", issued.claims.jti);
    assert!(cache.exists(&key).await.unwrap());

    tokio::time::sleep(Duration::from_millis(3100)).await;
    assert!(tokens.validate(&issued.token).is_err());
    assert!(!cache.exists(&key).await.unwrap());
}

#[tokio::test]
async fn test_throttle_and_otp_share_one_cache() {
    let cache = Arc::new(MemoryCache::new());
    let throttle = LoginThrottle::with_defaults(cache.clone(), Duration::from_secs(1));
    let otp = OtpManager::with_defaults(cache.clone(), Duration::from_secs(1));

    for _ in 0..5 {
        throttle.increment_failure("+841234567").await.unwrap();
    }
    assert!(throttle.is_blocked("+841234567").await.unwrap());

    let code = otp.issue("+841234567", OtpPurpose::ForgotPassword).await.unwrap();
    assert!(cache.exists("login:+841234567").await.unwrap());
    assert!(cache.exists("otp:forgot_password:+841234567").await.unwrap());

    otp.verify("+841234567", &code, OtpPurpose::ForgotPassword).await.unwrap();
    throttle.clear("+841234567").await.unwrap();
    assert!(!throttle.is_blocked("+841234567").await.unwrap());
}

/// A cache whose every call fails
struct UnreachableCache;

#[async_trait]
impl CacheStore for UnreachableCache {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(RustyGateError::StorageError("connection refused".to_string()))
    }
    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<()> {
        Err(RustyGateError::StorageError("connection refused".to_string()))
    }
    async fn delete(&self, _key: &str) -> Result<bool> {
        Err(RustyGateError::StorageError("connection refused".to_string()))
    }
    async fn exists(&self, _key: &str) -> Result<bool> {
        Err(RustyGateError::StorageError("connection refused".to_string()))
    }
    async fn incr(&self, _key: &str) -> Result<i64> {
        Err(RustyGateError::StorageError("connection refused".to_string()))
    }
    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool> {
        Err(RustyGateError::StorageError("connection refused".to_string()))
    }
    async fn ttl(&self, _key: &str) -> Result<Option<Duration>> {
        Err(RustyGateError::StorageError("connection refused".to_string()))
    }
    async fn compare_and_swap(&self, _key: &str, _expected: &str, _new_value: &str) -> Result<bool> {
        Err(RustyGateError::StorageError("connection refused".to_string()))
    }
    async fn delete_prefix(&self, _prefix: &str) -> Result<usize> {
        Err(RustyGateError::StorageError("connection refused".to_string()))
    }
}

/// A cache that never answers in time
struct StalledCache;

#[async_trait]
impl CacheStore for StalledCache {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(None)
    }
    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
    async fn delete(&self, _key: &str) -> Result<bool> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(false)
    }
    async fn exists(&self, _key: &str) -> Result<bool> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(false)
    }
    async fn incr(&self, _key: &str) -> Result<i64> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(1)
    }
    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(false)
    }
    async fn ttl(&self, _key: &str) -> Result<Option<Duration>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(None)
    }
    async fn compare_and_swap(&self, _key: &str, _expected: &str, _new_value: &str) -> Result<bool> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(false)
    }
    async fn delete_prefix(&self, _prefix: &str) -> Result<usize> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(0)
    }
}

fn service_with_cache(cache: Arc<dyn CacheStore>) -> AuthService {
    let mut config = ServerConfig::for_testing();
    config.min_auth_response = Duration::ZERO;
    config.store_timeout = Duration::from_millis(50);
    AuthService::from_config(
        &config,
        Arc::new(MemoryRecordStore::new()),
        cache,
        Arc::new(RecordingNotifier::new()),
        Arc::new(SecurityLogger::new()),
    )
}

#[tokio::test]
async fn test_unreachable_revocation_store_denies() {
    let service = service_with_cache(Arc::new(UnreachableCache));
    let issued = service.tokens().issue(&subject(), TokenScope::Access, None).unwrap();

    let result = service.authenticate_token(&issued.token).await;
    assert!(matches!(result, Err(RustyGateError::StorageError(_))));

    let stats = service.security().get_event_stats().await;
    assert_eq!(stats.get("dependency_failure"), Some(&1));
}

#[tokio::test]
async fn test_stalled_store_times_out_and_denies() {
    let service = service_with_cache(Arc::new(StalledCache));
    let issued = service.tokens().issue(&subject(), TokenScope::Access, None).unwrap();

    let started = std::time::Instant::now();
    let result = service.authenticate_token(&issued.token).await;
    assert!(matches!(result, Err(RustyGateError::Timeout(_))));
    assert!(started.elapsed() < Duration::from_secs(5));

    assert!(matches!(
        service.login("alice", "P@ssw0rd1").await,
        Err(RustyGateError::Timeout(_))
    ));
}

#[tokio::test]
async fn test_unreachable_cache_blocks_login() {
    let service = service_with_cache(Arc::new(UnreachableCache));
    let result = service.login("alice", "P@ssw0rd1").await;
    assert!(result.unwrap_err().is_dependency_failure());
}
