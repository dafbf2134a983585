//! Server configuration module
//! Handles the security core's tunables and the HTTP listener settings

use crate::constants::{
    ACCESS_TOKEN_LIFETIME_SECS, DEFAULT_CACHE_NAMESPACE, DEFAULT_HOST, DEFAULT_PORT,
    DEFAULT_STORE_TIMEOUT_MS, LOGIN_LOCKOUT_SECS, LOGIN_MAX_FAILED_ATTEMPTS, MIN_AUTH_RESPONSE_MS, OTP_LIFETIME_SECS,
    OTP_MAX_ATTEMPTS, REFRESH_TOKEN_LIFETIME_SECS, SHORT_TOKEN_LIFETIME_SECS,
};
use crate::error::{Result, RustyGateError};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// HMAC secret for credential signing/validation
    pub jwt_secret: String,
    /// Prefix for revocation markers and permission cache entries
    pub cache_namespace: String,
    pub access_token_lifetime: Duration,
    pub refresh_token_lifetime: Duration,
    /// Lifetime of reset-password and email-verification credentials
    pub short_token_lifetime: Duration,
    /// Failed logins before an identifier is locked
    pub max_failed_logins: i64,
    pub lockout_duration: Duration,
    pub otp_lifetime: Duration,
    pub otp_max_attempts: u32,
    /// None keeps cached permission sets until explicitly invalidated
    pub permission_cache_ttl: Option<Duration>,
    /// Deadline applied to every shared-store call
    pub store_timeout: Duration,
    /// Minimum latency of login and one-time-code responses
    pub min_auth_response: Duration,
    /// Development mode (relaxes nothing security-relevant, only logs more)
    pub development_mode: bool,
    /// TLS configuration
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    pub enable_tls: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        panic!("ServerConfig::default() is not allowed for security reasons. Use ServerConfig::from_env() instead.");
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_flag(value: Option<String>) -> bool {
    value
        .map(|v| v.to_lowercase() == "true" || v == "1")
        .unwrap_or(false)
}

impl ServerConfig {
    /// Create a test configuration - DANGEROUS: Only for testing!
    pub fn for_testing() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            jwt_secret: "test-jwt-key-only-for-unit-tests-never-use-in-production".to_string(),
            cache_namespace: DEFAULT_CACHE_NAMESPACE.to_string(),
            access_token_lifetime: Duration::from_secs(ACCESS_TOKEN_LIFETIME_SECS),
            refresh_token_lifetime: Duration::from_secs(REFRESH_TOKEN_LIFETIME_SECS),
            short_token_lifetime: Duration::from_secs(SHORT_TOKEN_LIFETIME_SECS),
            max_failed_logins: LOGIN_MAX_FAILED_ATTEMPTS,
            lockout_duration: Duration::from_secs(LOGIN_LOCKOUT_SECS),
            otp_lifetime: Duration::from_secs(OTP_LIFETIME_SECS),
            otp_max_attempts: OTP_MAX_ATTEMPTS,
            permission_cache_ttl: None,
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            min_auth_response: Duration::from_millis(MIN_AUTH_RESPONSE_MS),
            development_mode: true,
            tls_cert_path: None,
            tls_key_path: None,
            enable_tls: false,
        }
    }

    /// Validate that a secret meets security requirements
    fn validate_secret(secret: &str, secret_type: &str) -> Result<()> {
        if secret.len() < 32 {
            return Err(RustyGateError::ConfigError(format!(
                "{} secret must be at least 32 characters long",
                secret_type
            )));
        }

        // Check for insecure default or example values
        let insecure_patterns = [
            "your-secret-key",
            "change-this",
            "changeme",
            "test-secret",
            "default",
            "secret",
            "password",
            "12345",
        ];

        for pattern in &insecure_patterns {
            if secret.to_lowercase().contains(pattern) {
                return Err(RustyGateError::ConfigError(format!(
                    "{} secret contains insecure pattern '{}'. Please use a secure random secret generated with: openssl rand -base64 32",
                    secret_type, pattern
                )));
            }
        }

        // Ensure some complexity
        if secret.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(RustyGateError::ConfigError(format!(
                "{} secret should contain mixed characters (letters, numbers, symbols) for security",
                secret_type
            )));
        }

        Ok(())
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("RUSTY_GATE_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = parse_or(lookup("RUSTY_GATE_PORT"), DEFAULT_PORT);

        let jwt_secret = lookup("RUSTY_GATE_JWT_SECRET")
            .or_else(|| lookup("JWT_SECRET"))
            .ok_or_else(|| {
                RustyGateError::ConfigError(
                    "JWT_SECRET environment variable is required for security. \
                     Generate one with: openssl rand -base64 32"
                        .to_string(),
                )
            })?;
        Self::validate_secret(&jwt_secret, "JWT")?;

        let cache_namespace = lookup("RUSTY_GATE_CACHE_NAMESPACE")
            .filter(|ns| !ns.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CACHE_NAMESPACE.to_string());
        if cache_namespace.contains(':') {
            return Err(RustyGateError::ConfigError(
                "RUSTY_GATE_CACHE_NAMESPACE must not contain ':'".to_string(),
            ));
        }

        let access_secs = parse_or(lookup("RUSTY_GATE_ACCESS_TOKEN_SECS"), ACCESS_TOKEN_LIFETIME_SECS);
        let refresh_secs = parse_or(lookup("RUSTY_GATE_REFRESH_TOKEN_SECS"), REFRESH_TOKEN_LIFETIME_SECS);
        let short_secs = parse_or(lookup("RUSTY_GATE_SHORT_TOKEN_SECS"), SHORT_TOKEN_LIFETIME_SECS);
        if access_secs == 0 || refresh_secs == 0 || short_secs == 0 {
            return Err(RustyGateError::ConfigError(
                "Token lifetimes must be greater than zero".to_string(),
            ));
        }

        let max_failed_logins = parse_or(lookup("RUSTY_GATE_MAX_FAILED_LOGINS"), LOGIN_MAX_FAILED_ATTEMPTS);
        if max_failed_logins < 1 {
            return Err(RustyGateError::ConfigError(
                "RUSTY_GATE_MAX_FAILED_LOGINS must be at least 1".to_string(),
            ));
        }
        let lockout_secs = parse_or(lookup("RUSTY_GATE_LOCKOUT_SECS"), LOGIN_LOCKOUT_SECS);
        if lockout_secs == 0 {
            return Err(RustyGateError::ConfigError(
                "RUSTY_GATE_LOCKOUT_SECS must be greater than zero".to_string(),
            ));
        }

        let otp_secs = parse_or(lookup("RUSTY_GATE_OTP_LIFETIME_SECS"), OTP_LIFETIME_SECS);
        let otp_max_attempts = parse_or(lookup("RUSTY_GATE_OTP_MAX_ATTEMPTS"), OTP_MAX_ATTEMPTS);
        if otp_secs == 0 || otp_max_attempts == 0 {
            return Err(RustyGateError::ConfigError(
                "OTP lifetime and attempt limit must be greater than zero".to_string(),
            ));
        }

        let permission_cache_ttl = lookup("RUSTY_GATE_PERMISSION_CACHE_TTL_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let store_timeout_ms = parse_or(lookup("RUSTY_GATE_STORE_TIMEOUT_MS"), DEFAULT_STORE_TIMEOUT_MS);

        let min_auth_response_ms = parse_or(lookup("RUSTY_GATE_MIN_AUTH_RESPONSE_MS"), MIN_AUTH_RESPONSE_MS);

        let development_mode = parse_flag(lookup("RUSTY_GATE_DEVELOPMENT_MODE"));

        // TLS configuration
        let enable_tls = parse_flag(lookup("RUSTY_GATE_ENABLE_TLS"));
        let tls_cert_path = lookup("RUSTY_GATE_TLS_CERT_PATH");
        let tls_key_path = lookup("RUSTY_GATE_TLS_KEY_PATH");

        if enable_tls {
            match (&tls_cert_path, &tls_key_path) {
                (Some(cert_path), Some(key_path)) => {
                    if !std::path::Path::new(cert_path).exists() {
                        return Err(RustyGateError::ConfigError(format!(
                            "TLS certificate file does not exist: {}",
                            cert_path
                        )));
                    }
                    if !std::path::Path::new(key_path).exists() {
                        return Err(RustyGateError::ConfigError(format!(
                            "TLS private key file does not exist: {}",
                            key_path
                        )));
                    }
                }
                _ => {
                    return Err(RustyGateError::ConfigError(
                        "TLS is enabled but RUSTY_GATE_TLS_CERT_PATH or RUSTY_GATE_TLS_KEY_PATH is not set"
                            .to_string(),
                    ))
                }
            }
        }

        Ok(Self {
            host,
            port,
            jwt_secret,
            cache_namespace,
            access_token_lifetime: Duration::from_secs(access_secs),
            refresh_token_lifetime: Duration::from_secs(refresh_secs),
            short_token_lifetime: Duration::from_secs(short_secs),
            max_failed_logins,
            lockout_duration: Duration::from_secs(lockout_secs),
            otp_lifetime: Duration::from_secs(otp_secs),
            otp_max_attempts,
            permission_cache_ttl,
            store_timeout: Duration::from_millis(store_timeout_ms),
            min_auth_response: Duration::from_millis(min_auth_response_ms),
            development_mode,
            enable_tls,
            tls_cert_path,
            tls_key_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const GOOD_KEY: &str = "k7Hq2v9XbLp4Rz8Wn3Tj6Ys1Md5Fc0Ga";

    #[test]
    #[should_panic(expected = "ServerConfig::default() is not allowed for security reasons")]
    fn test_default_panics() {
        let _ = ServerConfig::default();
    }

    #[test]
    fn test_requires_jwt_secret() {
        let result = ServerConfig::from_lookup(lookup_from(&[]));
        assert!(result.unwrap_err().to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn test_rejects_weak_secrets() {
        for weak in ["short", "my-password-is-long-enough-for-length-check", "abcdefghijklmnopqrstuvwxyzabcdefgh"] {
            let result = ServerConfig::from_lookup(lookup_from(&[("RUSTY_GATE_JWT_SECRET", weak)]));
            assert!(result.is_err(), "accepted weak secret {}", weak);
        }
    }

    #[test]
    fn test_defaults_match_security_policy() {
        let config = ServerConfig::from_lookup(lookup_from(&[("RUSTY_GATE_JWT_SECRET", GOOD_KEY)])).unwrap();
        assert_eq!(config.access_token_lifetime, Duration::from_secs(24 * 3600));
        assert_eq!(config.refresh_token_lifetime, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(config.short_token_lifetime, Duration::from_secs(300));
        assert_eq!(config.max_failed_logins, 5);
        assert_eq!(config.lockout_duration, Duration::from_secs(900));
        assert_eq!(config.otp_max_attempts, 3);
        assert_eq!(config.cache_namespace, "auth");
        assert!(config.permission_cache_ttl.is_none());
    }

    #[test]
    fn test_overrides_and_namespace_validation() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", GOOD_KEY),
            ("RUSTY_GATE_PERMISSION_CACHE_TTL_SECS", "120"),
            ("RUSTY_GATE_PORT", "8081"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8081);
        assert_eq!(config.permission_cache_ttl, Some(Duration::from_secs(120)));

        let result = ServerConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", GOOD_KEY),
            ("RUSTY_GATE_CACHE_NAMESPACE", "a:b"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_zero_lockout_and_otp_limits() {
        for (key, value) in [
            ("RUSTY_GATE_LOCKOUT_SECS", "0"),
            ("RUSTY_GATE_OTP_LIFETIME_SECS", "0"),
            ("RUSTY_GATE_OTP_MAX_ATTEMPTS", "0"),
        ] {
            let result = ServerConfig::from_lookup(lookup_from(&[("JWT_SECRET", GOOD_KEY), (key, value)]));
            assert!(
                matches!(result, Err(RustyGateError::ConfigError(_))),
                "accepted {}={}",
                key,
                value
            );
        }
    }

    #[test]
    fn test_tls_requires_paths() {
        let result = ServerConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", GOOD_KEY),
            ("RUSTY_GATE_ENABLE_TLS", "true"),
        ]));
        assert!(result.unwrap_err().to_string().contains("TLS"));
    }
}
