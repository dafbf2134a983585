// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3030;
pub const DEFAULT_CACHE_NAMESPACE: &str = "auth";

// Credential lifetimes (seconds)
pub const ACCESS_TOKEN_LIFETIME_SECS: u64 = 24 * 3600;
pub const REFRESH_TOKEN_LIFETIME_SECS: u64 = 7 * 24 * 3600;
pub const SHORT_TOKEN_LIFETIME_SECS: u64 = 5 * 60;

// Login throttling
pub const LOGIN_MAX_FAILED_ATTEMPTS: i64 = 5;
pub const LOGIN_LOCKOUT_SECS: u64 = 15 * 60;
pub const LOGIN_KEY_PREFIX: &str = "login";

// One-time codes
pub const OTP_LENGTH: usize = 6;
pub const OTP_LIFETIME_SECS: u64 = 5 * 60;
pub const OTP_MAX_ATTEMPTS: u32 = 3;
pub const OTP_KEY_PREFIX: &str = "otp";

// Shared store deadline
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 2000;

// Password policy
pub const MIN_PASSWORD_LENGTH: usize = 8;

// Floor on login/OTP response latency
pub const MIN_AUTH_RESPONSE_MS: u64 = 100;
