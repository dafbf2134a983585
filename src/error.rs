use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Broad classification used by callers to pick a response and to decide
/// whether a failure must be treated as a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad request material: rejected immediately, never retried
    Input,
    /// Terminal for the current request with a specific reason
    State,
    /// Shared cache or record store unavailable: fail closed
    Dependency,
}

#[derive(Debug)]
pub enum RustyGateError {
    // Credential codec errors
    SigningError(String),
    ExpiredCredential,
    UnexpectedSigningMethod(String),
    MalformedCredential(String),
    InvalidSignature,
    InvalidScope { expected: String, actual: String },
    MissingCredentials,

    // Revocation errors
    MissingUniqueId,
    MissingExpiry,
    AlreadyExpired,
    RevokedCredential,

    // Login errors
    InvalidCredentials,
    AccountLocked(Duration),
    AccountDisabled,

    // OTP errors
    OtpNotFound,
    OtpAttemptsExceeded,
    InvalidOtpCode { remaining_attempts: u32 },

    // Authorization errors
    Forbidden(String),

    // Record errors
    NotFound(String),
    Conflict(String),

    // Validation errors
    ValidationError(String),
    PayloadTooLarge(u64),

    // Dependency errors
    StorageError(String),
    Timeout(String),

    // Configuration errors
    ConfigError(String),
}

impl RustyGateError {
    /// Classify the error for response mapping and fail-closed decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MalformedCredential(_)
            | Self::UnexpectedSigningMethod(_)
            | Self::InvalidSignature
            | Self::MissingCredentials
            | Self::MissingUniqueId
            | Self::MissingExpiry
            | Self::ValidationError(_)
            | Self::PayloadTooLarge(_) => ErrorClass::Input,
            Self::StorageError(_) | Self::Timeout(_) | Self::SigningError(_) | Self::ConfigError(_) => {
                ErrorClass::Dependency
            }
            _ => ErrorClass::State,
        }
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::SigningError(_) => "signing_error",
            Self::ExpiredCredential => "expired_credential",
            Self::UnexpectedSigningMethod(_) => "unexpected_signing_method",
            Self::MalformedCredential(_) => "malformed_credential",
            Self::InvalidSignature => "invalid_signature",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::MissingCredentials => "missing_credentials",
            Self::MissingUniqueId => "missing_unique_id",
            Self::MissingExpiry => "missing_expiry",
            Self::AlreadyExpired => "already_expired",
            Self::RevokedCredential => "revoked_credential",
            Self::InvalidCredentials => "invalid_credentials",
            Self::AccountLocked(_) => "account_locked",
            Self::AccountDisabled => "account_disabled",
            Self::OtpNotFound => "otp_not_found",
            Self::OtpAttemptsExceeded => "otp_attempts_exceeded",
            Self::InvalidOtpCode { .. } => "invalid_otp_code",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::ValidationError(_) => "validation_error",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::StorageError(_) => "storage_unavailable",
            Self::Timeout(_) => "timeout",
            Self::ConfigError(_) => "config_error",
        }
    }

    pub fn is_dependency_failure(&self) -> bool {
        self.class() == ErrorClass::Dependency
    }
}

impl fmt::Display for RustyGateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SigningError(msg) => write!(f, "Failed to sign credential: {}", msg),
            Self::ExpiredCredential => write!(f, "Credential has expired"),
            Self::UnexpectedSigningMethod(alg) => write!(f, "Unexpected signing method: {}", alg),
            Self::MalformedCredential(msg) => write!(f, "Malformed credential: {}", msg),
            Self::InvalidSignature => write!(f, "Credential signature is invalid"),
            Self::InvalidScope { expected, actual } => {
                write!(f, "Credential scope '{}' cannot be used where '{}' is required", actual, expected)
            }
            Self::MissingCredentials => write!(f, "Missing bearer credential"),
            Self::MissingUniqueId => write!(f, "Credential has no unique id"),
            Self::MissingExpiry => write!(f, "Credential has no expiry"),
            Self::AlreadyExpired => write!(f, "Credential is already expired"),
            Self::RevokedCredential => write!(f, "Credential has been revoked"),
            Self::InvalidCredentials => write!(f, "Invalid identifier or password"),
            Self::AccountLocked(remaining) => {
                let minutes = (remaining.as_secs() + 59) / 60;
                write!(f, "Too many failed attempts, account locked for {} minute(s)", minutes.max(1))
            }
            Self::AccountDisabled => write!(f, "Account is disabled"),
            Self::OtpNotFound => write!(f, "No active one-time code, request a new one"),
            Self::OtpAttemptsExceeded => write!(f, "Too many invalid attempts, request a new code"),
            Self::InvalidOtpCode { remaining_attempts } => {
                write!(f, "Invalid code, {} attempt(s) remaining", remaining_attempts)
            }
            Self::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
            Self::Conflict(msg) => write!(f, "Conflict: {}", msg),
            Self::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Self::PayloadTooLarge(limit) => write!(f, "Request body exceeds {} bytes", limit),
            Self::StorageError(msg) => write!(f, "Storage error: {}", msg),
            Self::Timeout(op) => write!(f, "Timed out waiting for {}", op),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for RustyGateError {}

impl From<serde_json::Error> for RustyGateError {
    fn from(err: serde_json::Error) -> Self {
        RustyGateError::StorageError(format!("Serialization failed: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for RustyGateError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        RustyGateError::MalformedCredential(err.to_string())
    }
}

impl From<argon2::password_hash::Error> for RustyGateError {
    fn from(err: argon2::password_hash::Error) -> Self {
        RustyGateError::StorageError(format!("Password hashing failed: {}", err))
    }
}

// Generic result type for RustyGate
pub type Result<T> = std::result::Result<T, RustyGateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(RustyGateError::MissingCredentials.class(), ErrorClass::Input);
        assert_eq!(RustyGateError::RevokedCredential.class(), ErrorClass::State);
        assert_eq!(RustyGateError::OtpAttemptsExceeded.class(), ErrorClass::State);
        assert!(RustyGateError::StorageError("down".into()).is_dependency_failure());
        assert!(RustyGateError::Timeout("cache".into()).is_dependency_failure());
    }

    #[test]
    fn test_lockout_message_rounds_up_minutes() {
        let err = RustyGateError::AccountLocked(Duration::from_secs(14 * 60 + 1));
        assert!(err.to_string().contains("15 minute"));
    }
}
