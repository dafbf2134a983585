//! Credential codec: HMAC-signed bearer tokens

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::constants::{ACCESS_TOKEN_LIFETIME_SECS, REFRESH_TOKEN_LIFETIME_SECS, SHORT_TOKEN_LIFETIME_SECS};
use crate::error::{Result, RustyGateError};

/// Intended use of a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenScope {
    Access,
    Refresh,
    ResetPassword,
    EmailVerification,
}

impl TokenScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenScope::Access => "access",
            TokenScope::Refresh => "refresh",
            TokenScope::ResetPassword => "reset_password",
            TokenScope::EmailVerification => "email_verification",
        }
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity data carried by a credential
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenSubject {
    pub user_id: String,
    pub email: Option<String>,
    pub username: Option<String>,
    pub roles: Vec<String>,
}

impl TokenSubject {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }
}

/// JWT Claims structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    pub scope: TokenScope,
    /// Expiration time (as UTC timestamp)
    pub exp: i64,
    /// Issued at (as UTC timestamp)
    pub iat: i64,
    /// Unique token id
    pub jti: String,
}

impl Claims {
    pub fn subject(&self) -> TokenSubject {
        TokenSubject {
            user_id: self.user_id.clone(),
            email: self.email.clone(),
            username: self.username.clone(),
            roles: self.roles.clone(),
        }
    }
}

/// Registered claims read without enforcing expiry, used by revocation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisteredClaims {
    #[serde(default)]
    pub jti: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// A freshly signed credential together with the claims it carries
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

/// Default lifetime per scope
#[derive(Debug, Clone, Copy)]
pub struct TokenLifetimes {
    pub access: Duration,
    pub refresh: Duration,
    pub short: Duration,
}

impl TokenLifetimes {
    pub fn for_scope(&self, scope: TokenScope) -> Duration {
        match scope {
            TokenScope::Access => self.access,
            TokenScope::Refresh => self.refresh,
            TokenScope::ResetPassword | TokenScope::EmailVerification => self.short,
        }
    }
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access: Duration::from_secs(ACCESS_TOKEN_LIFETIME_SECS),
            refresh: Duration::from_secs(REFRESH_TOKEN_LIFETIME_SECS),
            short: Duration::from_secs(SHORT_TOKEN_LIFETIME_SECS),
        }
    }
}

const HMAC_FAMILY: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Manages JWT token operations
pub struct TokenManager {
    encoding_key: Option<EncodingKey>,
    decoding_key: DecodingKey,
    validation: Validation,
    inspection: Validation,
    lifetimes: TokenLifetimes,
}

impl TokenManager {
    /// Creates a new token manager with a secret. An empty secret yields a
    /// manager that can still reject tokens but refuses to sign.
    pub fn new(secret: &str) -> Self {
        Self::with_lifetimes(secret, TokenLifetimes::default())
    }

    pub fn with_lifetimes(secret: &str, lifetimes: TokenLifetimes) -> Self {
        let encoding_key = if secret.is_empty() {
            None
        } else {
            Some(EncodingKey::from_secret(secret.as_bytes()))
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = HMAC_FAMILY.to_vec();
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat"]);

        let mut inspection = validation.clone();
        inspection.validate_exp = false;
        inspection.required_spec_claims.clear();

        Self {
            encoding_key,
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            inspection,
            lifetimes,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::with_lifetimes(
            &config.jwt_secret,
            TokenLifetimes {
                access: config.access_token_lifetime,
                refresh: config.refresh_token_lifetime,
                short: config.short_token_lifetime,
            },
        )
    }

    pub fn lifetimes(&self) -> TokenLifetimes {
        self.lifetimes
    }

    /// Signs a new credential with a fresh unique id
    pub fn issue(
        &self,
        subject: &TokenSubject,
        scope: TokenScope,
        lifetime: Option<Duration>,
    ) -> Result<IssuedToken> {
        let key = self
            .encoding_key
            .as_ref()
            .ok_or_else(|| RustyGateError::SigningError("signing key is not configured".to_string()))?;

        let lifetime = lifetime.unwrap_or_else(|| self.lifetimes.for_scope(scope));
        let lifetime_secs = lifetime.as_secs() as i64;
        if lifetime_secs <= 0 {
            return Err(RustyGateError::ValidationError(
                "credential lifetime must be at least one second".to_string(),
            ));
        }

        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            user_id: subject.user_id.clone(),
            email: subject.email.clone(),
            username: subject.username.clone(),
            roles: subject.roles.clone(),
            scope,
            exp: now + lifetime_secs,
            iat: now,
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, key)
            .map_err(|e| RustyGateError::SigningError(e.to_string()))?;

        Ok(IssuedToken { token, claims })
    }

    /// Verifies signature, algorithm and expiry, returning the claims
    pub fn validate(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| self.map_decode_error(token, e))
    }

    /// Validates and additionally requires a specific scope
    pub fn validate_scoped(&self, token: &str, scope: TokenScope) -> Result<Claims> {
        let claims = self.validate(token)?;
        if claims.scope != scope {
            return Err(RustyGateError::InvalidScope {
                expected: scope.to_string(),
                actual: claims.scope.to_string(),
            });
        }
        Ok(claims)
    }

    /// Verifies the signature but not the expiry, returning optional
    /// registered claims
    pub fn inspect(&self, token: &str) -> Result<RegisteredClaims> {
        decode::<RegisteredClaims>(token, &self.decoding_key, &self.inspection)
            .map(|data| data.claims)
            .map_err(|e| self.map_decode_error(token, e))
    }

    fn map_decode_error(&self, token: &str, err: jsonwebtoken::errors::Error) -> RustyGateError {
        match err.kind() {
            ErrorKind::ExpiredSignature => RustyGateError::ExpiredCredential,
            ErrorKind::InvalidSignature => RustyGateError::InvalidSignature,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                let alg = decode_header(token)
                    .map(|header| format!("{:?}", header.alg))
                    .unwrap_or_else(|_| "unknown".to_string());
                RustyGateError::UnexpectedSigningMethod(alg)
            }
            _ => RustyGateError::MalformedCredential(err.to_string()),
        }
    }
}

/// Extracts bearer token from Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<String> {
    let header = auth_header.trim();
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "unit-test-hmac-key-0123456789abcdef";

    fn subject() -> TokenSubject {
        TokenSubject::new("user-1")
            .with_email("user@example.com")
            .with_username("user1")
            .with_roles(vec!["customer".to_string()])
    }

    #[test]
    fn test_issue_and_validate_round_trip() {
        let manager = TokenManager::new(KEY);
        let issued = manager.issue(&subject(), TokenScope::Access, None).unwrap();
        let claims = manager.validate(&issued.token).unwrap();
        assert_eq!(claims, issued.claims);
        assert_eq!(claims.subject(), subject());
        assert_eq!(claims.scope, TokenScope::Access);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_scope_default_lifetimes() {
        let manager = TokenManager::new(KEY);
        let cases = [
            (TokenScope::Access, 24 * 3600),
            (TokenScope::Refresh, 7 * 24 * 3600),
            (TokenScope::ResetPassword, 300),
            (TokenScope::EmailVerification, 300),
        ];
        for (scope, secs) in cases {
            let claims = manager.issue(&subject(), scope, None).unwrap().claims;
            assert_eq!(claims.exp - claims.iat, secs, "lifetime for {}", scope);
        }
    }

    #[test]
    fn test_lifetime_override_and_zero_rejected() {
        let manager = TokenManager::new(KEY);
        let claims = manager
            .issue(&subject(), TokenScope::Access, Some(Duration::from_secs(60)))
            .unwrap()
            .claims;
        assert_eq!(claims.exp - claims.iat, 60);
        assert!(manager.issue(&subject(), TokenScope::Access, Some(Duration::ZERO)).is_err());
    }

    #[test]
    fn test_unique_ids() {
        let manager = TokenManager::new(KEY);
        let a = manager.issue(&subject(), TokenScope::Access, None).unwrap();
        let b = manager.issue(&subject(), TokenScope::Access, None).unwrap();
        assert_ne!(a.claims.jti, b.claims.jti);
    }

    #[test]
    fn test_missing_key_is_signing_error() {
        let manager = TokenManager::new("");
        let result = manager.issue(&subject(), TokenScope::Access, None);
        assert!(matches!(result, Err(RustyGateError::SigningError(_))));
    }

    #[test]
    fn test_expired_credential() {
        let manager = TokenManager::new(KEY);
        let issued = manager
            .issue(&subject(), TokenScope::Access, Some(Duration::from_secs(1)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(2100));
        assert!(matches!(manager.validate(&issued.token), Err(RustyGateError::ExpiredCredential)));
        // Inspection still reads the registered claims of an expired token
        let registered = manager.inspect(&issued.token).unwrap();
        assert_eq!(registered.jti.as_deref(), Some(issued.claims.jti.as_str()));
    }

    #[test]
    fn test_wrong_key_is_invalid_signature() {
        let issuer = TokenManager::new(KEY);
        let verifier = TokenManager::new("another-hmac-key-fedcba9876543210");
        let issued = issuer.issue(&subject(), TokenScope::Access, None).unwrap();
        assert!(matches!(verifier.validate(&issued.token), Err(RustyGateError::InvalidSignature)));
    }

    #[test]
    fn test_non_hmac_algorithm_rejected() {
        // header {"alg":"RS256","typ":"JWT"} with a syntactically valid body
        let header = "eyJhbGciOiJSUzI1NiIsInR5cCI6IkpXVCJ9";
        let body = "eyJ1c2VyX2lkIjoieCJ9";
        let token = format!("{}.{}.c2lnbmF0dXJl", header, body);
        let manager = TokenManager::new(KEY);
        assert!(matches!(
            manager.validate(&token),
            Err(RustyGateError::UnexpectedSigningMethod(_))
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let manager = TokenManager::new(KEY);
        assert!(matches!(
            manager.validate("not-a-token"),
            Err(RustyGateError::MalformedCredential(_))
        ));
    }

    #[test]
    fn test_validate_scoped() {
        let manager = TokenManager::new(KEY);
        let refresh = manager.issue(&subject(), TokenScope::Refresh, None).unwrap();
        assert!(manager.validate_scoped(&refresh.token, TokenScope::Refresh).is_ok());
        assert!(matches!(
            manager.validate_scoped(&refresh.token, TokenScope::Access),
            Err(RustyGateError::InvalidScope { .. })
        ));
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi".to_string()));
        assert_eq!(extract_bearer_token("bearer  abc "), Some("abc".to_string()));
        assert_eq!(extract_bearer_token("Basic abc"), None);
        assert_eq!(extract_bearer_token("Bearer "), None);
        assert_eq!(extract_bearer_token("abc"), None);
    }
}
