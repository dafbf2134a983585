//! Authentication flows built on the security core
//!
//! `AuthService` owns explicit handles to the credential codec, revocation
//! store, login throttle, OTP manager and permission resolver, and drives
//! them for login, logout, refresh, registration, OTP login, password reset
//! and password change. It is also the request path: `authenticate` turns a
//! bearer header into a [`Session`] and `authorize` checks any-of
//! permissions. Every dependency failure on these paths denies.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::notifier::SharedNotifier;
use crate::auth::otp::{OtpManager, OtpPurpose};
use crate::auth::permission::{Permission, PermissionResolver, PermissionSet};
use crate::auth::throttle::LoginThrottle;
use crate::auth::token::{extract_bearer_token, Claims, IssuedToken, TokenManager, TokenScope};
use crate::auth::user::{
    hash_password, new_user_record, normalize_identifier, subject_for, validate_email, validate_password_policy,
    validate_phone, validate_username, verify_password, UserProfile,
};
use crate::config::ServerConfig;
use crate::error::{Result, RustyGateError};
use crate::security::AuthTimer;
use crate::security_logger::{token_fingerprint, SecurityEvent, SecurityLogger};
use crate::storage::cache::{with_deadline, SharedCacheStore};
use crate::storage::token_revocation::{RevocationReason, RevocationStore};
use crate::storage::traits::{SharedRecordStore, UserPermissionGrant, UserRecord, UserRoleAssignment};

/// Access + refresh credentials returned by a successful login
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Seconds until the access credential expires
    pub expires_in: i64,
    pub refresh_expires_in: i64,
}

impl TokenPair {
    fn new(access: IssuedToken, refresh: IssuedToken) -> Self {
        Self {
            expires_in: access.claims.exp - access.claims.iat,
            refresh_expires_in: refresh.claims.exp - refresh.claims.iat,
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer",
        }
    }
}

/// An authenticated request: the presented access credential and its claims
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub claims: Claims,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.claims.user_id
    }
}

pub struct AuthService {
    records: SharedRecordStore,
    tokens: Arc<TokenManager>,
    revocations: Arc<RevocationStore>,
    throttle: Arc<LoginThrottle>,
    otp: Arc<OtpManager>,
    permissions: Arc<PermissionResolver>,
    notifier: SharedNotifier,
    security: Arc<SecurityLogger>,
    deadline: Duration,
    min_auth_response: Duration,
}

impl AuthService {
    /// Wire every component of the security core from configuration
    pub fn from_config(
        config: &ServerConfig,
        records: SharedRecordStore,
        cache: SharedCacheStore,
        notifier: SharedNotifier,
        security: Arc<SecurityLogger>,
    ) -> Self {
        let tokens = Arc::new(TokenManager::from_config(config));
        let revocations = Arc::new(RevocationStore::new(
            cache.clone(),
            tokens.clone(),
            &config.cache_namespace,
            config.store_timeout,
        ));
        let throttle = Arc::new(LoginThrottle::from_config(cache.clone(), config));
        let otp = Arc::new(OtpManager::from_config(cache.clone(), config));
        let permissions = Arc::new(PermissionResolver::from_config(records.clone(), cache, config));

        Self {
            records,
            tokens,
            revocations,
            throttle,
            otp,
            permissions,
            notifier,
            security,
            deadline: config.store_timeout,
            min_auth_response: config.min_auth_response,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn revocations(&self) -> &Arc<RevocationStore> {
        &self.revocations
    }

    pub fn throttle(&self) -> &Arc<LoginThrottle> {
        &self.throttle
    }

    pub fn otp(&self) -> &Arc<OtpManager> {
        &self.otp
    }

    pub fn permissions(&self) -> &Arc<PermissionResolver> {
        &self.permissions
    }

    pub fn security(&self) -> &Arc<SecurityLogger> {
        &self.security
    }

    // ---- request path ----

    /// Turn an `Authorization` header into a session. Missing or non-bearer
    /// headers, invalid or non-access credentials and revoked credentials are
    /// all rejected; an unreachable revocation store rejects too.
    pub async fn authenticate(&self, auth_header: Option<&str>) -> Result<Session> {
        let token = auth_header
            .and_then(extract_bearer_token)
            .ok_or(RustyGateError::MissingCredentials)?;
        self.authenticate_token(&token).await
    }

    pub async fn authenticate_token(&self, token: &str) -> Result<Session> {
        let claims = self.validate(token, TokenScope::Access).await?;
        self.ensure_not_revoked(token, &claims).await?;
        Ok(Session {
            token: token.to_string(),
            claims,
        })
    }

    /// Any-of authorization for an authenticated subject
    pub async fn authorize(&self, claims: &Claims, required: &[Permission]) -> Result<PermissionSet> {
        match self.permissions.authorize(&claims.user_id, required).await {
            Err(RustyGateError::Forbidden(msg)) => {
                self.security
                    .log_event(SecurityEvent::PermissionDenied {
                        user_id: claims.user_id.clone(),
                        required: required.iter().map(|p| p.to_string()).collect(),
                    })
                    .await;
                Err(RustyGateError::Forbidden(msg))
            }
            other => self.observe("permission resolver", other).await,
        }
    }

    async fn validate(&self, token: &str, scope: TokenScope) -> Result<Claims> {
        match self.tokens.validate_scoped(token, scope) {
            Ok(claims) => Ok(claims),
            Err(e) => {
                self.security
                    .log_event(SecurityEvent::TokenRejected {
                        fingerprint: token_fingerprint(token),
                        reason: e.code().to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn ensure_not_revoked(&self, token: &str, claims: &Claims) -> Result<()> {
        let revoked = self
            .observe("revocation store", self.revocations.is_jti_revoked(&claims.jti).await)
            .await?;
        if revoked {
            self.security
                .log_event(SecurityEvent::TokenRejected {
                    fingerprint: token_fingerprint(token),
                    reason: RustyGateError::RevokedCredential.code().to_string(),
                })
                .await;
            return Err(RustyGateError::RevokedCredential);
        }
        Ok(())
    }

    async fn revoke(&self, token: &str, reason: RevocationReason) -> Result<()> {
        let revoked = self
            .observe("revocation store", self.revocations.revoke(token, reason).await)
            .await?;
        self.security
            .log_event(SecurityEvent::TokenRevoked {
                user_id: revoked.user_id,
                token_id: revoked.token_id,
                reason: reason.as_str().to_string(),
            })
            .await;
        Ok(())
    }

    /// Spend a single-use credential; a second presentation is rejected as revoked
    async fn consume(&self, token: &str) -> Result<()> {
        let spent = self
            .observe("revocation store", self.revocations.consume(token).await)
            .await?;
        self.security
            .log_event(SecurityEvent::TokenRevoked {
                user_id: spent.user_id,
                token_id: spent.token_id,
                reason: spent.reason.as_str().to_string(),
            })
            .await;
        Ok(())
    }

    /// Record dependency failures before handing the result back
    async fn observe<T>(&self, component: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_dependency_failure() {
                self.security
                    .log_event(SecurityEvent::DependencyFailure {
                        component: component.to_string(),
                        error: e.to_string(),
                    })
                    .await;
            }
        }
        result
    }

    // ---- login ----

    /// Password login by username, email or phone
    pub async fn login(&self, identifier: &str, password: &str) -> Result<TokenPair> {
        let result = AuthTimer::pad(
            self.min_auth_response,
            self.login_with_password(&normalize_identifier(identifier), password),
        )
        .await;
        self.observe("login", result).await
    }

    async fn login_with_password(&self, identifier: &str, password: &str) -> Result<TokenPair> {
        if identifier.is_empty() || password.is_empty() {
            return Err(RustyGateError::ValidationError(
                "Identifier and password are required".to_string(),
            ));
        }

        // A locked identifier never reaches the password check
        self.ensure_not_locked(identifier).await?;

        let user = match self.find_user(identifier).await? {
            Some(user) if verify_password(password, &user.password_hash) => user,
            _ => return Err(self.record_failure(identifier).await),
        };
        if !user.is_active {
            self.log_login_failed(identifier, "account disabled").await;
            return Err(RustyGateError::AccountDisabled);
        }

        self.throttle.clear(identifier).await?;
        let pair = self.issue_pair(&user).await?;
        self.security
            .log_event(SecurityEvent::LoginSucceeded {
                user_id: user.id.clone(),
                method: "password".to_string(),
            })
            .await;
        Ok(pair)
    }

    async fn ensure_not_locked(&self, identifier: &str) -> Result<()> {
        if !self.throttle.is_blocked(identifier).await? {
            return Ok(());
        }
        let remaining = self
            .throttle
            .lockout_remaining(identifier)
            .await?
            .unwrap_or_else(|| self.throttle.lockout_duration());
        self.log_login_failed(identifier, "locked out").await;
        Err(RustyGateError::AccountLocked(remaining))
    }

    async fn record_failure(&self, identifier: &str) -> RustyGateError {
        let attempts = match self.throttle.increment_failure(identifier).await {
            Ok(attempts) => attempts,
            Err(e) => return e,
        };
        self.log_login_failed(identifier, "invalid credentials").await;
        if attempts == self.throttle.max_attempts() {
            self.security
                .log_event(SecurityEvent::AccountLocked {
                    identifier: identifier.to_string(),
                    attempts,
                })
                .await;
        }
        RustyGateError::InvalidCredentials
    }

    async fn log_login_failed(&self, identifier: &str, reason: &str) {
        self.security
            .log_event(SecurityEvent::LoginFailed {
                identifier: identifier.to_string(),
                reason: reason.to_string(),
            })
            .await;
    }

    async fn find_user(&self, identifier: &str) -> Result<Option<UserRecord>> {
        with_deadline(self.deadline, "user lookup", self.records.find_user_by_identifier(identifier)).await
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        with_deadline(self.deadline, "user lookup", self.records.get_user(user_id)).await
    }

    async fn issue_pair(&self, user: &UserRecord) -> Result<TokenPair> {
        let roles = self.permissions.role_names(&user.id).await?;
        let subject = subject_for(user, roles);
        let access = self.tokens.issue(&subject, TokenScope::Access, None)?;
        let refresh = self.tokens.issue(&subject, TokenScope::Refresh, None)?;
        Ok(TokenPair::new(access, refresh))
    }

    /// Email a passwordless login code to a known, active account.
    /// Unknown identifiers get the same answer and no code.
    pub async fn request_login_otp(&self, identifier: &str) -> Result<()> {
        let result = AuthTimer::pad(
            self.min_auth_response,
            self.issue_for_known_user(&normalize_identifier(identifier), OtpPurpose::Login),
        )
        .await;
        self.observe("otp login request", result).await
    }

    pub async fn login_with_otp(&self, identifier: &str, code: &str) -> Result<TokenPair> {
        let result = AuthTimer::pad(
            self.min_auth_response,
            self.complete_otp_login(&normalize_identifier(identifier), code),
        )
        .await;
        self.observe("otp login", result).await
    }

    async fn complete_otp_login(&self, identifier: &str, code: &str) -> Result<TokenPair> {
        self.ensure_not_locked(identifier).await?;
        self.check_otp(identifier, code, OtpPurpose::Login).await?;

        let user = self
            .find_user(identifier)
            .await?
            .ok_or(RustyGateError::InvalidCredentials)?;
        if !user.is_active {
            return Err(RustyGateError::AccountDisabled);
        }

        self.throttle.clear(identifier).await?;
        let pair = self.issue_pair(&user).await?;
        self.security
            .log_event(SecurityEvent::LoginSucceeded {
                user_id: user.id.clone(),
                method: "otp".to_string(),
            })
            .await;
        Ok(pair)
    }

    async fn issue_for_known_user(&self, identifier: &str, purpose: OtpPurpose) -> Result<()> {
        match self.find_user(identifier).await? {
            Some(user) if user.is_active => self.send_otp(identifier, purpose).await,
            _ => {
                log::debug!("No active account for '{}', {} code not issued", identifier, purpose);
                Ok(())
            }
        }
    }

    async fn send_otp(&self, identifier: &str, purpose: OtpPurpose) -> Result<()> {
        let code = self.otp.issue(identifier, purpose).await?;
        self.notifier.send_code(identifier, purpose, &code).await?;
        self.security
            .log_event(SecurityEvent::OtpIssued {
                identifier: identifier.to_string(),
                purpose: purpose.to_string(),
            })
            .await;
        Ok(())
    }

    async fn check_otp(&self, identifier: &str, code: &str, purpose: OtpPurpose) -> Result<()> {
        match self.otp.verify(identifier, code, purpose).await {
            Err(RustyGateError::InvalidOtpCode { remaining_attempts }) => {
                self.security
                    .log_event(SecurityEvent::OtpFailed {
                        identifier: identifier.to_string(),
                        purpose: purpose.to_string(),
                        remaining_attempts,
                    })
                    .await;
                Err(RustyGateError::InvalidOtpCode { remaining_attempts })
            }
            Err(RustyGateError::OtpAttemptsExceeded) => {
                self.security
                    .log_event(SecurityEvent::OtpExhausted {
                        identifier: identifier.to_string(),
                        purpose: purpose.to_string(),
                    })
                    .await;
                Err(RustyGateError::OtpAttemptsExceeded)
            }
            other => other,
        }
    }

    // ---- session lifecycle ----

    /// Exchange a refresh credential for a new pair. The presented refresh
    /// credential is revoked so it cannot be replayed.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let claims = self.validate(refresh_token, TokenScope::Refresh).await?;
        self.ensure_not_revoked(refresh_token, &claims).await?;

        let user = self
            .get_user(&claims.user_id)
            .await?
            .ok_or(RustyGateError::InvalidCredentials)?;
        if !user.is_active {
            return Err(RustyGateError::AccountDisabled);
        }

        self.consume(refresh_token).await?;
        self.issue_pair(&user).await
    }

    /// Revoke the presented access credential and, if given, the refresh
    /// credential issued alongside it
    pub async fn logout(&self, access_token: &str, refresh_token: Option<&str>) -> Result<()> {
        let session = self.authenticate_token(access_token).await?;

        // Ownership is settled before anything is revoked
        let refresh_to_revoke = match refresh_token {
            Some(refresh_token) => match self.tokens.validate_scoped(refresh_token, TokenScope::Refresh) {
                Ok(claims) if claims.user_id == session.claims.user_id => Some(refresh_token),
                Ok(_) => {
                    return Err(RustyGateError::Forbidden(
                        "refresh credential belongs to another user".to_string(),
                    ))
                }
                // Nothing left to revoke
                Err(RustyGateError::ExpiredCredential) => None,
                Err(e) => return Err(e),
            },
            None => None,
        };

        self.revoke(&session.token, RevocationReason::UserLogout).await?;
        if let Some(refresh_token) = refresh_to_revoke {
            self.revoke(refresh_token, RevocationReason::UserLogout).await?;
        }

        log::info!("User {} logged out", session.claims.user_id);
        Ok(())
    }

    // ---- registration ----

    pub async fn register(
        &self,
        username: &str,
        email: Option<&str>,
        phone: Option<&str>,
        password: &str,
    ) -> Result<UserProfile> {
        let username = username.trim();
        let email = email.map(str::trim).filter(|e| !e.is_empty());
        let phone = phone.map(str::trim).filter(|p| !p.is_empty());

        validate_username(username)?;
        if let Some(email) = email {
            validate_email(email)?;
        }
        if let Some(phone) = phone {
            validate_phone(phone)?;
        }
        validate_password_policy(password)?;

        let user = new_user_record(username, email, phone, hash_password(password)?);
        with_deadline(self.deadline, "user create", self.records.create_user(user.clone())).await?;
        log::info!("Registered user {} ({})", user.id, user.username);

        if let Some(email) = &user.email {
            self.send_otp(email, OtpPurpose::Verification).await?;
        }
        Ok(UserProfile::from(&user))
    }

    /// Confirm an email address with its verification code
    pub async fn verify_email(&self, email: &str, code: &str) -> Result<IssuedToken> {
        let result = AuthTimer::pad(
            self.min_auth_response,
            self.confirm_email(&normalize_identifier(email), code),
        )
        .await;
        self.observe("email verification", result).await
    }

    async fn confirm_email(&self, email: &str, code: &str) -> Result<IssuedToken> {
        self.check_otp(email, code, OtpPurpose::Verification).await?;

        let user = self
            .find_user(email)
            .await?
            .ok_or_else(|| RustyGateError::NotFound("account".to_string()))?;
        with_deadline(self.deadline, "email verify", self.records.mark_email_verified(&user.id)).await?;

        let roles = self.permissions.role_names(&user.id).await?;
        self.tokens
            .issue(&subject_for(&user, roles), TokenScope::EmailVerification, None)
    }

    // ---- password reset and change ----

    /// Start a password reset. Always succeeds for well-formed input so the
    /// response reveals nothing about which identifiers exist.
    pub async fn forgot_password(&self, identifier: &str) -> Result<()> {
        let result = AuthTimer::pad(
            self.min_auth_response,
            self.issue_for_known_user(&normalize_identifier(identifier), OtpPurpose::ForgotPassword),
        )
        .await;
        self.observe("forgot password", result).await
    }

    /// Trade a valid reset code for a short-lived reset credential
    pub async fn verify_reset_otp(&self, identifier: &str, code: &str) -> Result<IssuedToken> {
        let result = AuthTimer::pad(
            self.min_auth_response,
            self.issue_reset_token(&normalize_identifier(identifier), code),
        )
        .await;
        self.observe("reset code verification", result).await
    }

    async fn issue_reset_token(&self, identifier: &str, code: &str) -> Result<IssuedToken> {
        self.check_otp(identifier, code, OtpPurpose::ForgotPassword).await?;
        let user = self
            .find_user(identifier)
            .await?
            .ok_or(RustyGateError::InvalidCredentials)?;
        self.tokens
            .issue(&subject_for(&user, Vec::new()), TokenScope::ResetPassword, None)
    }

    /// Set a new password with a reset credential, which is then spent
    pub async fn reset_password(&self, reset_token: &str, new_password: &str) -> Result<()> {
        let claims = self.validate(reset_token, TokenScope::ResetPassword).await?;
        self.ensure_not_revoked(reset_token, &claims).await?;
        validate_password_policy(new_password)?;

        let user = self
            .get_user(&claims.user_id)
            .await?
            .ok_or(RustyGateError::InvalidCredentials)?;

        // Spend the credential first so a failed revocation leaves the password untouched
        self.consume(reset_token).await?;
        let hash = hash_password(new_password)?;
        with_deadline(self.deadline, "password update", self.records.update_password(&user.id, &hash)).await?;

        for identifier in std::iter::once(&user.username)
            .chain(user.email.iter())
            .chain(user.phone.iter())
        {
            self.throttle.clear(identifier).await?;
        }

        self.security
            .log_event(SecurityEvent::PasswordChanged {
                user_id: user.id,
                via: "reset".to_string(),
            })
            .await;
        Ok(())
    }

    /// Change the password of an authenticated user. The access credential
    /// used for the change is revoked.
    pub async fn change_password(&self, access_token: &str, old_password: &str, new_password: &str) -> Result<()> {
        let session = self.authenticate_token(access_token).await?;
        let user = self
            .get_user(session.user_id())
            .await?
            .ok_or(RustyGateError::InvalidCredentials)?;

        if !verify_password(old_password, &user.password_hash) {
            return Err(RustyGateError::InvalidCredentials);
        }
        validate_password_policy(new_password)?;
        if old_password == new_password {
            return Err(RustyGateError::ValidationError(
                "New password must differ from the current one".to_string(),
            ));
        }

        self.revoke(&session.token, RevocationReason::CredentialChange).await?;
        let hash = hash_password(new_password)?;
        with_deadline(self.deadline, "password update", self.records.update_password(&user.id, &hash)).await?;

        self.security
            .log_event(SecurityEvent::PasswordChanged {
                user_id: user.id,
                via: "change".to_string(),
            })
            .await;
        Ok(())
    }

    // ---- profile and permission administration ----

    pub async fn profile(&self, user_id: &str) -> Result<UserProfile> {
        self.get_user(user_id)
            .await?
            .map(|user| UserProfile::from(&user))
            .ok_or_else(|| RustyGateError::NotFound(format!("User {}", user_id)))
    }

    pub async fn effective_permissions(&self, user_id: &str) -> Result<PermissionSet> {
        let result = self.permissions.resolve_cached(user_id).await;
        self.observe("permission resolver", result).await
    }

    pub async fn assign_role(&self, user_id: &str, role_id: &str, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        self.put_assignment(user_id, role_id, true, expires_at).await
    }

    pub async fn revoke_role(&self, user_id: &str, role_id: &str) -> Result<()> {
        self.put_assignment(user_id, role_id, false, None).await
    }

    async fn put_assignment(
        &self,
        user_id: &str,
        role_id: &str,
        is_active: bool,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let assignment = UserRoleAssignment {
            user_id: user_id.to_string(),
            role_id: role_id.to_string(),
            is_active,
            expires_at,
            assigned_at: Utc::now(),
        };
        with_deadline(self.deadline, "role assignment", self.records.upsert_role_assignment(assignment)).await?;
        self.permissions.invalidate(user_id).await
    }

    /// Grant (or, with `granted = false`, withdraw) a permission directly
    pub async fn grant_permission(
        &self,
        user_id: &str,
        permission_id: &str,
        granted: bool,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let grant = UserPermissionGrant {
            user_id: user_id.to_string(),
            permission_id: permission_id.to_string(),
            granted,
            expires_at,
            granted_at: Utc::now(),
        };
        with_deadline(self.deadline, "permission grant", self.records.upsert_user_permission(grant)).await?;
        self.permissions.invalidate(user_id).await
    }

    /// Drop every revocation marker
    pub async fn clear_revocations(&self) -> Result<usize> {
        let result = self.revocations.clear().await;
        self.observe("revocation store", result).await
    }
}
