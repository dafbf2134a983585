use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use serde::Serialize;

use crate::auth::token::TokenSubject;
use crate::constants::MIN_PASSWORD_LENGTH;
use crate::error::{Result, RustyGateError};
use crate::storage::traits::UserRecord;

/// Hash a password into PHC format with a fresh random salt
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Check a password against a stored PHC hash.
///
/// A hash that cannot be parsed never verifies.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            log::error!("Stored password hash is unreadable: {}", e);
            false
        }
    }
}

/// At least 8 characters with at least one letter and one digit
pub fn validate_password_policy(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(RustyGateError::ValidationError(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    if !password.chars().any(|c| c.is_alphabetic()) || !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(RustyGateError::ValidationError(
            "Password must contain a letter and a digit".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_username(username: &str) -> Result<()> {
    let valid = (3..=32).contains(&username.len())
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(RustyGateError::ValidationError(
            "Username must be 3-32 characters of letters, digits, '_', '-' or '.'".to_string(),
        ))
    }
}

pub fn validate_email(email: &str) -> Result<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };
    if valid && !email.chars().any(char::is_whitespace) {
        Ok(())
    } else {
        Err(RustyGateError::ValidationError(format!("'{}' is not a valid email address", email)))
    }
}

/// Canonical form of a login identifier. Emails compare case-insensitively,
/// so they are lowercased; usernames and phones cannot contain '@'.
pub fn normalize_identifier(identifier: &str) -> String {
    let identifier = identifier.trim();
    if identifier.contains('@') {
        identifier.to_ascii_lowercase()
    } else {
        identifier.to_string()
    }
}

/// E.164-ish: optional leading '+', then 6 to 15 digits
pub fn validate_phone(phone: &str) -> Result<()> {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if (6..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(RustyGateError::ValidationError(format!("'{}' is not a valid phone number", phone)))
    }
}

/// Build a fresh, active, unverified user row
pub fn new_user_record(
    username: &str,
    email: Option<&str>,
    phone: Option<&str>,
    password_hash: String,
) -> UserRecord {
    let now = Utc::now();
    UserRecord {
        id: uuid::Uuid::new_v4().to_string(),
        username: username.to_string(),
        email: email.map(|e| e.to_ascii_lowercase()),
        phone: phone.map(str::to_string),
        password_hash,
        is_active: true,
        email_verified: false,
        created_at: now,
        updated_at: now,
    }
}

/// Token subject for a user and the names of their effective roles
pub fn subject_for(user: &UserRecord, roles: Vec<String>) -> TokenSubject {
    let mut subject = TokenSubject::new(user.id.clone())
        .with_username(user.username.clone())
        .with_roles(roles);
    if let Some(email) = &user.email {
        subject = subject.with_email(email.clone());
    }
    subject
}

/// Public view of a user, without the password hash
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub email_verified: bool,
    pub created_at: chrono::DateTime<Utc>,
}

impl From<&UserRecord> for UserProfile {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            phone: user.phone.clone(),
            email_verified: user.email_verified,
            created_at: user.created_at,
        }
    }
}
