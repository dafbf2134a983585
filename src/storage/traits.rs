//! Abstract record-store interface
//!
//! The relational store of record is an external collaborator. This module
//! defines the rows the security core reads from it (users and the
//! role/permission graph) and the trait a backend implements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::permission::Action;
use crate::error::Result;

/// User account row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// PHC-format argon2 hash
    pub password_hash: String,
    pub is_active: bool,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    /// Whether `identifier` names this user by username, email or phone
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        self.username == identifier
            || self.email.as_deref().map_or(false, |e| e.eq_ignore_ascii_case(identifier))
            || self.phone.as_deref() == Some(identifier)
    }
}

/// Role row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
}

/// Permission row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRecord {
    pub id: String,
    pub resource: String,
    pub action: Action,
    pub description: Option<String>,
    pub is_active: bool,
}

/// User to role assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRoleAssignment {
    pub user_id: String,
    pub role_id: String,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub assigned_at: DateTime<Utc>,
}

impl UserRoleAssignment {
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |at| at > now)
    }
}

/// Role to permission grant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolePermissionGrant {
    pub role_id: String,
    pub permission_id: String,
    pub is_active: bool,
}

/// Permission granted (or explicitly withheld) directly to a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPermissionGrant {
    pub user_id: String,
    pub permission_id: String,
    pub granted: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub granted_at: DateTime<Utc>,
}

impl UserPermissionGrant {
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.granted && self.expires_at.map_or(true, |at| at > now)
    }
}

/// Record store interface
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Find a user by username, email or phone
    async fn find_user_by_identifier(&self, identifier: &str) -> Result<Option<UserRecord>>;

    /// Get user by ID
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>>;

    /// Create a new user; fails with a conflict if any identifier is taken
    async fn create_user(&self, user: UserRecord) -> Result<()>;

    /// Replace the stored password hash
    async fn update_password(&self, user_id: &str, password_hash: &str) -> Result<()>;

    /// Mark the user's email address as verified
    async fn mark_email_verified(&self, user_id: &str) -> Result<()>;

    /// All role assignments of a user, effective or not
    async fn user_role_assignments(&self, user_id: &str) -> Result<Vec<UserRoleAssignment>>;

    /// Get role by ID
    async fn get_role(&self, role_id: &str) -> Result<Option<Role>>;

    /// All permission grants of a role, active or not
    async fn role_permission_grants(&self, role_id: &str) -> Result<Vec<RolePermissionGrant>>;

    /// All direct permission grants of a user, effective or not
    async fn user_permission_grants(&self, user_id: &str) -> Result<Vec<UserPermissionGrant>>;

    /// Get permission by ID
    async fn get_permission(&self, permission_id: &str) -> Result<Option<PermissionRecord>>;

    /// Create or replace a role
    async fn upsert_role(&self, role: Role) -> Result<()>;

    /// Create or replace a permission
    async fn upsert_permission(&self, permission: PermissionRecord) -> Result<()>;

    /// Create or replace the assignment for (user, role)
    async fn upsert_role_assignment(&self, assignment: UserRoleAssignment) -> Result<()>;

    /// Create or replace the grant for (role, permission)
    async fn upsert_role_permission(&self, grant: RolePermissionGrant) -> Result<()>;

    /// Create or replace the direct grant for (user, permission)
    async fn upsert_user_permission(&self, grant: UserPermissionGrant) -> Result<()>;
}

/// Shared reference to a record store
pub type SharedRecordStore = Arc<dyn RecordStore>;
