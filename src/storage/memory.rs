//! In-memory record store for development and testing
//!
//! Keeps users and the role/permission graph in memory. Suitable for
//! development, tests, or a single-node demo deployment.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::traits::*;
use crate::error::{Result, RustyGateError};

/// In-memory combined record store
pub struct MemoryRecordStore {
    users: RwLock<HashMap<String, UserRecord>>,
    roles: RwLock<HashMap<String, Role>>,
    permissions: RwLock<HashMap<String, PermissionRecord>>,
    role_assignments: RwLock<HashMap<(String, String), UserRoleAssignment>>, // (user_id, role_id) -> assignment
    role_permissions: RwLock<HashMap<(String, String), RolePermissionGrant>>, // (role_id, permission_id) -> grant
    user_permissions: RwLock<HashMap<(String, String), UserPermissionGrant>>, // (user_id, permission_id) -> grant
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            roles: RwLock::new(HashMap::new()),
            permissions: RwLock::new(HashMap::new()),
            role_assignments: RwLock::new(HashMap::new()),
            role_permissions: RwLock::new(HashMap::new()),
            user_permissions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_user_by_identifier(&self, identifier: &str) -> Result<Option<UserRecord>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.matches_identifier(identifier)).cloned())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn create_user(&self, user: UserRecord) -> Result<()> {
        let mut users = self.users.write().await;

        if users.contains_key(&user.id) {
            return Err(RustyGateError::Conflict(format!("User {} already exists", user.id)));
        }
        let taken = users.values().any(|existing| {
            existing.matches_identifier(&user.username)
                || user.email.as_deref().map_or(false, |e| existing.matches_identifier(e))
                || user.phone.as_deref().map_or(false, |p| existing.matches_identifier(p))
        });
        if taken {
            return Err(RustyGateError::Conflict(
                "Username, email or phone is already registered".to_string(),
            ));
        }

        users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn update_password(&self, user_id: &str, password_hash: &str) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| RustyGateError::NotFound(format!("User {} not found", user_id)))?;
        user.password_hash = password_hash.to_string();
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_email_verified(&self, user_id: &str) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| RustyGateError::NotFound(format!("User {} not found", user_id)))?;
        user.email_verified = true;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn user_role_assignments(&self, user_id: &str) -> Result<Vec<UserRoleAssignment>> {
        let assignments = self.role_assignments.read().await;
        Ok(assignments
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_role(&self, role_id: &str) -> Result<Option<Role>> {
        Ok(self.roles.read().await.get(role_id).cloned())
    }

    async fn role_permission_grants(&self, role_id: &str) -> Result<Vec<RolePermissionGrant>> {
        let grants = self.role_permissions.read().await;
        Ok(grants.values().filter(|g| g.role_id == role_id).cloned().collect())
    }

    async fn user_permission_grants(&self, user_id: &str) -> Result<Vec<UserPermissionGrant>> {
        let grants = self.user_permissions.read().await;
        Ok(grants.values().filter(|g| g.user_id == user_id).cloned().collect())
    }

    async fn get_permission(&self, permission_id: &str) -> Result<Option<PermissionRecord>> {
        Ok(self.permissions.read().await.get(permission_id).cloned())
    }

    async fn upsert_role(&self, role: Role) -> Result<()> {
        self.roles.write().await.insert(role.id.clone(), role);
        Ok(())
    }

    async fn upsert_permission(&self, permission: PermissionRecord) -> Result<()> {
        self.permissions
            .write()
            .await
            .insert(permission.id.clone(), permission);
        Ok(())
    }

    async fn upsert_role_assignment(&self, assignment: UserRoleAssignment) -> Result<()> {
        if !self.users.read().await.contains_key(&assignment.user_id) {
            return Err(RustyGateError::NotFound(format!("User {} not found", assignment.user_id)));
        }
        if !self.roles.read().await.contains_key(&assignment.role_id) {
            return Err(RustyGateError::NotFound(format!("Role {} not found", assignment.role_id)));
        }
        let key = (assignment.user_id.clone(), assignment.role_id.clone());
        self.role_assignments.write().await.insert(key, assignment);
        Ok(())
    }

    async fn upsert_role_permission(&self, grant: RolePermissionGrant) -> Result<()> {
        if !self.permissions.read().await.contains_key(&grant.permission_id) {
            return Err(RustyGateError::NotFound(format!("Permission {} not found", grant.permission_id)));
        }
        let key = (grant.role_id.clone(), grant.permission_id.clone());
        self.role_permissions.write().await.insert(key, grant);
        Ok(())
    }

    async fn upsert_user_permission(&self, grant: UserPermissionGrant) -> Result<()> {
        if !self.permissions.read().await.contains_key(&grant.permission_id) {
            return Err(RustyGateError::NotFound(format!("Permission {} not found", grant.permission_id)));
        }
        let key = (grant.user_id.clone(), grant.permission_id.clone());
        self.user_permissions.write().await.insert(key, grant);
        Ok(())
    }
}
