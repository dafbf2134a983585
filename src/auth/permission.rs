//! Permission model and the cache-aside permission resolver
//!
//! A user's effective permissions are the union of what their active,
//! unexpired role assignments reach and what was granted to them directly.
//! The resolved set is cached as JSON under
//! `<namespace>:user:<user-id>:permissions`; the record store stays the
//! source of truth and cache entries are always replaced wholesale.

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::{Result, RustyGateError};
use crate::storage::cache::{with_deadline, SharedCacheStore};
use crate::storage::traits::SharedRecordStore;

/// Operation a permission allows on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    List,
    Manage,
    Export,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::List => "list",
            Action::Manage => "manage",
            Action::Export => "export",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = RustyGateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Action::Create),
            "read" => Ok(Action::Read),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            "list" => Ok(Action::List),
            "manage" => Ok(Action::Manage),
            "export" => Ok(Action::Export),
            other => Err(RustyGateError::ValidationError(format!("Unknown action '{}'", other))),
        }
    }
}

/// A single `resource:action` capability
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub resource: String,
    pub action: Action,
}

impl Permission {
    pub fn new(resource: impl Into<String>, action: Action) -> Self {
        Self {
            resource: resource.into(),
            action,
        }
    }

    /// Parse `resource:action`
    pub fn parse(value: &str) -> Result<Self> {
        let (resource, action) = value
            .split_once(':')
            .ok_or_else(|| RustyGateError::ValidationError(format!("Permission '{}' is not resource:action", value)))?;
        if resource.is_empty() {
            return Err(RustyGateError::ValidationError(format!("Permission '{}' has no resource", value)));
        }
        Ok(Self::new(resource, action.parse()?))
    }

    /// Parse a list of `resource:action` strings
    pub fn parse_all<S: AsRef<str>>(values: &[S]) -> Result<Vec<Self>> {
        values.iter().map(|v| Self::parse(v.as_ref())).collect()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

impl Ord for Permission {
    fn cmp(&self, other: &Self) -> Ordering {
        self.resource
            .cmp(&other.resource)
            .then_with(|| self.action.as_str().cmp(other.action.as_str()))
    }
}

impl PartialOrd for Permission {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Deduplicated, resource/action-ordered permission list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PermissionSet(Vec<Permission>);

// Entries may come from any cache writer, so order and uniqueness are restored
impl<'de> Deserialize<'de> for PermissionSet {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<Permission>::deserialize(deserializer).map(|permissions| permissions.into_iter().collect())
    }
}

impl PermissionSet {
    pub fn contains(&self, permission: &Permission) -> bool {
        self.0.binary_search(permission).is_ok()
    }

    /// Any-of check: empty requirements always pass
    pub fn allows_any(&self, required: &[Permission]) -> bool {
        required.is_empty() || required.iter().any(|p| self.contains(p))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(|p| p.to_string()).collect()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        let unique: BTreeSet<Permission> = iter.into_iter().collect();
        PermissionSet(unique.into_iter().collect())
    }
}

pub struct PermissionResolver {
    records: SharedRecordStore,
    cache: SharedCacheStore,
    namespace: String,
    cache_ttl: Option<Duration>,
    deadline: Duration,
}

impl PermissionResolver {
    pub fn new(
        records: SharedRecordStore,
        cache: SharedCacheStore,
        namespace: &str,
        cache_ttl: Option<Duration>,
        deadline: Duration,
    ) -> Self {
        Self {
            records,
            cache,
            namespace: namespace.to_string(),
            cache_ttl,
            deadline,
        }
    }

    pub fn from_config(records: SharedRecordStore, cache: SharedCacheStore, config: &ServerConfig) -> Self {
        Self::new(
            records,
            cache,
            &config.cache_namespace,
            config.permission_cache_ttl,
            config.store_timeout,
        )
    }

    fn cache_key(&self, user_id: &str) -> String {
        format!("{}:user:{}:permissions", self.namespace, user_id)
    }

    /// Compute the effective permission set straight from the record store
    pub async fn resolve(&self, user_id: &str) -> Result<PermissionSet> {
        let now = Utc::now();
        let mut permission_ids: BTreeSet<String> = BTreeSet::new();

        let assignments = with_deadline(
            self.deadline,
            "role assignments",
            self.records.user_role_assignments(user_id),
        )
        .await?;

        for assignment in assignments.iter().filter(|a| a.is_effective(now)) {
            let role = with_deadline(self.deadline, "role lookup", self.records.get_role(&assignment.role_id)).await?;
            match role {
                Some(role) if role.is_active => {}
                _ => continue,
            }

            let grants = with_deadline(
                self.deadline,
                "role permissions",
                self.records.role_permission_grants(&assignment.role_id),
            )
            .await?;
            permission_ids.extend(grants.into_iter().filter(|g| g.is_active).map(|g| g.permission_id));
        }

        let direct = with_deadline(
            self.deadline,
            "user permissions",
            self.records.user_permission_grants(user_id),
        )
        .await?;
        permission_ids.extend(direct.into_iter().filter(|g| g.is_effective(now)).map(|g| g.permission_id));

        let mut resolved = Vec::with_capacity(permission_ids.len());
        for permission_id in &permission_ids {
            let record = with_deadline(
                self.deadline,
                "permission lookup",
                self.records.get_permission(permission_id),
            )
            .await?;
            if let Some(record) = record.filter(|p| p.is_active) {
                resolved.push(Permission::new(record.resource, record.action));
            }
        }

        Ok(resolved.into_iter().collect())
    }

    /// Names of the active roles a user effectively holds, sorted
    pub async fn role_names(&self, user_id: &str) -> Result<Vec<String>> {
        let now = Utc::now();
        let assignments = with_deadline(
            self.deadline,
            "role assignments",
            self.records.user_role_assignments(user_id),
        )
        .await?;

        let mut names = BTreeSet::new();
        for assignment in assignments.iter().filter(|a| a.is_effective(now)) {
            let role = with_deadline(self.deadline, "role lookup", self.records.get_role(&assignment.role_id)).await?;
            if let Some(role) = role.filter(|r| r.is_active) {
                names.insert(role.name);
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Read-through lookup: serve the cached set, or resolve and cache it
    pub async fn resolve_cached(&self, user_id: &str) -> Result<PermissionSet> {
        let key = self.cache_key(user_id);

        match with_deadline(self.deadline, "permission cache read", self.cache.get(&key)).await {
            Ok(Some(raw)) => match serde_json::from_str::<PermissionSet>(&raw) {
                Ok(set) => return Ok(set),
                Err(e) => log::warn!("Discarding unreadable permission cache for {}: {}", user_id, e),
            },
            Ok(None) => {}
            // Falling back to the record store is never more permissive
            Err(e) => log::warn!("Permission cache unavailable for {}: {}", user_id, e),
        }

        let set = self.resolve(user_id).await?;

        match serde_json::to_string(&set) {
            Ok(value) => {
                let write = self.cache.set(&key, &value, self.cache_ttl);
                if let Err(e) = with_deadline(self.deadline, "permission cache write", write).await {
                    log::warn!("Failed to cache permissions for {}: {}", user_id, e);
                }
            }
            Err(e) => log::warn!("Failed to encode permissions for {}: {}", user_id, e),
        }

        Ok(set)
    }

    /// Drop the cached set so the next lookup recomputes it
    pub async fn invalidate(&self, user_id: &str) -> Result<()> {
        let key = self.cache_key(user_id);
        with_deadline(self.deadline, "permission cache invalidate", self.cache.delete(&key)).await?;
        log::debug!("Invalidated permission cache for {}", user_id);
        Ok(())
    }

    /// Grant if the user holds any of `required`; no requirements always grant
    pub async fn authorize(&self, user_id: &str, required: &[Permission]) -> Result<PermissionSet> {
        if required.is_empty() {
            return Ok(PermissionSet::default());
        }

        let set = self.resolve_cached(user_id).await?;
        if set.allows_any(required) {
            Ok(set)
        } else {
            let wanted: Vec<String> = required.iter().map(|p| p.to_string()).collect();
            Err(RustyGateError::Forbidden(format!("requires one of [{}]", wanted.join(", "))))
        }
    }
}
