//! User permission aggregation and the authorization decision.
//!
//! A user's effective permissions are the union of role-derived keys, direct
//! grants and admin grants, gated by the institution's plan: a key the plan
//! does not license is invisible no matter who granted it. Grant lookups are
//! best-effort and degrade to the empty set, which fails closed.

use async_trait::async_trait;
use service_core::error::AppError;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::Role;
use crate::services::Database;

/// Source of role and grant data, implemented by [`Database`].
#[async_trait]
pub trait GrantSource: Send + Sync {
    async fn roles_for_user(&self, user_id: Uuid) -> Result<Vec<Role>, AppError>;
    async fn role_permission_keys(&self, user_id: Uuid) -> Result<Vec<String>, AppError>;
    async fn direct_permission_keys(&self, user_id: Uuid) -> Result<Vec<String>, AppError>;
    async fn admin_permission_keys(&self, user_id: Uuid) -> Result<Vec<String>, AppError>;
}

#[async_trait]
impl GrantSource for Database {
    async fn roles_for_user(&self, user_id: Uuid) -> Result<Vec<Role>, AppError> {
        self.find_roles_for_user(user_id).await
    }

    async fn role_permission_keys(&self, user_id: Uuid) -> Result<Vec<String>, AppError> {
        self.role_permission_keys_for_user(user_id).await
    }

    async fn direct_permission_keys(&self, user_id: Uuid) -> Result<Vec<String>, AppError> {
        self.direct_permission_keys_for_user(user_id).await
    }

    async fn admin_permission_keys(&self, user_id: Uuid) -> Result<Vec<String>, AppError> {
        self.admin_permission_keys_for_user(user_id).await
    }
}

/// Restrict `granted` to keys the plan licenses.
pub fn license_gate(
    granted: HashSet<String>,
    plan_permission_keys: &HashSet<String>,
) -> HashSet<String> {
    granted
        .into_iter()
        .filter(|key| plan_permission_keys.contains(key))
        .collect()
}

/// The single authorization decision.
///
/// Admin status widens a user to every key the plan licenses but never
/// beyond it; non-admins need the key in their effective set.
pub fn is_authorized(
    permission_key: &str,
    user_permission_keys: &HashSet<String>,
    is_admin: bool,
    plan_permission_keys: &HashSet<String>,
) -> bool {
    if is_admin {
        plan_permission_keys.contains(permission_key)
    } else {
        user_permission_keys.contains(permission_key)
    }
}

#[derive(Clone)]
pub struct PermissionAggregator {
    source: Arc<dyn GrantSource>,
}

impl PermissionAggregator {
    pub fn new(source: Arc<dyn GrantSource>) -> Self {
        Self { source }
    }

    /// The user's roles. Failures degrade to no roles.
    pub async fn roles(&self, user_id: Uuid) -> Vec<Role> {
        match self.source.roles_for_user(user_id).await {
            Ok(roles) => roles,
            Err(e) => {
                tracing::error!(%user_id, error = %e, "Failed to load user roles");
                Vec::new()
            }
        }
    }

    /// Whether any of the user's roles carries the admin flag.
    pub fn is_admin(roles: &[Role]) -> bool {
        roles.iter().any(|r| r.admin_flag)
    }

    /// Union of role-derived, direct and admin grants, gated by the plan.
    ///
    /// Each grant lookup that fails contributes nothing; a total outage
    /// yields the empty set rather than an error.
    pub async fn effective_permissions(
        &self,
        user_id: Uuid,
        plan_permission_keys: &HashSet<String>,
    ) -> HashSet<String> {
        let mut granted: HashSet<String> = HashSet::new();

        granted.extend(self.lookup(
            self.source.role_permission_keys(user_id).await,
            user_id,
            "role",
        ));
        granted.extend(self.lookup(
            self.source.direct_permission_keys(user_id).await,
            user_id,
            "direct",
        ));
        granted.extend(self.lookup(
            self.source.admin_permission_keys(user_id).await,
            user_id,
            "admin",
        ));

        license_gate(granted, plan_permission_keys)
    }

    fn lookup(
        &self,
        result: Result<Vec<String>, AppError>,
        user_id: Uuid,
        kind: &str,
    ) -> Vec<String> {
        match result {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!(%user_id, kind, error = %e, "Failed to load permission grants");
                Vec::new()
            }
        }
    }
}
