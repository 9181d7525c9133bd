//! Role-based access control: permission resolution with caching, point
//! checks with wildcard support, and audited role/permission CRUD.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::models::{
    AuditFilters, CreatePermission, CreateRole, Permission, Role, RoleAuditEntry, RoleFilters,
    SubscriptionTier, TeamRoleAssignment, UserRoleAssignment,
};
use crate::services::analytics::{AnalyticsEmitter, AuthEvent};
use crate::stores::{PermissionCache, RbacStore};

/// A pattern and a permission match only if they have the same number of
/// colon-segments and every non-`*` segment is exact; `*` matches exactly
/// one segment.
pub fn wildcard_match(pattern: &str, permission: &str) -> bool {
    if !pattern.contains('*') {
        return false;
    }
    let pattern_parts: Vec<&str> = pattern.split(':').collect();
    let permission_parts: Vec<&str> = permission.split(':').collect();
    if pattern_parts.len() != permission_parts.len() {
        return false;
    }
    pattern_parts
        .iter()
        .zip(&permission_parts)
        .all(|(pat, perm)| *pat == "*" || pat == perm)
}

fn matches_any(granted: &[String], permission: &str) -> bool {
    granted
        .iter()
        .any(|g| g == permission || wildcard_match(g, permission))
}

fn valid_permission_name(name: &str) -> bool {
    !name.is_empty()
        && name.split(':').all(|seg| {
            !seg.is_empty()
                && seg.chars().all(|c| {
                    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' || c == '*'
                })
        })
}

#[derive(Clone)]
pub struct RbacService {
    store: Arc<dyn RbacStore>,
    cache: Arc<dyn PermissionCache>,
    config: Arc<AuthConfig>,
    analytics: AnalyticsEmitter,
}

impl RbacService {
    pub fn new(
        store: Arc<dyn RbacStore>,
        cache: Arc<dyn PermissionCache>,
        config: Arc<AuthConfig>,
        analytics: AnalyticsEmitter,
    ) -> Self {
        Self {
            store,
            cache,
            config,
            analytics,
        }
    }

    /// Point permission check. Serves from the cache when possible; a miss
    /// computes and caches the full set.
    pub async fn has_permission(
        &self,
        user_id: &str,
        permission: &str,
    ) -> Result<bool, AuthError> {
        if self.config.rbac.enable_cache {
            match self.cache.get(user_id).await {
                Ok(Some(cached)) => return Ok(matches_any(&cached, permission)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, user_id, "Permission cache read failed, recomputing");
                }
            }
        }

        let permissions = self.user_permissions(user_id).await?;
        Ok(matches_any(&permissions, permission))
    }

    /// Resolve the full effective permission set for a user: direct roles,
    /// inherited ancestor roles, and team roles (both bare and
    /// team-namespaced). Traversal is bounded by a visited set so malformed
    /// cyclic parent data cannot hang it.
    pub async fn user_permissions(&self, user_id: &str) -> Result<Vec<String>, AuthError> {
        let mut resolved: BTreeSet<String> = BTreeSet::new();

        let assignments = self
            .store
            .user_roles(user_id)
            .await
            .map_err(AuthError::Store)?;

        for assignment in assignments.iter().filter(|a| a.is_current()) {
            self.collect_role_permissions(&assignment.role_id, &mut resolved)
                .await;

            if self.config.rbac.enable_inheritance {
                self.collect_inherited_permissions(&assignment.role_id, &mut resolved)
                    .await;
            }
        }

        let team_assignments = self
            .store
            .user_team_roles(user_id)
            .await
            .map_err(AuthError::Store)?;

        for assignment in team_assignments.iter().filter(|a| a.is_current()) {
            let mut team_perms = BTreeSet::new();
            self.collect_role_permissions(&assignment.role_id, &mut team_perms)
                .await;
            for perm in team_perms {
                resolved.insert(format!("{}:team:{}", perm, assignment.team_id));
                resolved.insert(perm);
            }
        }

        let permissions: Vec<String> = resolved.into_iter().collect();

        if self.config.rbac.enable_cache {
            if let Err(e) = self
                .cache
                .set(
                    user_id,
                    &permissions,
                    Duration::seconds(self.config.rbac.cache_ttl_secs),
                )
                .await
            {
                tracing::warn!(error = %e, user_id, "Failed to populate permission cache");
            }
        }

        Ok(permissions)
    }

    /// Authorization decision for a permission name, including tier gating.
    /// Returns remediation hints, never another user's data.
    pub async fn authorize(
        &self,
        user_id: &str,
        tier: SubscriptionTier,
        permission: &str,
    ) -> Result<(), AuthError> {
        if let Some(definition) = self
            .store
            .get_permission_by_name(permission)
            .await
            .map_err(AuthError::Store)?
        {
            if !definition.is_active {
                return Err(AuthError::PermissionDenied {
                    permission: permission.to_string(),
                    hint: None,
                });
            }
            if let Some(required) = definition.min_tier {
                if tier < required {
                    return Err(AuthError::TierRequired { required });
                }
            }
        }

        if self.has_permission(user_id, permission).await? {
            Ok(())
        } else {
            Err(AuthError::PermissionDenied {
                permission: permission.to_string(),
                hint: None,
            })
        }
    }

    /// Whether the named permission is flagged as requiring MFA.
    pub async fn permission_requires_mfa(&self, permission: &str) -> Result<bool, AuthError> {
        Ok(self
            .store
            .get_permission_by_name(permission)
            .await
            .map_err(AuthError::Store)?
            .map(|p| p.requires_mfa)
            .unwrap_or(false))
    }

    async fn collect_role_permissions(&self, role_id: &str, out: &mut BTreeSet<String>) {
        // A role whose permissions cannot be loaded contributes nothing;
        // denying is the safe direction.
        match self.store.role_permissions(role_id).await {
            Ok(perms) => {
                for perm in perms.iter().filter(|p| p.is_active) {
                    out.insert(perm.name.clone());
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, role_id, "Skipping role, failed to load permissions");
            }
        }
    }

    async fn collect_inherited_permissions(&self, role_id: &str, out: &mut BTreeSet<String>) {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(role_id.to_string());

        let mut current = role_id.to_string();
        loop {
            let parent_id = match self.store.get_role(&current).await {
                Ok(Some(role)) => role.parent_role_id,
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!(error = %e, role_id = %current, "Inheritance walk aborted");
                    None
                }
            };

            let Some(parent_id) = parent_id else {
                break;
            };
            if !visited.insert(parent_id.clone()) {
                tracing::warn!(
                    role_id,
                    parent_id = %parent_id,
                    "Cycle detected in role hierarchy, returning partial resolution"
                );
                break;
            }
            self.collect_role_permissions(&parent_id, out).await;
            current = parent_id;
        }
    }

    // --- Role / permission CRUD, all audited ---

    pub async fn create_role(&self, input: CreateRole, actor_id: &str) -> Result<Role, AuthError> {
        input
            .validate()
            .map_err(|e| AuthError::Validation(e.to_string()))?;
        if !valid_permission_name(&input.name) {
            return Err(AuthError::Validation(format!(
                "role name {} must be lowercase colon-segmented",
                input.name
            )));
        }
        if self
            .store
            .get_role_by_name(&input.name)
            .await
            .map_err(AuthError::Store)?
            .is_some()
        {
            return Err(AuthError::Validation(format!(
                "role {} already exists",
                input.name
            )));
        }
        if let Some(parent_id) = &input.parent_role_id {
            if self
                .store
                .get_role(parent_id)
                .await
                .map_err(AuthError::Store)?
                .is_none()
            {
                return Err(AuthError::Validation(format!(
                    "parent role {parent_id} does not exist"
                )));
            }
        }

        let now = Utc::now();
        let role = Role {
            id: Uuid::new_v4().to_string(),
            name: input.name,
            display_name: input.display_name,
            description: input.description,
            role_type: input.role_type,
            level: input.level,
            parent_role_id: input.parent_role_id,
            is_system: false,
            is_active: true,
            created_at: now,
            updated_at: now,
            created_by: actor_id.to_string(),
        };
        self.store
            .create_role(&role)
            .await
            .map_err(AuthError::Store)?;

        self.audit(
            RoleAuditEntry::new("role_created", actor_id, &role.id).with_role(&role.id),
        );
        self.analytics.emit(AuthEvent::RoleMutation {
            actor_id: actor_id.to_string(),
            action: "role_created".to_string(),
            target_id: role.id.clone(),
        });
        Ok(role)
    }

    pub async fn deactivate_role(&self, role_id: &str, actor_id: &str) -> Result<(), AuthError> {
        let mut role = self
            .store
            .get_role(role_id)
            .await
            .map_err(AuthError::Store)?
            .ok_or_else(|| AuthError::Validation(format!("role {role_id} not found")))?;
        if role.is_system {
            return Err(AuthError::Validation(
                "system roles cannot be deactivated".to_string(),
            ));
        }
        role.is_active = false;
        role.updated_at = Utc::now();
        self.store
            .update_role(&role)
            .await
            .map_err(AuthError::Store)?;

        self.invalidate_role_cache(role_id).await;
        self.audit(RoleAuditEntry::new("role_deactivated", actor_id, role_id).with_role(role_id));
        Ok(())
    }

    pub async fn create_permission(
        &self,
        input: CreatePermission,
        actor_id: &str,
    ) -> Result<Permission, AuthError> {
        input
            .validate()
            .map_err(|e| AuthError::Validation(e.to_string()))?;
        if !valid_permission_name(&input.name) {
            return Err(AuthError::Validation(format!(
                "permission name {} must be lowercase colon-segmented",
                input.name
            )));
        }
        if self
            .store
            .get_permission_by_name(&input.name)
            .await
            .map_err(AuthError::Store)?
            .is_some()
        {
            return Err(AuthError::Validation(format!(
                "permission {} already exists",
                input.name
            )));
        }

        let permission = Permission {
            id: Uuid::new_v4().to_string(),
            name: input.name,
            display_name: input.display_name,
            description: input.description,
            category: input.category,
            resource: input.resource,
            action: input.action,
            scope: input.scope,
            requires_mfa: input.requires_mfa,
            min_tier: input.min_tier,
            is_system: false,
            is_active: true,
            created_at: Utc::now(),
            created_by: actor_id.to_string(),
        };
        self.store
            .create_permission(&permission)
            .await
            .map_err(AuthError::Store)?;

        self.audit(
            RoleAuditEntry::new("permission_created", actor_id, &permission.id)
                .with_permission(&permission.id),
        );
        Ok(permission)
    }

    pub async fn grant_permission_to_role(
        &self,
        role_id: &str,
        permission_id: &str,
        actor_id: &str,
    ) -> Result<(), AuthError> {
        self.require_role(role_id).await?;
        if self
            .store
            .get_permission(permission_id)
            .await
            .map_err(AuthError::Store)?
            .is_none()
        {
            return Err(AuthError::Validation(format!(
                "permission {permission_id} not found"
            )));
        }
        self.store
            .add_permission_to_role(role_id, permission_id)
            .await
            .map_err(AuthError::Store)?;

        self.invalidate_role_cache(role_id).await;
        self.audit(
            RoleAuditEntry::new("permission_granted", actor_id, role_id)
                .with_role(role_id)
                .with_permission(permission_id),
        );
        Ok(())
    }

    pub async fn revoke_permission_from_role(
        &self,
        role_id: &str,
        permission_id: &str,
        actor_id: &str,
    ) -> Result<(), AuthError> {
        self.store
            .remove_permission_from_role(role_id, permission_id)
            .await
            .map_err(AuthError::Store)?;

        self.invalidate_role_cache(role_id).await;
        self.audit(
            RoleAuditEntry::new("permission_revoked", actor_id, role_id)
                .with_role(role_id)
                .with_permission(permission_id),
        );
        Ok(())
    }

    pub async fn assign_role(
        &self,
        user_id: &str,
        role_id: &str,
        expires_at: Option<DateTime<Utc>>,
        actor_id: &str,
    ) -> Result<UserRoleAssignment, AuthError> {
        let role = self.require_role(role_id).await?;
        if !role.is_active {
            return Err(AuthError::Validation(format!(
                "role {} is not active",
                role.name
            )));
        }

        let current = self
            .store
            .user_roles(user_id)
            .await
            .map_err(AuthError::Store)?;
        if current.iter().filter(|a| a.is_current()).count() >= self.config.rbac.max_roles_per_user
        {
            return Err(AuthError::Validation(format!(
                "user {user_id} already has the maximum of {} roles",
                self.config.rbac.max_roles_per_user
            )));
        }
        if current
            .iter()
            .any(|a| a.role_id == role_id && a.is_current())
        {
            return Err(AuthError::Validation(format!(
                "user {user_id} already has role {}",
                role.name
            )));
        }

        let mut assignment = UserRoleAssignment::new(
            user_id.to_string(),
            role_id.to_string(),
            actor_id.to_string(),
        );
        assignment.expires_at = expires_at;
        self.store
            .assign_user_role(&assignment)
            .await
            .map_err(AuthError::Store)?;

        self.invalidate_user_cache(user_id).await;
        self.audit(RoleAuditEntry::new("user_role_assigned", actor_id, user_id).with_role(role_id));
        self.analytics.emit(AuthEvent::RoleMutation {
            actor_id: actor_id.to_string(),
            action: "user_role_assigned".to_string(),
            target_id: user_id.to_string(),
        });
        Ok(assignment)
    }

    pub async fn remove_role(
        &self,
        user_id: &str,
        role_id: &str,
        actor_id: &str,
    ) -> Result<(), AuthError> {
        self.store
            .remove_user_role(user_id, role_id)
            .await
            .map_err(AuthError::Store)?;

        self.invalidate_user_cache(user_id).await;
        self.audit(RoleAuditEntry::new("user_role_removed", actor_id, user_id).with_role(role_id));
        Ok(())
    }

    pub async fn assign_team_role(
        &self,
        mut assignment: TeamRoleAssignment,
        actor_id: &str,
    ) -> Result<TeamRoleAssignment, AuthError> {
        self.require_role(&assignment.role_id).await?;
        assignment.assigned_by = actor_id.to_string();
        self.store
            .assign_team_role(&assignment)
            .await
            .map_err(AuthError::Store)?;

        self.invalidate_user_cache(&assignment.user_id).await;
        self.audit(
            RoleAuditEntry::new("team_role_assigned", actor_id, &assignment.user_id)
                .with_role(&assignment.role_id)
                .with_team(&assignment.team_id),
        );
        Ok(assignment)
    }

    pub async fn remove_team_role(
        &self,
        team_id: &str,
        user_id: &str,
        role_id: &str,
        actor_id: &str,
    ) -> Result<(), AuthError> {
        self.store
            .remove_team_role(team_id, user_id, role_id)
            .await
            .map_err(AuthError::Store)?;

        self.invalidate_user_cache(user_id).await;
        self.audit(
            RoleAuditEntry::new("team_role_removed", actor_id, user_id)
                .with_role(role_id)
                .with_team(team_id),
        );
        Ok(())
    }

    pub async fn list_roles(&self, filters: &RoleFilters) -> Result<Vec<Role>, AuthError> {
        self.store
            .list_roles(filters)
            .await
            .map_err(AuthError::Store)
    }

    pub async fn list_audit(
        &self,
        filters: &AuditFilters,
    ) -> Result<Vec<RoleAuditEntry>, AuthError> {
        self.store
            .list_audit(filters)
            .await
            .map_err(AuthError::Store)
    }

    async fn require_role(&self, role_id: &str) -> Result<Role, AuthError> {
        self.store
            .get_role(role_id)
            .await
            .map_err(AuthError::Store)?
            .ok_or_else(|| AuthError::Validation(format!("role {role_id} not found")))
    }

    /// Invalidation is synchronous with the mutation; only its failure is
    /// tolerated (and logged), never skipped.
    async fn invalidate_user_cache(&self, user_id: &str) {
        if let Err(e) = self.cache.invalidate_user(user_id).await {
            tracing::error!(error = %e, user_id, "Failed to invalidate permission cache");
        }
    }

    async fn invalidate_role_cache(&self, role_id: &str) {
        if let Err(e) = self.cache.invalidate_role(role_id).await {
            tracing::error!(error = %e, role_id, "Failed to invalidate permission cache");
        }
    }

    fn audit(&self, entry: RoleAuditEntry) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.append_audit(&entry).await {
                tracing::error!(error = %e, action = %entry.action, "Failed to append RBAC audit entry");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_one_segment_exactly() {
        assert!(wildcard_match("team:*:manage", "team:123:manage"));
        assert!(!wildcard_match("team:*:manage", "team:123:view"));
        assert!(!wildcard_match("team:*:manage", "team:manage"));
        assert!(!wildcard_match("team:*", "team:a:b"));
        assert!(wildcard_match("*:*", "a:b"));
        // No wildcard at all never matches through this path.
        assert!(!wildcard_match("team:view", "team:view"));
    }

    #[test]
    fn permission_name_validation() {
        assert!(valid_permission_name("team:manage:players"));
        assert!(valid_permission_name("api:basic"));
        assert!(valid_permission_name("team:*:manage"));
        assert!(!valid_permission_name("Team:Manage"));
        assert!(!valid_permission_name("team::manage"));
        assert!(!valid_permission_name(""));
    }

    #[test]
    fn granted_set_matching() {
        let granted = vec!["analytics:basic".to_string(), "team:*:view".to_string()];
        assert!(matches_any(&granted, "analytics:basic"));
        assert!(matches_any(&granted, "team:42:view"));
        assert!(!matches_any(&granted, "team:42:manage"));
    }
}
