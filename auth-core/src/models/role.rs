//! Roles, permissions, assignments, and the RBAC audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::user::SubscriptionTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleType {
    System,
    Gaming,
    Team,
    Subscription,
    Custom,
}

/// Breadth a permission applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionScope {
    #[serde(rename = "self")]
    OwnData,
    Team,
    Organization,
    Global,
}

/// A role in the platform. Roles form a forest via `parent_role_id`; cycles
/// are rejected at write time and bounded at read time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub role_type: RoleType,
    /// Hierarchy level; higher levels outrank lower ones.
    pub level: i32,
    pub parent_role_id: Option<String>,
    pub is_system: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
}

/// A fine-grained permission, named with colon-separated segments
/// (e.g. `team:manage:players`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub category: String,
    pub resource: String,
    pub action: String,
    pub scope: PermissionScope,
    pub requires_mfa: bool,
    pub min_tier: Option<SubscriptionTier>,
    pub is_system: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

/// Assignment of a role to a user, optionally scoped and time-limited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRoleAssignment {
    pub id: String,
    pub user_id: String,
    pub role_id: String,
    pub assigned_by: String,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub scope: Option<String>,
}

impl UserRoleAssignment {
    pub fn new(user_id: String, role_id: String, assigned_by: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            role_id,
            assigned_by,
            assigned_at: Utc::now(),
            expires_at: None,
            is_active: true,
            scope: None,
        }
    }

    pub fn is_current(&self) -> bool {
        self.is_active && self.expires_at.map_or(true, |exp| Utc::now() < exp)
    }
}

/// Assignment of a role to a (team, user) pair, with team position and
/// in-game role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamRoleAssignment {
    pub id: String,
    pub team_id: String,
    pub user_id: String,
    pub role_id: String,
    /// captain, analyst, coach, player
    pub position: Option<String>,
    /// top, jungle, mid, adc, support
    pub game_role: Option<String>,
    pub assigned_by: String,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl TeamRoleAssignment {
    pub fn new(team_id: String, user_id: String, role_id: String, assigned_by: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            team_id,
            user_id,
            role_id,
            position: None,
            game_role: None,
            assigned_by,
            assigned_at: Utc::now(),
            expires_at: None,
            is_active: true,
        }
    }

    pub fn is_current(&self) -> bool {
        self.is_active && self.expires_at.map_or(true, |exp| Utc::now() < exp)
    }
}

/// Append-only audit record for every role/permission mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAuditEntry {
    pub id: String,
    pub action: String,
    pub actor_id: String,
    pub target_id: String,
    pub role_id: Option<String>,
    pub permission_id: Option<String>,
    pub team_id: Option<String>,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl RoleAuditEntry {
    pub fn new(action: &str, actor_id: &str, target_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action: action.to_string(),
            actor_id: actor_id.to_string(),
            target_id: target_id.to_string(),
            role_id: None,
            permission_id: None,
            team_id: None,
            details: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_role(mut self, role_id: &str) -> Self {
        self.role_id = Some(role_id.to_string());
        self
    }

    pub fn with_permission(mut self, permission_id: &str) -> Self {
        self.permission_id = Some(permission_id.to_string());
        self
    }

    pub fn with_team(mut self, team_id: &str) -> Self {
        self.team_id = Some(team_id.to_string());
        self
    }
}

/// Input for creating a role.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateRole {
    #[validate(length(min = 3, max = 64))]
    pub name: String,
    #[validate(length(min = 1, max = 128))]
    pub display_name: String,
    #[validate(length(max = 512))]
    pub description: String,
    pub role_type: RoleType,
    #[validate(range(min = 0, max = 100))]
    pub level: i32,
    pub parent_role_id: Option<String>,
}

/// Input for creating a permission.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePermission {
    #[validate(length(min = 3, max = 128))]
    pub name: String,
    #[validate(length(min = 1, max = 128))]
    pub display_name: String,
    #[validate(length(max = 512))]
    pub description: String,
    #[validate(length(min = 1, max = 64))]
    pub category: String,
    #[validate(length(min = 1, max = 64))]
    pub resource: String,
    #[validate(length(min = 1, max = 64))]
    pub action: String,
    pub scope: PermissionScope,
    pub requires_mfa: bool,
    pub min_tier: Option<SubscriptionTier>,
}

/// Filters for role listing.
#[derive(Debug, Clone, Default)]
pub struct RoleFilters {
    pub role_type: Option<RoleType>,
    pub is_active: Option<bool>,
    pub is_system: Option<bool>,
}

/// Filters for permission listing.
#[derive(Debug, Clone, Default)]
pub struct PermissionFilters {
    pub category: Option<String>,
    pub resource: Option<String>,
    pub scope: Option<PermissionScope>,
    pub is_active: Option<bool>,
}

/// Filters for audit-log queries.
#[derive(Debug, Clone, Default)]
pub struct AuditFilters {
    pub actor_id: Option<String>,
    pub target_id: Option<String>,
    pub action: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

fn system_role(
    name: &str,
    display_name: &str,
    description: &str,
    role_type: RoleType,
    level: i32,
) -> Role {
    let now = Utc::now();
    Role {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        display_name: display_name.to_string(),
        description: description.to_string(),
        role_type,
        level,
        parent_role_id: None,
        is_system: true,
        is_active: true,
        created_at: now,
        updated_at: now,
        created_by: "system".to_string(),
    }
}

/// Roles seeded on first boot.
pub fn default_roles() -> Vec<Role> {
    vec![
        system_role(
            "player:standard",
            "Player",
            "Basic platform user",
            RoleType::Gaming,
            1,
        ),
        system_role(
            "player:premium",
            "Premium Player",
            "Premium user with advanced features",
            RoleType::Gaming,
            2,
        ),
        system_role(
            "player:pro",
            "Pro Player",
            "Professional user with team features",
            RoleType::Gaming,
            3,
        ),
        system_role("team:player", "Team Player", "Team member", RoleType::Team, 1),
        system_role(
            "team:captain",
            "Team Captain",
            "Team captain with management permissions",
            RoleType::Team,
            2,
        ),
        system_role(
            "team:coach",
            "Team Coach",
            "Team coach with analysis permissions",
            RoleType::Team,
            2,
        ),
        system_role(
            "team:manager",
            "Team Manager",
            "Team manager with full team permissions",
            RoleType::Team,
            3,
        ),
        system_role(
            "admin:platform",
            "Platform Administrator",
            "Platform administrator",
            RoleType::System,
            10,
        ),
    ]
}

#[allow(clippy::too_many_arguments)]
fn system_permission(
    name: &str,
    display_name: &str,
    category: &str,
    resource: &str,
    action: &str,
    scope: PermissionScope,
    requires_mfa: bool,
    min_tier: Option<SubscriptionTier>,
) -> Permission {
    Permission {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        display_name: display_name.to_string(),
        description: String::new(),
        category: category.to_string(),
        resource: resource.to_string(),
        action: action.to_string(),
        scope,
        requires_mfa,
        min_tier,
        is_system: true,
        is_active: true,
        created_at: Utc::now(),
        created_by: "system".to_string(),
    }
}

/// Permissions seeded on first boot.
pub fn default_permissions() -> Vec<Permission> {
    vec![
        system_permission(
            "analytics:view",
            "View Analytics",
            "analytics",
            "analytics",
            "view",
            PermissionScope::OwnData,
            false,
            None,
        ),
        system_permission(
            "analytics:advanced",
            "Advanced Analytics",
            "analytics",
            "analytics",
            "view",
            PermissionScope::OwnData,
            false,
            Some(SubscriptionTier::Premium),
        ),
        system_permission(
            "analytics:export",
            "Export Analytics",
            "analytics",
            "analytics",
            "export",
            PermissionScope::OwnData,
            true,
            Some(SubscriptionTier::Pro),
        ),
        system_permission(
            "team:view",
            "View Team",
            "team",
            "team",
            "view",
            PermissionScope::Team,
            false,
            None,
        ),
        system_permission(
            "team:manage:players",
            "Manage Team Players",
            "team",
            "team",
            "manage",
            PermissionScope::Team,
            true,
            None,
        ),
        system_permission(
            "team:manage:settings",
            "Manage Team Settings",
            "team",
            "team",
            "manage",
            PermissionScope::Team,
            true,
            None,
        ),
        system_permission(
            "api:basic",
            "Basic API Access",
            "api",
            "api",
            "access",
            PermissionScope::OwnData,
            false,
            None,
        ),
        system_permission(
            "api:extended",
            "Extended API Access",
            "api",
            "api",
            "access",
            PermissionScope::OwnData,
            false,
            Some(SubscriptionTier::Premium),
        ),
        system_permission(
            "api:unlimited",
            "Unlimited API Access",
            "api",
            "api",
            "access",
            PermissionScope::Global,
            false,
            Some(SubscriptionTier::Enterprise),
        ),
        system_permission(
            "admin:users:manage",
            "Manage Users",
            "admin",
            "users",
            "manage",
            PermissionScope::Global,
            true,
            None,
        ),
        system_permission(
            "admin:roles:manage",
            "Manage Roles",
            "admin",
            "roles",
            "manage",
            PermissionScope::Global,
            true,
            None,
        ),
    ]
}
