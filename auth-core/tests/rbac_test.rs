//! RBAC engine integration tests: grant/revoke visibility through the
//! cache, wildcard matching, hierarchy inheritance with cycle bounding,
//! team-namespaced permissions, tier gating, and the audit trail.

mod common;

use auth_core::error::AuthError;
use auth_core::models::{
    AuditFilters, CreatePermission, CreateRole, PermissionScope, Role, RoleType,
    SubscriptionTier, TeamRoleAssignment,
};
use auth_core::stores::RbacStore;
use chrono::{Duration, Utc};

fn role_input(name: &str, level: i32) -> CreateRole {
    CreateRole {
        name: name.to_string(),
        display_name: name.to_string(),
        description: String::new(),
        role_type: RoleType::Custom,
        level,
        parent_role_id: None,
    }
}

fn permission_input(name: &str) -> CreatePermission {
    let mut segments = name.split(':');
    let resource = segments.next().unwrap_or(name).to_string();
    let action = segments.next().unwrap_or("view").to_string();
    CreatePermission {
        name: name.to_string(),
        display_name: name.to_string(),
        description: String::new(),
        category: resource.clone(),
        resource,
        action,
        scope: PermissionScope::OwnData,
        requires_mfa: false,
        min_tier: None,
    }
}

#[tokio::test]
async fn grant_then_remove_is_visible_through_the_cache() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let rbac = &harness.core.rbac;

    let role = rbac
        .create_role(role_input("analyst:junior", 1), "admin-1")
        .await
        .unwrap();
    let permission = rbac
        .create_permission(permission_input("reports:view"), "admin-1")
        .await
        .unwrap();
    rbac.grant_permission_to_role(&role.id, &permission.id, "admin-1")
        .await
        .unwrap();

    // Populate the cache with the empty set first.
    assert!(!rbac.has_permission(&user.id, "reports:view").await.unwrap());

    // Assignment invalidates the user's cached set, so the grant is visible
    // immediately.
    rbac.assign_role(&user.id, &role.id, None, "admin-1")
        .await
        .unwrap();
    assert!(rbac.has_permission(&user.id, "reports:view").await.unwrap());

    // And removal is visible immediately as well.
    rbac.remove_role(&user.id, &role.id, "admin-1").await.unwrap();
    assert!(!rbac.has_permission(&user.id, "reports:view").await.unwrap());
}

#[tokio::test]
async fn role_level_permission_grant_flushes_stale_cache() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let rbac = &harness.core.rbac;

    let role = rbac
        .create_role(role_input("analyst:senior", 2), "admin-1")
        .await
        .unwrap();
    rbac.assign_role(&user.id, &role.id, None, "admin-1")
        .await
        .unwrap();

    // Cache the set without the permission.
    assert!(!rbac.has_permission(&user.id, "reports:export").await.unwrap());

    let permission = rbac
        .create_permission(permission_input("reports:export"), "admin-1")
        .await
        .unwrap();
    rbac.grant_permission_to_role(&role.id, &permission.id, "admin-1")
        .await
        .unwrap();

    // The role-level invalidation (full flush, no reverse index) must make
    // the new grant visible.
    assert!(rbac.has_permission(&user.id, "reports:export").await.unwrap());
}

#[tokio::test]
async fn wildcard_grants_match_one_segment_per_star() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let rbac = &harness.core.rbac;

    let role = rbac
        .create_role(role_input("team:wildcard-manager", 3), "admin-1")
        .await
        .unwrap();
    let permission = rbac
        .create_permission(permission_input("team:*:manage"), "admin-1")
        .await
        .unwrap();
    rbac.grant_permission_to_role(&role.id, &permission.id, "admin-1")
        .await
        .unwrap();
    rbac.assign_role(&user.id, &role.id, None, "admin-1")
        .await
        .unwrap();

    assert!(rbac.has_permission(&user.id, "team:123:manage").await.unwrap());
    assert!(!rbac.has_permission(&user.id, "team:123:view").await.unwrap());
    assert!(!rbac.has_permission(&user.id, "team:manage").await.unwrap());
}

#[tokio::test]
async fn inherited_permissions_flow_from_ancestors() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let rbac = &harness.core.rbac;

    let parent = rbac
        .create_role(role_input("staff:base", 1), "admin-1")
        .await
        .unwrap();
    let mut child_input = role_input("staff:support", 2);
    child_input.parent_role_id = Some(parent.id.clone());
    let child = rbac.create_role(child_input, "admin-1").await.unwrap();

    let permission = rbac
        .create_permission(permission_input("tickets:view"), "admin-1")
        .await
        .unwrap();
    rbac.grant_permission_to_role(&parent.id, &permission.id, "admin-1")
        .await
        .unwrap();

    rbac.assign_role(&user.id, &child.id, None, "admin-1")
        .await
        .unwrap();
    assert!(rbac.has_permission(&user.id, "tickets:view").await.unwrap());
}

#[tokio::test]
async fn cyclic_role_hierarchy_terminates_with_partial_resolution() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let rbac = &harness.core.rbac;

    let role_a = rbac
        .create_role(role_input("cycle:a", 1), "admin-1")
        .await
        .unwrap();
    let mut b_input = role_input("cycle:b", 1);
    b_input.parent_role_id = Some(role_a.id.clone());
    let role_b = rbac.create_role(b_input, "admin-1").await.unwrap();

    // Force malformed cyclic data directly through the store.
    let corrupted = Role {
        parent_role_id: Some(role_b.id.clone()),
        ..role_a.clone()
    };
    harness.rbac_store.update_role(&corrupted).await.unwrap();

    let perm_a = rbac
        .create_permission(permission_input("cycle:perm-a"), "admin-1")
        .await
        .unwrap();
    let perm_b = rbac
        .create_permission(permission_input("cycle:perm-b"), "admin-1")
        .await
        .unwrap();
    rbac.grant_permission_to_role(&role_a.id, &perm_a.id, "admin-1")
        .await
        .unwrap();
    rbac.grant_permission_to_role(&role_b.id, &perm_b.id, "admin-1")
        .await
        .unwrap();
    rbac.assign_role(&user.id, &role_b.id, None, "admin-1")
        .await
        .unwrap();

    // Must terminate, and everything resolvable before the cycle closes is
    // included.
    let perms = harness.core.rbac.user_permissions(&user.id).await.unwrap();
    assert!(perms.contains(&"cycle:perm-a".to_string()));
    assert!(perms.contains(&"cycle:perm-b".to_string()));
}

#[tokio::test]
async fn team_roles_grant_bare_and_namespaced_permissions() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let rbac = &harness.core.rbac;

    let role = rbac
        .create_role(role_input("team:squad-captain", 2), "admin-1")
        .await
        .unwrap();
    let permission = rbac
        .create_permission(permission_input("roster:manage"), "admin-1")
        .await
        .unwrap();
    rbac.grant_permission_to_role(&role.id, &permission.id, "admin-1")
        .await
        .unwrap();

    let mut assignment =
        TeamRoleAssignment::new("team-42".to_string(), user.id.clone(), role.id.clone(), String::new());
    assignment.position = Some("captain".to_string());
    assignment.game_role = Some("jungle".to_string());
    rbac.assign_team_role(assignment, "admin-1").await.unwrap();

    let perms = rbac.user_permissions(&user.id).await.unwrap();
    assert!(perms.contains(&"roster:manage".to_string()));
    assert!(perms.contains(&"roster:manage:team:team-42".to_string()));
}

#[tokio::test]
async fn expired_assignments_grant_nothing() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let rbac = &harness.core.rbac;

    let role = rbac
        .create_role(role_input("temp:contractor", 1), "admin-1")
        .await
        .unwrap();
    let permission = rbac
        .create_permission(permission_input("contracts:view"), "admin-1")
        .await
        .unwrap();
    rbac.grant_permission_to_role(&role.id, &permission.id, "admin-1")
        .await
        .unwrap();
    rbac.assign_role(
        &user.id,
        &role.id,
        Some(Utc::now() - Duration::seconds(1)),
        "admin-1",
    )
    .await
    .unwrap();

    assert!(!rbac.has_permission(&user.id, "contracts:view").await.unwrap());
}

#[tokio::test]
async fn tier_gating_denies_with_required_tier_hint() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let rbac = &harness.core.rbac;

    let mut input = permission_input("exports:bulk");
    input.min_tier = Some(SubscriptionTier::Pro);
    rbac.create_permission(input, "admin-1").await.unwrap();

    let err = rbac
        .authorize(&user.id, SubscriptionTier::Free, "exports:bulk")
        .await
        .unwrap_err();
    match err {
        AuthError::TierRequired { required } => assert_eq!(required, SubscriptionTier::Pro),
        other => panic!("expected TierRequired, got {other:?}"),
    }
}

#[tokio::test]
async fn max_roles_per_user_is_enforced() {
    let mut config = common::test_config();
    config.rbac.max_roles_per_user = 2;
    let harness = common::harness_with(config).await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let rbac = &harness.core.rbac;

    for i in 0..2 {
        let role = rbac
            .create_role(role_input(&format!("cap:role-{i}"), 1), "admin-1")
            .await
            .unwrap();
        rbac.assign_role(&user.id, &role.id, None, "admin-1")
            .await
            .unwrap();
    }

    let overflow = rbac
        .create_role(role_input("cap:role-overflow", 1), "admin-1")
        .await
        .unwrap();
    let err = rbac
        .assign_role(&user.id, &overflow.id, None, "admin-1")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Validation(_)));
}

#[tokio::test]
async fn duplicate_role_names_are_rejected() {
    let harness = common::harness().await;
    let rbac = &harness.core.rbac;

    rbac.create_role(role_input("dup:role", 1), "admin-1")
        .await
        .unwrap();
    let err = rbac
        .create_role(role_input("dup:role", 1), "admin-1")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Validation(_)));
}

#[tokio::test]
async fn mutations_append_to_the_audit_log() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let rbac = &harness.core.rbac;

    let role = rbac
        .create_role(role_input("audited:role", 1), "admin-1")
        .await
        .unwrap();
    let permission = rbac
        .create_permission(permission_input("audited:perm"), "admin-1")
        .await
        .unwrap();
    rbac.grant_permission_to_role(&role.id, &permission.id, "admin-1")
        .await
        .unwrap();
    rbac.assign_role(&user.id, &role.id, None, "admin-1")
        .await
        .unwrap();
    rbac.remove_role(&user.id, &role.id, "admin-1").await.unwrap();

    // Audit writes are fire-and-forget; wait for the spawned appends.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let entries = rbac.list_audit(&AuditFilters::default()).await.unwrap();
    let actions: Vec<&str> = entries.iter().map(|e| e.action.as_str()).collect();
    for expected in [
        "role_created",
        "permission_created",
        "permission_granted",
        "user_role_assigned",
        "user_role_removed",
    ] {
        assert!(actions.contains(&expected), "missing audit action {expected}");
    }

    let assignment_entry = entries
        .iter()
        .find(|e| e.action == "user_role_assigned")
        .unwrap();
    assert_eq!(assignment_entry.actor_id, "admin-1");
    assert_eq!(assignment_entry.target_id, user.id);
    assert_eq!(assignment_entry.role_id.as_deref(), Some(role.id.as_str()));
}
