//! Capability interfaces for the persistence the core depends on.
//!
//! One trait per store; core logic depends only on these contracts, and the
//! backing implementation is chosen at composition time. `memory` is the
//! reference implementation used by tests; `redis` backs the blacklist and
//! permission cache in deployments that have one. Database-backed variants
//! live outside this crate.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::models::{
    AuditFilters, BackupCodeSet, BlacklistEntry, MfaAttempt, MfaChallenge, OAuthState, Permission,
    PermissionFilters, PlayerProfile, Provider, RefreshTokenRecord, RevocationReason, Role,
    RoleAuditEntry, RoleFilters, TeamRoleAssignment, TokenRotation, TotpSecret, User,
    UserRoleAssignment, WebAuthnCredentialRecord,
};

/// User records.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, anyhow::Error>;
    async fn find_by_provider_id(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<Option<User>, anyhow::Error>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error>;
    async fn create(&self, user: &User) -> Result<(), anyhow::Error>;
    async fn update(&self, user: &User) -> Result<(), anyhow::Error>;
    async fn update_player_profile(
        &self,
        user_id: &str,
        profile: &PlayerProfile,
    ) -> Result<(), anyhow::Error>;
}

/// OAuth CSRF state, keyed by the opaque state token.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn put(&self, state: &OAuthState) -> Result<(), anyhow::Error>;

    /// Atomic fetch-and-delete. The record is gone after this call whether or
    /// not it had expired; a separate get/delete pair would leave a replay
    /// window.
    async fn take(&self, state: &str) -> Result<Option<OAuthState>, anyhow::Error>;

    async fn cleanup_expired(&self) -> Result<u64, anyhow::Error>;
}

/// Refresh-token records, keyed by token id (jti).
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn put(&self, record: &RefreshTokenRecord) -> Result<(), anyhow::Error>;
    async fn get(&self, token_id: &str) -> Result<Option<RefreshTokenRecord>, anyhow::Error>;

    /// Single conditional write: mark Active -> Revoked(reason) only if the
    /// record is currently active. Returns whether this caller performed the
    /// transition; concurrent rotation relies on exactly one caller winning.
    async fn revoke_if_active(
        &self,
        token_id: &str,
        reason: RevocationReason,
    ) -> Result<bool, anyhow::Error>;

    /// Idempotent revocation: already-revoked and missing tokens are a no-op.
    async fn revoke(&self, token_id: &str, reason: RevocationReason) -> Result<(), anyhow::Error>;

    /// Revoke every active token for a user. Returns how many were revoked.
    async fn revoke_all_for_user(
        &self,
        user_id: &str,
        reason: RevocationReason,
    ) -> Result<u64, anyhow::Error>;

    async fn list_for_user(&self, user_id: &str)
        -> Result<Vec<RefreshTokenRecord>, anyhow::Error>;
    async fn cleanup_expired(&self) -> Result<u64, anyhow::Error>;
}

/// Denylist of not-yet-expired access-token ids.
#[async_trait]
pub trait BlacklistStore: Send + Sync {
    async fn insert(&self, entry: &BlacklistEntry) -> Result<(), anyhow::Error>;
    async fn contains(&self, token_id: &str) -> Result<bool, anyhow::Error>;
    async fn cleanup_expired(&self) -> Result<u64, anyhow::Error>;
}

/// Append-only rotation audit.
#[async_trait]
pub trait RotationStore: Send + Sync {
    async fn record(&self, rotation: &TokenRotation) -> Result<(), anyhow::Error>;
    async fn chain_for_token(&self, token_id: &str)
        -> Result<Vec<TokenRotation>, anyhow::Error>;
}

/// Roles, permissions, assignments, and the RBAC audit log.
#[async_trait]
pub trait RbacStore: Send + Sync {
    // Roles
    async fn create_role(&self, role: &Role) -> Result<(), anyhow::Error>;
    async fn get_role(&self, role_id: &str) -> Result<Option<Role>, anyhow::Error>;
    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>, anyhow::Error>;
    async fn update_role(&self, role: &Role) -> Result<(), anyhow::Error>;
    async fn delete_role(&self, role_id: &str) -> Result<(), anyhow::Error>;
    async fn list_roles(&self, filters: &RoleFilters) -> Result<Vec<Role>, anyhow::Error>;

    // Permissions
    async fn create_permission(&self, permission: &Permission) -> Result<(), anyhow::Error>;
    async fn get_permission(
        &self,
        permission_id: &str,
    ) -> Result<Option<Permission>, anyhow::Error>;
    async fn get_permission_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Permission>, anyhow::Error>;
    async fn list_permissions(
        &self,
        filters: &PermissionFilters,
    ) -> Result<Vec<Permission>, anyhow::Error>;

    // Role <-> permission
    async fn add_permission_to_role(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<(), anyhow::Error>;
    async fn remove_permission_from_role(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<(), anyhow::Error>;
    async fn role_permissions(&self, role_id: &str) -> Result<Vec<Permission>, anyhow::Error>;

    // User <-> role
    async fn assign_user_role(&self, assignment: &UserRoleAssignment)
        -> Result<(), anyhow::Error>;
    async fn remove_user_role(&self, user_id: &str, role_id: &str) -> Result<(), anyhow::Error>;
    async fn user_roles(&self, user_id: &str) -> Result<Vec<UserRoleAssignment>, anyhow::Error>;

    // Team <-> role
    async fn assign_team_role(&self, assignment: &TeamRoleAssignment)
        -> Result<(), anyhow::Error>;
    async fn remove_team_role(
        &self,
        team_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), anyhow::Error>;
    async fn user_team_roles(
        &self,
        user_id: &str,
    ) -> Result<Vec<TeamRoleAssignment>, anyhow::Error>;

    // Audit
    async fn append_audit(&self, entry: &RoleAuditEntry) -> Result<(), anyhow::Error>;
    async fn list_audit(&self, filters: &AuditFilters)
        -> Result<Vec<RoleAuditEntry>, anyhow::Error>;
}

/// Short-TTL cache of resolved user permission sets.
#[async_trait]
pub trait PermissionCache: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<Vec<String>>, anyhow::Error>;
    async fn set(
        &self,
        user_id: &str,
        permissions: &[String],
        ttl: Duration,
    ) -> Result<(), anyhow::Error>;
    async fn invalidate_user(&self, user_id: &str) -> Result<(), anyhow::Error>;

    /// Without a role -> users reverse index this may flush the entire cache.
    /// That is the accepted tradeoff; it must never degrade to a no-op.
    async fn invalidate_role(&self, role_id: &str) -> Result<(), anyhow::Error>;

    async fn invalidate_all(&self) -> Result<(), anyhow::Error>;
}

/// MFA factor data: TOTP secrets, WebAuthn credentials, backup codes,
/// challenges, and the attempt audit.
#[async_trait]
pub trait MfaStore: Send + Sync {
    // TOTP
    async fn put_totp_secret(&self, secret: &TotpSecret) -> Result<(), anyhow::Error>;
    async fn get_totp_secret(&self, user_id: &str) -> Result<Option<TotpSecret>, anyhow::Error>;
    async fn delete_totp_secret(&self, user_id: &str) -> Result<(), anyhow::Error>;

    // WebAuthn
    async fn put_webauthn_credential(
        &self,
        credential: &WebAuthnCredentialRecord,
    ) -> Result<(), anyhow::Error>;
    async fn get_webauthn_credential(
        &self,
        credential_id: &str,
    ) -> Result<Option<WebAuthnCredentialRecord>, anyhow::Error>;
    async fn user_webauthn_credentials(
        &self,
        user_id: &str,
    ) -> Result<Vec<WebAuthnCredentialRecord>, anyhow::Error>;
    async fn delete_webauthn_credential(
        &self,
        user_id: &str,
        credential_id: &str,
    ) -> Result<(), anyhow::Error>;

    // Backup codes
    async fn put_backup_codes(&self, set: &BackupCodeSet) -> Result<(), anyhow::Error>;
    async fn get_backup_codes(
        &self,
        user_id: &str,
    ) -> Result<Option<BackupCodeSet>, anyhow::Error>;

    /// Atomically consume a backup code. Returns false for unknown or
    /// already-used codes.
    async fn use_backup_code(&self, user_id: &str, code: &str) -> Result<bool, anyhow::Error>;

    async fn delete_backup_codes(&self, user_id: &str) -> Result<(), anyhow::Error>;

    // Challenges
    async fn put_challenge(&self, challenge: &MfaChallenge) -> Result<(), anyhow::Error>;
    async fn get_challenge(
        &self,
        challenge_id: &str,
    ) -> Result<Option<MfaChallenge>, anyhow::Error>;

    /// Atomic one-shot completion: returns the challenge only if it was
    /// pending and unexpired at the moment of the call. Missing, expired,
    /// and already-completed challenges all yield `None`.
    async fn complete_challenge(
        &self,
        challenge_id: &str,
    ) -> Result<Option<MfaChallenge>, anyhow::Error>;

    async fn delete_challenge(&self, challenge_id: &str) -> Result<(), anyhow::Error>;

    // Attempts
    async fn record_attempt(&self, attempt: &MfaAttempt) -> Result<(), anyhow::Error>;
    async fn attempts_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MfaAttempt>, anyhow::Error>;
}
