//! In-memory store implementations.
//!
//! Reference semantics for every contract in this module's parent, used by
//! the test suite and by single-process deployments. The conditional writes
//! (`revoke_if_active`, `take`, `complete_challenge`, `use_backup_code`)
//! mutate under the map's per-key lock, which is what makes them atomic.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::models::{
    AuditFilters, BackupCodeSet, BlacklistEntry, MfaAttempt, MfaChallenge, OAuthState, Permission,
    PermissionFilters, PlayerProfile, Provider, RefreshTokenRecord, RevocationReason, Role,
    RoleAuditEntry, RoleFilters, TeamRoleAssignment, TokenRotation, TotpSecret, User,
    UserRoleAssignment, WebAuthnCredentialRecord,
};
use crate::stores::{
    BlacklistStore, MfaStore, PermissionCache, RbacStore, RefreshTokenStore, RotationStore,
    StateStore, UserStore,
};

#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<String, User>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, anyhow::Error> {
        Ok(self.users.get(user_id).map(|u| u.clone()))
    }

    async fn find_by_provider_id(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<Option<User>, anyhow::Error> {
        Ok(self
            .users
            .iter()
            .find(|u| u.provider == provider && u.provider_id == provider_id)
            .map(|u| u.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error> {
        Ok(self
            .users
            .iter()
            .find(|u| u.email == email)
            .map(|u| u.clone()))
    }

    async fn create(&self, user: &User) -> Result<(), anyhow::Error> {
        if self.users.contains_key(&user.id) {
            anyhow::bail!("user {} already exists", user.id);
        }
        self.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<(), anyhow::Error> {
        match self.users.get_mut(&user.id) {
            Some(mut existing) => {
                *existing = user.clone();
                Ok(())
            }
            None => anyhow::bail!("user {} not found", user.id),
        }
    }

    async fn update_player_profile(
        &self,
        user_id: &str,
        profile: &PlayerProfile,
    ) -> Result<(), anyhow::Error> {
        match self.users.get_mut(user_id) {
            Some(mut user) => {
                user.profile = profile.clone();
                user.updated_at = Utc::now();
                Ok(())
            }
            None => anyhow::bail!("user {user_id} not found"),
        }
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    states: DashMap<String, OAuthState>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn put(&self, state: &OAuthState) -> Result<(), anyhow::Error> {
        self.states.insert(state.state.clone(), state.clone());
        Ok(())
    }

    async fn take(&self, state: &str) -> Result<Option<OAuthState>, anyhow::Error> {
        // remove() is the fetch-and-delete; expired entries are consumed
        // but reported as absent.
        Ok(self
            .states
            .remove(state)
            .map(|(_, st)| st)
            .filter(|st| !st.is_expired()))
    }

    async fn cleanup_expired(&self) -> Result<u64, anyhow::Error> {
        let before = self.states.len();
        self.states.retain(|_, st| !st.is_expired());
        Ok((before - self.states.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryRefreshTokenStore {
    tokens: DashMap<String, RefreshTokenRecord>,
}

impl MemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshTokenStore {
    async fn put(&self, record: &RefreshTokenRecord) -> Result<(), anyhow::Error> {
        self.tokens.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, token_id: &str) -> Result<Option<RefreshTokenRecord>, anyhow::Error> {
        Ok(self.tokens.get(token_id).map(|t| t.clone()))
    }

    async fn revoke_if_active(
        &self,
        token_id: &str,
        reason: RevocationReason,
    ) -> Result<bool, anyhow::Error> {
        match self.tokens.get_mut(token_id) {
            Some(mut record) if record.is_active() => {
                record.revoked = true;
                record.revoked_at = Some(Utc::now());
                record.revoked_reason = Some(reason);
                record.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke(&self, token_id: &str, reason: RevocationReason) -> Result<(), anyhow::Error> {
        if let Some(mut record) = self.tokens.get_mut(token_id) {
            if !record.revoked {
                record.revoked = true;
                record.revoked_at = Some(Utc::now());
                record.revoked_reason = Some(reason);
                record.version += 1;
            }
        }
        Ok(())
    }

    async fn revoke_all_for_user(
        &self,
        user_id: &str,
        reason: RevocationReason,
    ) -> Result<u64, anyhow::Error> {
        let mut revoked = 0;
        for mut record in self.tokens.iter_mut() {
            if record.user_id == user_id && record.is_active() {
                record.revoked = true;
                record.revoked_at = Some(Utc::now());
                record.revoked_reason = Some(reason);
                record.version += 1;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn list_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<RefreshTokenRecord>, anyhow::Error> {
        Ok(self
            .tokens
            .iter()
            .filter(|t| t.user_id == user_id)
            .map(|t| t.clone())
            .collect())
    }

    async fn cleanup_expired(&self) -> Result<u64, anyhow::Error> {
        let before = self.tokens.len();
        self.tokens.retain(|_, t| !t.is_expired());
        Ok((before - self.tokens.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryBlacklistStore {
    entries: DashMap<String, DateTime<Utc>>,
}

impl MemoryBlacklistStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlacklistStore for MemoryBlacklistStore {
    async fn insert(&self, entry: &BlacklistEntry) -> Result<(), anyhow::Error> {
        self.entries.insert(entry.token_id.clone(), entry.expires_at);
        Ok(())
    }

    async fn contains(&self, token_id: &str) -> Result<bool, anyhow::Error> {
        Ok(self
            .entries
            .get(token_id)
            .map(|exp| *exp > Utc::now())
            .unwrap_or(false))
    }

    async fn cleanup_expired(&self) -> Result<u64, anyhow::Error> {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, exp| *exp > now);
        Ok((before - self.entries.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryRotationStore {
    edges: Mutex<Vec<TokenRotation>>,
}

impl MemoryRotationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RotationStore for MemoryRotationStore {
    async fn record(&self, rotation: &TokenRotation) -> Result<(), anyhow::Error> {
        self.edges
            .lock()
            .map_err(|e| anyhow::anyhow!("rotation store mutex poisoned: {e}"))?
            .push(rotation.clone());
        Ok(())
    }

    async fn chain_for_token(
        &self,
        token_id: &str,
    ) -> Result<Vec<TokenRotation>, anyhow::Error> {
        let edges = self
            .edges
            .lock()
            .map_err(|e| anyhow::anyhow!("rotation store mutex poisoned: {e}"))?;
        Ok(edges
            .iter()
            .filter(|r| r.old_token_id == token_id || r.new_token_id == token_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryRbacStore {
    roles: DashMap<String, Role>,
    permissions: DashMap<String, Permission>,
    role_permissions: DashMap<String, Vec<String>>,
    user_roles: DashMap<String, Vec<UserRoleAssignment>>,
    team_roles: DashMap<String, Vec<TeamRoleAssignment>>,
    audit: Mutex<Vec<RoleAuditEntry>>,
}

impl MemoryRbacStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the default system roles and permissions.
    pub async fn seeded() -> Result<Self, anyhow::Error> {
        let store = Self::new();
        for role in crate::models::default_roles() {
            store.create_role(&role).await?;
        }
        for permission in crate::models::default_permissions() {
            store.create_permission(&permission).await?;
        }
        Ok(store)
    }
}

#[async_trait]
impl RbacStore for MemoryRbacStore {
    async fn create_role(&self, role: &Role) -> Result<(), anyhow::Error> {
        if self.roles.contains_key(&role.id) {
            anyhow::bail!("role {} already exists", role.id);
        }
        self.roles.insert(role.id.clone(), role.clone());
        Ok(())
    }

    async fn get_role(&self, role_id: &str) -> Result<Option<Role>, anyhow::Error> {
        Ok(self.roles.get(role_id).map(|r| r.clone()))
    }

    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>, anyhow::Error> {
        Ok(self
            .roles
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.clone()))
    }

    async fn update_role(&self, role: &Role) -> Result<(), anyhow::Error> {
        match self.roles.get_mut(&role.id) {
            Some(mut existing) => {
                *existing = role.clone();
                Ok(())
            }
            None => anyhow::bail!("role {} not found", role.id),
        }
    }

    async fn delete_role(&self, role_id: &str) -> Result<(), anyhow::Error> {
        self.roles.remove(role_id);
        self.role_permissions.remove(role_id);
        Ok(())
    }

    async fn list_roles(&self, filters: &RoleFilters) -> Result<Vec<Role>, anyhow::Error> {
        Ok(self
            .roles
            .iter()
            .filter(|r| {
                filters.role_type.map_or(true, |t| r.role_type == t)
                    && filters.is_active.map_or(true, |a| r.is_active == a)
                    && filters.is_system.map_or(true, |s| r.is_system == s)
            })
            .map(|r| r.clone())
            .collect())
    }

    async fn create_permission(&self, permission: &Permission) -> Result<(), anyhow::Error> {
        if self.permissions.contains_key(&permission.id) {
            anyhow::bail!("permission {} already exists", permission.id);
        }
        self.permissions
            .insert(permission.id.clone(), permission.clone());
        Ok(())
    }

    async fn get_permission(
        &self,
        permission_id: &str,
    ) -> Result<Option<Permission>, anyhow::Error> {
        Ok(self.permissions.get(permission_id).map(|p| p.clone()))
    }

    async fn get_permission_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Permission>, anyhow::Error> {
        Ok(self
            .permissions
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.clone()))
    }

    async fn list_permissions(
        &self,
        filters: &PermissionFilters,
    ) -> Result<Vec<Permission>, anyhow::Error> {
        Ok(self
            .permissions
            .iter()
            .filter(|p| {
                filters.category.as_deref().map_or(true, |c| p.category == c)
                    && filters.resource.as_deref().map_or(true, |r| p.resource == r)
                    && filters.scope.map_or(true, |s| p.scope == s)
                    && filters.is_active.map_or(true, |a| p.is_active == a)
            })
            .map(|p| p.clone())
            .collect())
    }

    async fn add_permission_to_role(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<(), anyhow::Error> {
        let mut perms = self
            .role_permissions
            .entry(role_id.to_string())
            .or_default();
        if !perms.iter().any(|p| p == permission_id) {
            perms.push(permission_id.to_string());
        }
        Ok(())
    }

    async fn remove_permission_from_role(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<(), anyhow::Error> {
        if let Some(mut perms) = self.role_permissions.get_mut(role_id) {
            perms.retain(|p| p != permission_id);
        }
        Ok(())
    }

    async fn role_permissions(&self, role_id: &str) -> Result<Vec<Permission>, anyhow::Error> {
        let ids = self
            .role_permissions
            .get(role_id)
            .map(|p| p.clone())
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| self.permissions.get(id).map(|p| p.clone()))
            .collect())
    }

    async fn assign_user_role(
        &self,
        assignment: &UserRoleAssignment,
    ) -> Result<(), anyhow::Error> {
        self.user_roles
            .entry(assignment.user_id.clone())
            .or_default()
            .push(assignment.clone());
        Ok(())
    }

    async fn remove_user_role(&self, user_id: &str, role_id: &str) -> Result<(), anyhow::Error> {
        if let Some(mut assignments) = self.user_roles.get_mut(user_id) {
            assignments.retain(|a| a.role_id != role_id);
        }
        Ok(())
    }

    async fn user_roles(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserRoleAssignment>, anyhow::Error> {
        Ok(self
            .user_roles
            .get(user_id)
            .map(|a| a.clone())
            .unwrap_or_default())
    }

    async fn assign_team_role(
        &self,
        assignment: &TeamRoleAssignment,
    ) -> Result<(), anyhow::Error> {
        self.team_roles
            .entry(assignment.user_id.clone())
            .or_default()
            .push(assignment.clone());
        Ok(())
    }

    async fn remove_team_role(
        &self,
        team_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), anyhow::Error> {
        if let Some(mut assignments) = self.team_roles.get_mut(user_id) {
            assignments.retain(|a| !(a.team_id == team_id && a.role_id == role_id));
        }
        Ok(())
    }

    async fn user_team_roles(
        &self,
        user_id: &str,
    ) -> Result<Vec<TeamRoleAssignment>, anyhow::Error> {
        Ok(self
            .team_roles
            .get(user_id)
            .map(|a| a.clone())
            .unwrap_or_default())
    }

    async fn append_audit(&self, entry: &RoleAuditEntry) -> Result<(), anyhow::Error> {
        self.audit
            .lock()
            .map_err(|e| anyhow::anyhow!("audit mutex poisoned: {e}"))?
            .push(entry.clone());
        Ok(())
    }

    async fn list_audit(
        &self,
        filters: &AuditFilters,
    ) -> Result<Vec<RoleAuditEntry>, anyhow::Error> {
        let audit = self
            .audit
            .lock()
            .map_err(|e| anyhow::anyhow!("audit mutex poisoned: {e}"))?;
        Ok(audit
            .iter()
            .filter(|e| {
                filters.actor_id.as_deref().map_or(true, |a| e.actor_id == a)
                    && filters
                        .target_id
                        .as_deref()
                        .map_or(true, |t| e.target_id == t)
                    && filters.action.as_deref().map_or(true, |a| e.action == a)
                    && filters.since.map_or(true, |s| e.timestamp >= s)
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryPermissionCache {
    entries: DashMap<String, (Vec<String>, DateTime<Utc>)>,
}

impl MemoryPermissionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PermissionCache for MemoryPermissionCache {
    async fn get(&self, user_id: &str) -> Result<Option<Vec<String>>, anyhow::Error> {
        Ok(self
            .entries
            .get(user_id)
            .filter(|entry| entry.1 > Utc::now())
            .map(|entry| entry.0.clone()))
    }

    async fn set(
        &self,
        user_id: &str,
        permissions: &[String],
        ttl: Duration,
    ) -> Result<(), anyhow::Error> {
        self.entries
            .insert(user_id.to_string(), (permissions.to_vec(), Utc::now() + ttl));
        Ok(())
    }

    async fn invalidate_user(&self, user_id: &str) -> Result<(), anyhow::Error> {
        self.entries.remove(user_id);
        Ok(())
    }

    async fn invalidate_role(&self, role_id: &str) -> Result<(), anyhow::Error> {
        // No reverse index from role to affected users: flush everything
        // rather than serve stale authorization decisions.
        tracing::warn!(role_id, "role-level invalidation, flushing permission cache");
        self.entries.clear();
        Ok(())
    }

    async fn invalidate_all(&self) -> Result<(), anyhow::Error> {
        self.entries.clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryMfaStore {
    totp: DashMap<String, TotpSecret>,
    credentials: DashMap<String, WebAuthnCredentialRecord>,
    backup_codes: DashMap<String, BackupCodeSet>,
    challenges: DashMap<String, MfaChallenge>,
    attempts: Mutex<Vec<MfaAttempt>>,
}

impl MemoryMfaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MfaStore for MemoryMfaStore {
    async fn put_totp_secret(&self, secret: &TotpSecret) -> Result<(), anyhow::Error> {
        self.totp.insert(secret.user_id.clone(), secret.clone());
        Ok(())
    }

    async fn get_totp_secret(&self, user_id: &str) -> Result<Option<TotpSecret>, anyhow::Error> {
        Ok(self.totp.get(user_id).map(|s| s.clone()))
    }

    async fn delete_totp_secret(&self, user_id: &str) -> Result<(), anyhow::Error> {
        self.totp.remove(user_id);
        Ok(())
    }

    async fn put_webauthn_credential(
        &self,
        credential: &WebAuthnCredentialRecord,
    ) -> Result<(), anyhow::Error> {
        self.credentials
            .insert(credential.id.clone(), credential.clone());
        Ok(())
    }

    async fn get_webauthn_credential(
        &self,
        credential_id: &str,
    ) -> Result<Option<WebAuthnCredentialRecord>, anyhow::Error> {
        Ok(self.credentials.get(credential_id).map(|c| c.clone()))
    }

    async fn user_webauthn_credentials(
        &self,
        user_id: &str,
    ) -> Result<Vec<WebAuthnCredentialRecord>, anyhow::Error> {
        Ok(self
            .credentials
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.clone())
            .collect())
    }

    async fn delete_webauthn_credential(
        &self,
        user_id: &str,
        credential_id: &str,
    ) -> Result<(), anyhow::Error> {
        self.credentials
            .remove_if(credential_id, |_, c| c.user_id == user_id);
        Ok(())
    }

    async fn put_backup_codes(&self, set: &BackupCodeSet) -> Result<(), anyhow::Error> {
        self.backup_codes.insert(set.user_id.clone(), set.clone());
        Ok(())
    }

    async fn get_backup_codes(
        &self,
        user_id: &str,
    ) -> Result<Option<BackupCodeSet>, anyhow::Error> {
        Ok(self.backup_codes.get(user_id).map(|s| s.clone()))
    }

    async fn use_backup_code(&self, user_id: &str, code: &str) -> Result<bool, anyhow::Error> {
        match self.backup_codes.get_mut(user_id) {
            Some(mut set) => match set.codes.get_mut(code) {
                Some(used) if !*used => {
                    *used = true;
                    set.used_count += 1;
                    Ok(true)
                }
                _ => Ok(false),
            },
            None => Ok(false),
        }
    }

    async fn delete_backup_codes(&self, user_id: &str) -> Result<(), anyhow::Error> {
        self.backup_codes.remove(user_id);
        Ok(())
    }

    async fn put_challenge(&self, challenge: &MfaChallenge) -> Result<(), anyhow::Error> {
        self.challenges
            .insert(challenge.id.clone(), challenge.clone());
        Ok(())
    }

    async fn get_challenge(
        &self,
        challenge_id: &str,
    ) -> Result<Option<MfaChallenge>, anyhow::Error> {
        Ok(self.challenges.get(challenge_id).map(|c| c.clone()))
    }

    async fn complete_challenge(
        &self,
        challenge_id: &str,
    ) -> Result<Option<MfaChallenge>, anyhow::Error> {
        match self.challenges.get_mut(challenge_id) {
            Some(mut challenge) if !challenge.completed && !challenge.is_expired() => {
                challenge.completed = true;
                challenge.completed_at = Some(Utc::now());
                Ok(Some(challenge.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_challenge(&self, challenge_id: &str) -> Result<(), anyhow::Error> {
        self.challenges.remove(challenge_id);
        Ok(())
    }

    async fn record_attempt(&self, attempt: &MfaAttempt) -> Result<(), anyhow::Error> {
        self.attempts
            .lock()
            .map_err(|e| anyhow::anyhow!("attempt mutex poisoned: {e}"))?
            .push(attempt.clone());
        Ok(())
    }

    async fn attempts_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MfaAttempt>, anyhow::Error> {
        let attempts = self
            .attempts
            .lock()
            .map_err(|e| anyhow::anyhow!("attempt mutex poisoned: {e}"))?;
        Ok(attempts
            .iter()
            .filter(|a| a.user_id == user_id && a.attempted_at >= since)
            .cloned()
            .collect())
    }
}
