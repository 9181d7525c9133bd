pub mod mfa;
pub mod oauth_state;
pub mod role;
pub mod token;
pub mod user;

pub use mfa::{
    BackupCodeSet, ChallengeType, MfaAttempt, MfaChallenge, TotpSecret, WebAuthnCredentialRecord,
};
pub use oauth_state::OAuthState;
pub use role::{
    default_permissions, default_roles, AuditFilters, CreatePermission, CreateRole, Permission,
    PermissionFilters, PermissionScope, Role, RoleAuditEntry, RoleFilters, RoleType,
    TeamRoleAssignment, UserRoleAssignment,
};
pub use token::{
    BlacklistEntry, DeviceInfo, RefreshTokenRecord, RevocationReason, TokenRotation,
};
pub use user::{PlayerProfile, Provider, SubscriptionTier, User};
