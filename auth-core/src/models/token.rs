//! Refresh-token records, rotation audit edges, and blacklist entries.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Device/client context captured at token issuance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: Option<String>,
    pub platform: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub fingerprint: Option<String>,
}

/// Why a refresh token was revoked. Terminal either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    Rotated,
    Manual,
    ExcessiveUsage,
    BulkLogout,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::Rotated => "rotated",
            RevocationReason::Manual => "manual",
            RevocationReason::ExcessiveUsage => "excessive_usage",
            RevocationReason::BulkLogout => "bulk_logout",
        }
    }
}

/// Server-side record of a refresh token. Stores a one-way hash of the signed
/// token string, never the string itself.
///
/// State machine: Active -> Rotated | Revoked | Expired, all terminal. The
/// revoked flag (with its reason) covers the first two; expiry is implicit
/// from `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub device: Option<DeviceInfo>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage_count: i64,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<RevocationReason>,
    pub rotation_count: i32,
    pub parent_id: Option<String>,
    pub version: i32,
}

impl RefreshTokenRecord {
    pub fn new(
        id: String,
        user_id: String,
        token: &str,
        ttl: Duration,
        device: Option<DeviceInfo>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            token_hash: Self::hash_token(token),
            device,
            metadata: HashMap::new(),
            issued_at: now,
            expires_at: now + ttl,
            last_used_at: None,
            usage_count: 0,
            revoked: false,
            revoked_at: None,
            revoked_reason: None,
            rotation_count: 0,
            parent_id: None,
            version: 1,
        }
    }

    /// SHA-256 hash of the signed token string, hex-encoded.
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// A token whose expiry equals "now" is already expired.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn is_active(&self) -> bool {
        !self.revoked && !self.is_expired()
    }
}

/// Immutable audit edge linking a rotated-out token to its successor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRotation {
    pub id: String,
    pub old_token_id: String,
    pub new_token_id: String,
    pub user_id: String,
    pub reason: String,
    pub rotated_at: DateTime<Utc>,
}

impl TokenRotation {
    pub fn new(old_token_id: String, new_token_id: String, user_id: String, reason: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            old_token_id,
            new_token_id,
            user_id,
            reason: reason.to_string(),
            rotated_at: Utc::now(),
        }
    }
}

/// Denylist entry for a not-yet-expired access token. Meaningless after its
/// natural expiry and may be purged then.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ttl: Duration) -> RefreshTokenRecord {
        RefreshTokenRecord::new(
            "tok-1".to_string(),
            "user-1".to_string(),
            "signed.token.string",
            ttl,
            None,
        )
    }

    #[test]
    fn stores_hash_not_token() {
        let rec = record(Duration::days(7));
        assert_ne!(rec.token_hash, "signed.token.string");
        assert_eq!(
            rec.token_hash,
            RefreshTokenRecord::hash_token("signed.token.string")
        );
        assert!(rec.is_active());
    }

    #[test]
    fn expiry_boundary_is_exclusive_of_now() {
        let mut rec = record(Duration::days(7));

        rec.expires_at = Utc::now() + Duration::seconds(1);
        assert!(!rec.is_expired());

        rec.expires_at = Utc::now();
        assert!(rec.is_expired());

        rec.expires_at = Utc::now() - Duration::seconds(1);
        assert!(rec.is_expired());
        assert!(!rec.is_active());
    }

    #[test]
    fn revocation_terminates_activity() {
        let mut rec = record(Duration::days(7));
        assert!(rec.is_active());
        rec.revoked = true;
        rec.revoked_reason = Some(RevocationReason::Manual);
        assert!(!rec.is_active());
    }
}
