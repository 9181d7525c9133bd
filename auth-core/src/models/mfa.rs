//! Multi-factor authentication records: TOTP secrets, WebAuthn credentials,
//! backup codes, challenges, and the attempt audit trail.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-user TOTP enrollment. Created disabled and unverified; the first
/// successful code verification flips both flags. Disabling is terminal
/// until a fresh setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TotpSecret {
    pub user_id: String,
    /// Base32-encoded shared secret.
    pub secret: String,
    pub otpauth_url: String,
    /// Backup codes generated at setup, activated on first verification.
    #[serde(default)]
    pub pending_backup_codes: Vec<String>,
    pub enabled: bool,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// A registered WebAuthn authenticator. The serialized passkey carries the
/// public key and attestation data; `sign_count` is tracked separately so a
/// counter regression can be detected against the last accepted value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebAuthnCredentialRecord {
    /// Credential id, base64url-encoded.
    pub id: String,
    pub user_id: String,
    /// Serialized `webauthn_rs` passkey.
    pub passkey: serde_json::Value,
    pub sign_count: u32,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Fixed set of one-time recovery codes. Each code flips to used exactly
/// once; regeneration replaces the whole set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupCodeSet {
    pub user_id: String,
    /// code -> used
    pub codes: HashMap<String, bool>,
    pub created_at: DateTime<Utc>,
    pub used_count: u32,
}

impl BackupCodeSet {
    pub fn new(user_id: String, codes: Vec<String>) -> Self {
        Self {
            user_id,
            codes: codes.into_iter().map(|c| (c, false)).collect(),
            created_at: Utc::now(),
            used_count: 0,
        }
    }

    pub fn unused(&self) -> Vec<&str> {
        self.codes
            .iter()
            .filter(|(_, used)| !**used)
            .map(|(code, _)| code.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeType {
    Totp,
    WebauthnRegistration,
    WebauthnAuthentication,
    BackupCode,
}

impl ChallengeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeType::Totp => "totp",
            ChallengeType::WebauthnRegistration => "webauthn_registration",
            ChallengeType::WebauthnAuthentication => "webauthn_authentication",
            ChallengeType::BackupCode => "backup_code",
        }
    }
}

/// Time-boxed, single-use MFA challenge. Exactly one transition to
/// completed is valid; expired and completed are both terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaChallenge {
    pub id: String,
    pub user_id: String,
    pub challenge_type: ChallengeType,
    /// Opaque ceremony state (e.g. in-progress WebAuthn registration).
    pub session_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MfaChallenge {
    pub fn new(
        user_id: String,
        challenge_type: ChallengeType,
        session_data: serde_json::Value,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            challenge_type,
            session_data,
            created_at: now,
            expires_at: now + ttl,
            completed: false,
            completed_at: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Append-only audit record of a single verification attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaAttempt {
    pub id: String,
    pub user_id: String,
    pub method: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub action: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

impl MfaAttempt {
    pub fn new(user_id: &str, method: &str, success: bool, error_message: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            method: method.to_string(),
            success,
            error_message,
            action: None,
            attempted_at: Utc::now(),
        }
    }
}
