//! Error taxonomy for the identity core.
//!
//! Callers get one of five categories. Authentication failures are collapsed
//! into a single generic client message so that the API never acts as a
//! token-validity oracle; the precise sub-reason stays in server-side logs
//! and audit records.

use thiserror::Error;

use crate::models::user::SubscriptionTier;

#[derive(Error, Debug)]
pub enum AuthError {
    // --- Validation: malformed input, rejected before any store access ---
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported OAuth provider: {0}")]
    UnsupportedProvider(String),

    // --- Authentication failures (fail closed) ---
    #[error("Invalid or expired OAuth state")]
    InvalidState,

    #[error("OAuth provider mismatch: state was issued for {expected}, callback came from {got}")]
    ProviderMismatch { expected: String, got: String },

    #[error("OAuth provider error: {code}: {description}")]
    Provider { code: String, description: String },

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token revoked")]
    TokenRevoked,

    #[error("Token not found")]
    TokenNotFound,

    #[error("Token is blacklisted")]
    TokenBlacklisted,

    #[error("Token hash mismatch")]
    TamperedToken,

    #[error("Token already rotated")]
    AlreadyRotated,

    #[error("Refresh token usage limit exceeded")]
    UsageLimitExceeded,

    #[error("TOTP already enabled")]
    AlreadyEnabled,

    #[error("MFA not configured for this account")]
    MfaNotConfigured,

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("MFA challenge is missing, expired, or already completed")]
    ChallengeInvalid,

    #[error("Authenticator credential flagged as compromised")]
    CredentialCompromised,

    #[error("User not found")]
    UserNotFound,

    // --- Authorization failures (valid identity, insufficient rights) ---
    #[error("Permission denied: {permission}")]
    PermissionDenied {
        permission: String,
        hint: Option<String>,
    },

    #[error("Subscription tier {required} or higher required")]
    TierRequired { required: SubscriptionTier },

    #[error("Action {action} requires multi-factor verification")]
    MfaRequired { action: String },

    // --- Rate limiting ---
    #[error("Too many attempts, retry after {retry_after_secs}s")]
    TooManyAttempts { retry_after_secs: i64 },

    // --- Internal ---
    #[error("Operation timed out")]
    Timeout,

    #[error("Store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Coarse error category, used by the enforcement layer to pick a response
/// shape without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Authentication,
    Authorization,
    RateLimited,
    Internal,
}

impl AuthError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AuthError::Validation(_) | AuthError::UnsupportedProvider(_) => {
                ErrorCategory::Validation
            }
            AuthError::InvalidState
            | AuthError::ProviderMismatch { .. }
            | AuthError::Provider { .. }
            | AuthError::InvalidToken
            | AuthError::TokenExpired
            | AuthError::TokenRevoked
            | AuthError::TokenNotFound
            | AuthError::TokenBlacklisted
            | AuthError::TamperedToken
            | AuthError::AlreadyRotated
            | AuthError::UsageLimitExceeded
            | AuthError::AlreadyEnabled
            | AuthError::MfaNotConfigured
            | AuthError::InvalidCode
            | AuthError::ChallengeInvalid
            | AuthError::CredentialCompromised
            | AuthError::UserNotFound => ErrorCategory::Authentication,
            AuthError::PermissionDenied { .. }
            | AuthError::TierRequired { .. }
            | AuthError::MfaRequired { .. } => ErrorCategory::Authorization,
            AuthError::TooManyAttempts { .. } => ErrorCategory::RateLimited,
            AuthError::Timeout | AuthError::Store(_) | AuthError::Internal(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Message safe to show to the caller. Authentication sub-reasons all map
    /// to the same string; authorization failures may carry remediation hints
    /// but never another user's data.
    pub fn client_message(&self) -> String {
        match self.category() {
            ErrorCategory::Validation => self.to_string(),
            ErrorCategory::Authentication => "Authentication failed".to_string(),
            ErrorCategory::Authorization => match self {
                AuthError::PermissionDenied {
                    permission,
                    hint: Some(hint),
                } => format!("Access denied for {permission}: {hint}"),
                other => other.to_string(),
            },
            ErrorCategory::RateLimited => self.to_string(),
            ErrorCategory::Internal => "Internal server error".to_string(),
        }
    }

    /// Retry-after hint in seconds, present only for rate-limited errors.
    pub fn retry_after(&self) -> Option<i64> {
        match self {
            AuthError::TooManyAttempts { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}
