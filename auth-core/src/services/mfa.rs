//! Multi-factor authentication: TOTP and WebAuthn enrollment and
//! verification, one-time backup codes, time-boxed single-use challenges,
//! attempt rate limiting, and MFA assertion tokens for gated actions.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{Duration, Utc};
use rand::RngCore;
use serde::Serialize;
use serde_json::json;
use totp_rs::{Algorithm as TotpAlgorithm, Secret, TOTP};
use url::Url;
use uuid::Uuid;
use webauthn_rs::prelude::{
    CreationChallengeResponse, PasskeyAuthentication, PasskeyRegistration, PublicKeyCredential,
    RegisterPublicKeyCredential, RequestChallengeResponse, Webauthn, WebauthnBuilder,
};

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::models::{
    BackupCodeSet, ChallengeType, MfaAttempt, MfaChallenge, TotpSecret, User,
    WebAuthnCredentialRecord,
};
use crate::services::analytics::{AnalyticsEmitter, AuthEvent};
use crate::services::token::TokenService;
use crate::stores::MfaStore;

const TOTP_DIGITS: usize = 6;
const TOTP_STEP_SECONDS: u64 = 30;

/// Everything the user needs to finish TOTP enrollment.
#[derive(Debug, Clone, Serialize)]
pub struct TotpProvisioning {
    pub secret: String,
    pub otpauth_url: String,
    pub qr_png_base64: String,
    pub backup_codes: Vec<String>,
}

/// Summary of a user's configured factors.
#[derive(Debug, Clone, Serialize)]
pub struct MfaStatus {
    pub totp_enabled: bool,
    pub webauthn_credentials: usize,
    pub backup_codes_remaining: usize,
}

pub struct MfaService {
    store: Arc<dyn MfaStore>,
    tokens: Arc<TokenService>,
    config: Arc<AuthConfig>,
    webauthn: Webauthn,
    analytics: AnalyticsEmitter,
}

impl MfaService {
    pub fn new(
        store: Arc<dyn MfaStore>,
        tokens: Arc<TokenService>,
        config: Arc<AuthConfig>,
        analytics: AnalyticsEmitter,
    ) -> Result<Self, AuthError> {
        let origin = Url::parse(&config.mfa.webauthn_origin).map_err(|e| {
            AuthError::Validation(format!(
                "invalid WebAuthn origin {}: {e}",
                config.mfa.webauthn_origin
            ))
        })?;
        let webauthn = WebauthnBuilder::new(&config.mfa.webauthn_rp_id, &origin)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("WebAuthn init failed: {e}")))?
            .rp_name(&config.mfa.webauthn_rp_name)
            .build()
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("WebAuthn init failed: {e}")))?;

        Ok(Self {
            store,
            tokens,
            config,
            webauthn,
            analytics,
        })
    }

    fn challenge_ttl(&self) -> Duration {
        Duration::seconds(self.config.mfa.challenge_ttl_secs)
    }

    /// Whether the named action is on the high-value list that requires a
    /// fresh MFA assertion alongside the session token.
    pub fn action_requires_mfa(&self, action: &str) -> bool {
        self.config.mfa.high_value_actions.contains(action)
    }

    /// Verify an MFA assertion token against the action it must cover.
    pub fn verify_assertion(&self, token: &str, action: &str) -> Result<(), AuthError> {
        self.tokens.verify_mfa_assertion(token, action).map(|_| ())
    }

    // --- TOTP ---

    /// Begin TOTP enrollment: generate a secret and backup codes, persist
    /// them disabled and unverified, and return provisioning data.
    pub async fn setup_totp(&self, user: &User) -> Result<TotpProvisioning, AuthError> {
        if let Some(existing) = self
            .store
            .get_totp_secret(&user.id)
            .await
            .map_err(AuthError::Store)?
        {
            if existing.enabled {
                return Err(AuthError::AlreadyEnabled);
            }
        }

        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("TOTP secret generation: {e:?}")))?;

        let totp = self.build_totp(secret_bytes, &user.email)?;
        let otpauth_url = totp.get_url();
        let qr_png_base64 = totp
            .get_qr_base64()
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("QR generation: {e}")))?;
        let backup_codes = self.generate_backup_codes();

        let record = TotpSecret {
            user_id: user.id.clone(),
            secret: totp.get_secret_base32(),
            otpauth_url: otpauth_url.clone(),
            pending_backup_codes: backup_codes.clone(),
            enabled: false,
            verified: false,
            created_at: Utc::now(),
            verified_at: None,
            last_used_at: None,
        };
        self.store
            .put_totp_secret(&record)
            .await
            .map_err(AuthError::Store)?;

        self.analytics.emit(AuthEvent::MfaEvent {
            user_id: user.id.clone(),
            method: "totp".to_string(),
            action: Some("setup".to_string()),
            success: true,
        });

        Ok(TotpProvisioning {
            secret: record.secret,
            otpauth_url,
            qr_png_base64,
            backup_codes,
        })
    }

    /// Verify a TOTP code. The first successful verification enables the
    /// factor and activates the backup codes generated at setup. Returns an
    /// MFA assertion token covering `action`.
    pub async fn verify_totp(
        &self,
        user_id: &str,
        code: &str,
        action: Option<&str>,
    ) -> Result<String, AuthError> {
        self.check_rate_limit(user_id).await?;

        let mut secret = self
            .store
            .get_totp_secret(user_id)
            .await
            .map_err(AuthError::Store)?
            .ok_or(AuthError::MfaNotConfigured)?;

        let secret_bytes = Secret::Encoded(secret.secret.clone())
            .to_bytes()
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("TOTP secret decode: {e:?}")))?;
        let totp = self.build_totp(secret_bytes, user_id)?;

        let valid = totp
            .check_current(code)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("system clock: {e}")))?;

        if !valid {
            self.record_attempt(user_id, "totp", false, Some("invalid code"), action)
                .await;
            return Err(AuthError::InvalidCode);
        }

        let now = Utc::now();
        if !secret.enabled {
            secret.enabled = true;
            secret.verified = true;
            secret.verified_at = Some(now);
            // Backup codes become live only once the factor itself works.
            let codes = BackupCodeSet::new(user_id.to_string(), secret.pending_backup_codes.clone());
            self.store
                .put_backup_codes(&codes)
                .await
                .map_err(AuthError::Store)?;
        }
        secret.last_used_at = Some(now);
        self.store
            .put_totp_secret(&secret)
            .await
            .map_err(AuthError::Store)?;

        self.record_attempt(user_id, "totp", true, None, action).await;
        self.emit_mfa(user_id, "totp", action, true);

        self.tokens
            .issue_mfa_assertion(user_id, action.unwrap_or("mfa:verified"))
    }

    /// Disable TOTP and drop the backup codes. Terminal until a new setup.
    pub async fn disable_totp(&self, user_id: &str) -> Result<(), AuthError> {
        self.store
            .get_totp_secret(user_id)
            .await
            .map_err(AuthError::Store)?
            .ok_or(AuthError::MfaNotConfigured)?;
        self.store
            .delete_totp_secret(user_id)
            .await
            .map_err(AuthError::Store)?;
        self.store
            .delete_backup_codes(user_id)
            .await
            .map_err(AuthError::Store)?;
        self.emit_mfa(user_id, "totp", Some("disable"), true);
        Ok(())
    }

    fn build_totp(&self, secret_bytes: Vec<u8>, account: &str) -> Result<TOTP, AuthError> {
        TOTP::new(
            TotpAlgorithm::SHA1,
            TOTP_DIGITS,
            self.config.mfa.totp_skew,
            TOTP_STEP_SECONDS,
            secret_bytes,
            Some(self.config.mfa.totp_issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("TOTP init: {e}")))
    }

    // --- WebAuthn ---

    /// Start registering a new authenticator. Returns the challenge id the
    /// client must present at completion, plus the creation options.
    pub async fn begin_webauthn_registration(
        &self,
        user: &User,
        device_name: Option<&str>,
    ) -> Result<(String, CreationChallengeResponse), AuthError> {
        let unique_id = Uuid::parse_str(&user.id)
            .map_err(|e| AuthError::Validation(format!("user id is not a uuid: {e}")))?;

        let (creation, registration) = self
            .webauthn
            .start_passkey_registration(unique_id, &user.email, &user.name, None)
            .map_err(|e| {
                AuthError::Internal(anyhow::anyhow!("WebAuthn registration start: {e}"))
            })?;

        let session_data = json!({
            "registration": registration,
            "device_name": device_name,
        });
        let challenge = MfaChallenge::new(
            user.id.clone(),
            ChallengeType::WebauthnRegistration,
            session_data,
            self.challenge_ttl(),
        );
        self.store
            .put_challenge(&challenge)
            .await
            .map_err(AuthError::Store)?;

        Ok((challenge.id, creation))
    }

    /// Complete authenticator registration. The challenge is consumed
    /// atomically; a second completion fails and stores nothing.
    pub async fn finish_webauthn_registration(
        &self,
        challenge_id: &str,
        response: &RegisterPublicKeyCredential,
    ) -> Result<WebAuthnCredentialRecord, AuthError> {
        let challenge = self
            .store
            .complete_challenge(challenge_id)
            .await
            .map_err(AuthError::Store)?
            .ok_or(AuthError::ChallengeInvalid)?;
        if challenge.challenge_type != ChallengeType::WebauthnRegistration {
            return Err(AuthError::ChallengeInvalid);
        }

        let registration: PasskeyRegistration =
            serde_json::from_value(challenge.session_data["registration"].clone())
                .map_err(|e| AuthError::Internal(anyhow::anyhow!("challenge state: {e}")))?;

        let passkey = match self
            .webauthn
            .finish_passkey_registration(response, &registration)
        {
            Ok(passkey) => passkey,
            Err(e) => {
                tracing::warn!(error = %e, user_id = %challenge.user_id, "WebAuthn registration failed");
                self.record_attempt(
                    &challenge.user_id,
                    "webauthn_registration",
                    false,
                    Some("attestation rejected"),
                    None,
                )
                .await;
                return Err(AuthError::InvalidCode);
            }
        };

        let record = WebAuthnCredentialRecord {
            id: URL_SAFE_NO_PAD.encode(passkey.cred_id().as_ref()),
            user_id: challenge.user_id.clone(),
            passkey: serde_json::to_value(&passkey)
                .map_err(|e| AuthError::Internal(anyhow::anyhow!("passkey serialize: {e}")))?,
            sign_count: 0,
            device_name: challenge.session_data["device_name"]
                .as_str()
                .map(String::from),
            device_type: None,
            enabled: true,
            created_at: Utc::now(),
            last_used_at: None,
        };
        self.store
            .put_webauthn_credential(&record)
            .await
            .map_err(AuthError::Store)?;

        self.record_attempt(&challenge.user_id, "webauthn_registration", true, None, None)
            .await;
        self.emit_mfa(&challenge.user_id, "webauthn", Some("register"), true);
        Ok(record)
    }

    /// Start a WebAuthn authentication ceremony over the user's enabled
    /// credentials.
    pub async fn begin_webauthn_authentication(
        &self,
        user_id: &str,
    ) -> Result<(String, RequestChallengeResponse), AuthError> {
        let credentials = self
            .store
            .user_webauthn_credentials(user_id)
            .await
            .map_err(AuthError::Store)?;
        let passkeys: Vec<webauthn_rs::prelude::Passkey> = credentials
            .iter()
            .filter(|c| c.enabled)
            .filter_map(|c| serde_json::from_value(c.passkey.clone()).ok())
            .collect();
        if passkeys.is_empty() {
            return Err(AuthError::MfaNotConfigured);
        }

        let (request, authentication) = self
            .webauthn
            .start_passkey_authentication(&passkeys)
            .map_err(|e| {
                AuthError::Internal(anyhow::anyhow!("WebAuthn authentication start: {e}"))
            })?;

        let challenge = MfaChallenge::new(
            user_id.to_string(),
            ChallengeType::WebauthnAuthentication,
            json!({ "authentication": authentication }),
            self.challenge_ttl(),
        );
        self.store
            .put_challenge(&challenge)
            .await
            .map_err(AuthError::Store)?;

        Ok((challenge.id, request))
    }

    /// Complete WebAuthn authentication. A signature counter that does not
    /// increase is treated as a cloned-authenticator signal: the credential
    /// is disabled and the caller gets a compromise error, not a login.
    pub async fn finish_webauthn_authentication(
        &self,
        challenge_id: &str,
        response: &PublicKeyCredential,
        action: Option<&str>,
    ) -> Result<String, AuthError> {
        let challenge = self
            .store
            .complete_challenge(challenge_id)
            .await
            .map_err(AuthError::Store)?
            .ok_or(AuthError::ChallengeInvalid)?;
        if challenge.challenge_type != ChallengeType::WebauthnAuthentication {
            return Err(AuthError::ChallengeInvalid);
        }
        let user_id = challenge.user_id.clone();

        self.check_rate_limit(&user_id).await?;

        let authentication: PasskeyAuthentication =
            serde_json::from_value(challenge.session_data["authentication"].clone())
                .map_err(|e| AuthError::Internal(anyhow::anyhow!("challenge state: {e}")))?;

        let result = match self
            .webauthn
            .finish_passkey_authentication(response, &authentication)
        {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, user_id = %user_id, "WebAuthn authentication failed");
                self.record_attempt(&user_id, "webauthn", false, Some("assertion rejected"), action)
                    .await;
                return Err(AuthError::InvalidCode);
            }
        };

        let credential_id = URL_SAFE_NO_PAD.encode(result.cred_id().as_ref());
        let mut record = self
            .store
            .get_webauthn_credential(&credential_id)
            .await
            .map_err(AuthError::Store)?
            .filter(|c| c.user_id == user_id && c.enabled)
            .ok_or(AuthError::InvalidCode)?;

        let counter = result.counter();
        if counter_regressed(record.sign_count, counter) {
            // Authenticators that report counters must strictly increase
            // them; a regression means a clone may be in play. Lock the
            // credential out instead of just recording the anomaly.
            tracing::warn!(
                user_id = %user_id,
                credential_id = %credential_id,
                stored = record.sign_count,
                presented = counter,
                "WebAuthn signature counter regression, disabling credential"
            );
            record.enabled = false;
            self.store
                .put_webauthn_credential(&record)
                .await
                .map_err(AuthError::Store)?;
            self.record_attempt(&user_id, "webauthn", false, Some("counter regression"), action)
                .await;
            self.emit_mfa(&user_id, "webauthn", Some("counter_regression"), false);
            return Err(AuthError::CredentialCompromised);
        }

        record.sign_count = counter;
        record.last_used_at = Some(Utc::now());
        self.store
            .put_webauthn_credential(&record)
            .await
            .map_err(AuthError::Store)?;

        self.record_attempt(&user_id, "webauthn", true, None, action).await;
        self.emit_mfa(&user_id, "webauthn", action, true);

        self.tokens
            .issue_mfa_assertion(&user_id, action.unwrap_or("mfa:verified"))
    }

    pub async fn list_webauthn_credentials(
        &self,
        user_id: &str,
    ) -> Result<Vec<WebAuthnCredentialRecord>, AuthError> {
        self.store
            .user_webauthn_credentials(user_id)
            .await
            .map_err(AuthError::Store)
    }

    pub async fn remove_webauthn_credential(
        &self,
        user_id: &str,
        credential_id: &str,
    ) -> Result<(), AuthError> {
        self.store
            .delete_webauthn_credential(user_id, credential_id)
            .await
            .map_err(AuthError::Store)
    }

    // --- Backup codes ---

    /// Authenticate with a one-time backup code. Unknown and already-used
    /// codes fail identically.
    pub async fn use_backup_code(
        &self,
        user_id: &str,
        code: &str,
        action: Option<&str>,
    ) -> Result<String, AuthError> {
        self.check_rate_limit(user_id).await?;

        let consumed = self
            .store
            .use_backup_code(user_id, code)
            .await
            .map_err(AuthError::Store)?;
        if !consumed {
            self.record_attempt(user_id, "backup_code", false, Some("unknown or used code"), action)
                .await;
            return Err(AuthError::InvalidCode);
        }

        self.record_attempt(user_id, "backup_code", true, None, action).await;
        self.emit_mfa(user_id, "backup_code", action, true);

        if let Ok(Some(set)) = self.store.get_backup_codes(user_id).await {
            if set.unused().len() <= 2 {
                tracing::warn!(user_id, remaining = set.unused().len(), "Backup codes running low");
            }
        }

        self.tokens
            .issue_mfa_assertion(user_id, action.unwrap_or("mfa:verified"))
    }

    /// Replace the whole backup-code set. Previously unused codes die with
    /// the old set.
    pub async fn regenerate_backup_codes(&self, user_id: &str) -> Result<Vec<String>, AuthError> {
        let secret = self
            .store
            .get_totp_secret(user_id)
            .await
            .map_err(AuthError::Store)?;
        if !secret.map(|s| s.enabled).unwrap_or(false) {
            return Err(AuthError::MfaNotConfigured);
        }

        let codes = self.generate_backup_codes();
        let set = BackupCodeSet::new(user_id.to_string(), codes.clone());
        self.store
            .put_backup_codes(&set)
            .await
            .map_err(AuthError::Store)?;
        self.emit_mfa(user_id, "backup_code", Some("regenerate"), true);
        Ok(codes)
    }

    pub async fn mfa_status(&self, user_id: &str) -> Result<MfaStatus, AuthError> {
        let totp_enabled = self
            .store
            .get_totp_secret(user_id)
            .await
            .map_err(AuthError::Store)?
            .map(|s| s.enabled)
            .unwrap_or(false);
        let webauthn_credentials = self
            .store
            .user_webauthn_credentials(user_id)
            .await
            .map_err(AuthError::Store)?
            .iter()
            .filter(|c| c.enabled)
            .count();
        let backup_codes_remaining = self
            .store
            .get_backup_codes(user_id)
            .await
            .map_err(AuthError::Store)?
            .map(|s| s.unused().len())
            .unwrap_or(0);
        Ok(MfaStatus {
            totp_enabled,
            webauthn_credentials,
            backup_codes_remaining,
        })
    }

    // --- Shared plumbing ---

    /// Sliding-window rate limit over failed attempts. Fails closed: hitting
    /// the limit blocks every verification path until the cooldown passes.
    async fn check_rate_limit(&self, user_id: &str) -> Result<(), AuthError> {
        let since = Utc::now() - Duration::seconds(self.config.mfa.attempt_window_secs);
        let attempts = self
            .store
            .attempts_since(user_id, since)
            .await
            .map_err(AuthError::Store)?;
        let failed = attempts.iter().filter(|a| !a.success).count() as u32;
        if failed >= self.config.mfa.max_attempts {
            tracing::warn!(user_id, failed, "MFA verification rate limit hit");
            return Err(AuthError::TooManyAttempts {
                retry_after_secs: self.config.mfa.cooldown_secs,
            });
        }
        Ok(())
    }

    fn generate_backup_codes(&self) -> Vec<String> {
        (0..self.config.mfa.backup_codes_count)
            .map(|_| {
                let mut bytes = vec![0u8; self.config.mfa.backup_code_length / 2];
                rand::thread_rng().fill_bytes(&mut bytes);
                let code = hex::encode(bytes);
                if code.len() >= 8 {
                    format!("{}-{}", &code[..4], &code[4..8])
                } else {
                    code
                }
            })
            .collect()
    }

    /// The attempt log feeds the rate limiter, so it is written in-line;
    /// a write failure is logged and the decision proceeds.
    async fn record_attempt(
        &self,
        user_id: &str,
        method: &str,
        success: bool,
        error_message: Option<&str>,
        action: Option<&str>,
    ) {
        let mut attempt =
            MfaAttempt::new(user_id, method, success, error_message.map(String::from));
        attempt.action = action.map(String::from);
        if let Err(e) = self.store.record_attempt(&attempt).await {
            tracing::error!(error = %e, user_id, method, "Failed to record MFA attempt");
        }
    }

    fn emit_mfa(&self, user_id: &str, method: &str, action: Option<&str>, success: bool) {
        self.analytics.emit(AuthEvent::MfaEvent {
            user_id: user_id.to_string(),
            method: method.to_string(),
            action: action.map(String::from),
            success,
        });
    }
}

/// Authenticators that implement counters must strictly increase them; a
/// presented counter at or below the stored value signals a possible clone.
/// Authenticators that never report a counter always present zero and are
/// exempt.
fn counter_regressed(stored: u32, presented: u32) -> bool {
    presented != 0 && presented <= stored
}
