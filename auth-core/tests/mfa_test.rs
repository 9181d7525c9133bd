//! MFA manager integration tests: TOTP enrollment and verification, backup
//! code single-use semantics, challenge consume-once behavior, attempt rate
//! limiting, and action gating with assertion tokens.

mod common;

use auth_core::error::AuthError;
use auth_core::models::SubscriptionTier;
use auth_core::stores::MfaStore;
use totp_rs::{Algorithm, Secret, TOTP};

fn current_code(secret_base32: &str) -> String {
    let bytes = Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .expect("decode TOTP secret");
    let totp = TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        bytes,
        Some("Arena".to_string()),
        "test".to_string(),
    )
    .expect("build TOTP");
    totp.generate_current().expect("generate code")
}

#[tokio::test]
async fn totp_setup_and_first_verification_enables_the_factor() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let mfa = &harness.core.mfa;

    let provisioning = mfa.setup_totp(&user).await.unwrap();
    assert_eq!(provisioning.backup_codes.len(), 10);
    assert!(provisioning.otpauth_url.starts_with("otpauth://totp/"));

    // Not enabled until the first code verifies.
    let status = mfa.mfa_status(&user.id).await.unwrap();
    assert!(!status.totp_enabled);
    assert_eq!(status.backup_codes_remaining, 0);

    let code = current_code(&provisioning.secret);
    let assertion = mfa.verify_totp(&user.id, &code, None).await.unwrap();
    assert!(!assertion.is_empty());

    // First success flips enabled+verified and activates the backup codes.
    let status = mfa.mfa_status(&user.id).await.unwrap();
    assert!(status.totp_enabled);
    assert_eq!(status.backup_codes_remaining, 10);

    let secret = harness
        .mfa_store
        .get_totp_secret(&user.id)
        .await
        .unwrap()
        .unwrap();
    assert!(secret.enabled && secret.verified);
    assert!(secret.verified_at.is_some());
}

#[tokio::test]
async fn totp_setup_fails_when_already_enabled() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let mfa = &harness.core.mfa;

    let provisioning = mfa.setup_totp(&user).await.unwrap();
    let code = current_code(&provisioning.secret);
    mfa.verify_totp(&user.id, &code, None).await.unwrap();

    let err = mfa.setup_totp(&user).await.unwrap_err();
    assert!(matches!(err, AuthError::AlreadyEnabled));

    // Re-setup before verification is allowed (overwrites the pending one).
    let other = harness.create_user(SubscriptionTier::Free).await;
    mfa.setup_totp(&other).await.unwrap();
    mfa.setup_totp(&other).await.unwrap();
}

#[tokio::test]
async fn invalid_totp_code_is_rejected_and_audited() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let mfa = &harness.core.mfa;

    mfa.setup_totp(&user).await.unwrap();
    let err = mfa.verify_totp(&user.id, "000000", None).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidCode));

    let attempts = harness
        .mfa_store
        .attempts_since(&user.id, chrono::Utc::now() - chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(attempts.len(), 1);
    assert!(!attempts[0].success);
    assert_eq!(attempts[0].method, "totp");
}

#[tokio::test]
async fn verify_without_setup_reports_not_configured() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;

    let err = harness
        .core
        .mfa
        .verify_totp(&user.id, "123456", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MfaNotConfigured));
}

#[tokio::test]
async fn ten_backup_codes_allow_exactly_ten_authentications() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let mfa = &harness.core.mfa;

    let provisioning = mfa.setup_totp(&user).await.unwrap();
    let code = current_code(&provisioning.secret);
    mfa.verify_totp(&user.id, &code, None).await.unwrap();

    for backup_code in &provisioning.backup_codes {
        mfa.use_backup_code(&user.id, backup_code, None).await.unwrap();
    }

    let status = mfa.mfa_status(&user.id).await.unwrap();
    assert_eq!(status.backup_codes_remaining, 0);

    // The eleventh attempt, with any previously-used code, fails.
    let err = mfa
        .use_backup_code(&user.id, &provisioning.backup_codes[0], None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCode));
}

#[tokio::test]
async fn regeneration_replaces_the_whole_backup_set() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let mfa = &harness.core.mfa;

    let provisioning = mfa.setup_totp(&user).await.unwrap();
    let code = current_code(&provisioning.secret);
    mfa.verify_totp(&user.id, &code, None).await.unwrap();

    let new_codes = mfa.regenerate_backup_codes(&user.id).await.unwrap();
    assert_eq!(new_codes.len(), 10);

    // Old, never-used codes died with the old set.
    let err = mfa
        .use_backup_code(&user.id, &provisioning.backup_codes[0], None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCode));

    // New codes work.
    mfa.use_backup_code(&user.id, &new_codes[0], None).await.unwrap();
}

#[tokio::test]
async fn failed_attempts_rate_limit_fails_closed() {
    let mut config = common::test_config();
    config.mfa.max_attempts = 3;
    config.mfa.cooldown_secs = 600;
    let harness = common::harness_with(config).await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let mfa = &harness.core.mfa;

    let provisioning = mfa.setup_totp(&user).await.unwrap();

    for _ in 0..3 {
        let err = mfa.verify_totp(&user.id, "000000", None).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCode));
    }

    // The window is saturated with failures; even a correct code is now
    // refused until the cooldown passes.
    let code = current_code(&provisioning.secret);
    let err = mfa.verify_totp(&user.id, &code, None).await.unwrap_err();
    match err {
        AuthError::TooManyAttempts { retry_after_secs } => assert_eq!(retry_after_secs, 600),
        other => panic!("expected TooManyAttempts, got {other:?}"),
    }

    // Backup-code authentication is covered by the same limiter.
    let err = mfa
        .use_backup_code(&user.id, "aaaa-bbbb", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::TooManyAttempts { .. }));
}

#[tokio::test]
async fn webauthn_registration_challenge_is_single_use() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let mfa = &harness.core.mfa;

    let (challenge_id, _creation) = mfa
        .begin_webauthn_registration(&user, Some("yubikey"))
        .await
        .unwrap();
    assert!(!challenge_id.is_empty());

    // First completion consumes the challenge (and here fails attestation,
    // since no real authenticator answered it).
    let response = dummy_registration_response();
    let first = mfa
        .finish_webauthn_registration(&challenge_id, &response)
        .await
        .unwrap_err();
    assert!(matches!(first, AuthError::InvalidCode | AuthError::Internal(_)));

    // Second completion fails as an invalid challenge, and no credential
    // was ever stored.
    let second = mfa
        .finish_webauthn_registration(&challenge_id, &response)
        .await
        .unwrap_err();
    assert!(matches!(second, AuthError::ChallengeInvalid));

    let credentials = mfa.list_webauthn_credentials(&user.id).await.unwrap();
    assert!(credentials.is_empty());
}

#[tokio::test]
async fn expired_webauthn_challenge_is_invalid() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let mfa = &harness.core.mfa;

    let (challenge_id, _) = mfa
        .begin_webauthn_registration(&user, None)
        .await
        .unwrap();

    // Age the challenge past its TTL directly in the store.
    let mut challenge = harness
        .mfa_store
        .get_challenge(&challenge_id)
        .await
        .unwrap()
        .unwrap();
    challenge.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
    harness.mfa_store.put_challenge(&challenge).await.unwrap();

    let err = mfa
        .finish_webauthn_registration(&challenge_id, &dummy_registration_response())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::ChallengeInvalid));
}

#[tokio::test]
async fn webauthn_authentication_requires_an_enrolled_credential() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;

    let err = harness
        .core
        .mfa
        .begin_webauthn_authentication(&user.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MfaNotConfigured));
}

#[tokio::test]
async fn action_gating_uses_the_configured_allow_list() {
    let harness = common::harness().await;
    let mfa = &harness.core.mfa;

    assert!(mfa.action_requires_mfa("analytics:export"));
    assert!(mfa.action_requires_mfa("account:delete"));
    assert!(!mfa.action_requires_mfa("profile:view"));
}

#[tokio::test]
async fn assertion_token_covers_only_its_action() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let mfa = &harness.core.mfa;

    let provisioning = mfa.setup_totp(&user).await.unwrap();
    let code = current_code(&provisioning.secret);
    let assertion = mfa
        .verify_totp(&user.id, &code, Some("analytics:export"))
        .await
        .unwrap();

    mfa.verify_assertion(&assertion, "analytics:export").unwrap();
    assert!(mfa.verify_assertion(&assertion, "account:delete").is_err());

    // A session access token is not an MFA assertion.
    let pair = harness.core.tokens.issue(&user, None).await.unwrap();
    assert!(mfa.verify_assertion(&pair.access_token, "analytics:export").is_err());
}

#[tokio::test]
async fn disabling_totp_is_terminal_until_re_setup() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let mfa = &harness.core.mfa;

    let provisioning = mfa.setup_totp(&user).await.unwrap();
    let code = current_code(&provisioning.secret);
    mfa.verify_totp(&user.id, &code, None).await.unwrap();

    mfa.disable_totp(&user.id).await.unwrap();

    let status = mfa.mfa_status(&user.id).await.unwrap();
    assert!(!status.totp_enabled);
    assert_eq!(status.backup_codes_remaining, 0);

    let err = mfa.verify_totp(&user.id, &code, None).await.unwrap_err();
    assert!(matches!(err, AuthError::MfaNotConfigured));

    // A fresh setup starts the cycle over.
    mfa.setup_totp(&user).await.unwrap();
}

/// A structurally valid registration response that no authenticator signed.
/// Good enough to exercise the challenge state machine; attestation
/// verification rejects it.
fn dummy_registration_response() -> webauthn_rs::prelude::RegisterPublicKeyCredential {
    serde_json::from_value(serde_json::json!({
        "id": "ZHVtbXktY3JlZGVudGlhbA",
        "rawId": "ZHVtbXktY3JlZGVudGlhbA",
        "response": {
            "attestationObject": "ZHVtbXktYXR0ZXN0YXRpb24",
            "clientDataJSON": "eyJ0eXBlIjoid2ViYXV0aG4uY3JlYXRlIn0"
        },
        "type": "public-key"
    }))
    .expect("deserialize dummy registration response")
}
