//! Token manager integration tests: issuance round trip, rotation and its
//! race, revocation idempotence, expiry boundaries, usage limits, tamper
//! detection, blacklisting, and scoped tokens.

mod common;

use auth_core::error::AuthError;
use auth_core::models::{RefreshTokenRecord, RevocationReason, SubscriptionTier};
use auth_core::stores::RefreshTokenStore;
use chrono::{Duration, Utc};

#[tokio::test]
async fn issue_then_parse_round_trip() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Premium).await;

    let pair = harness.core.tokens.issue(&user, None).await.unwrap();
    assert_eq!(pair.token_type, "Bearer");
    assert_eq!(pair.expires_in, 15 * 60);
    assert!(pair.expires_in < pair.refresh_expires_in);

    let claims = harness
        .core
        .tokens
        .verify_access_token(&pair.access_token)
        .await
        .unwrap();
    assert_eq!(claims.uid, user.id);
    assert_eq!(claims.sub, user.id);
    assert_eq!(claims.jti, pair.access_token_id);
    assert_eq!(claims.email, user.email);
    assert_eq!(claims.sub_tier, "premium");
}

#[tokio::test]
async fn premium_snapshot_has_advanced_analytics_but_not_unlimited_api() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Premium).await;

    let pair = harness.core.tokens.issue(&user, None).await.unwrap();
    let claims = harness
        .core
        .tokens
        .verify_access_token(&pair.access_token)
        .await
        .unwrap();

    assert!(claims.perms.contains(&"analytics:advanced".to_string()));
    assert!(!claims.perms.contains(&"api:unlimited".to_string()));
}

#[tokio::test]
async fn concurrent_refresh_has_exactly_one_winner() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let pair = harness.core.tokens.issue(&user, None).await.unwrap();

    let tokens_a = harness.core.tokens.clone();
    let tokens_b = harness.core.tokens.clone();
    let token_a = pair.refresh_token.clone();
    let token_b = pair.refresh_token.clone();

    let (left, right) = tokio::join!(
        tokio::spawn(async move { tokens_a.refresh(&token_a, None).await }),
        tokio::spawn(async move { tokens_b.refresh(&token_b, None).await }),
    );
    let results = [left.unwrap(), right.unwrap()];

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one concurrent refresh may rotate");

    let loser = results.iter().find(|r| r.is_err()).unwrap();
    assert!(matches!(
        loser,
        Err(AuthError::AlreadyRotated) | Err(AuthError::TokenRevoked)
    ));
}

#[tokio::test]
async fn rotation_spawns_child_and_kills_parent() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let pair = harness.core.tokens.issue(&user, None).await.unwrap();

    let rotated = harness
        .core
        .tokens
        .refresh(&pair.refresh_token, None)
        .await
        .unwrap();
    assert_ne!(rotated.refresh_token_id, pair.refresh_token_id);

    // The old token is terminal now.
    let err = harness
        .core
        .tokens
        .refresh(&pair.refresh_token, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::AlreadyRotated));

    // The child carries the chain forward.
    let child = harness
        .refresh_tokens
        .get(&rotated.refresh_token_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(child.parent_id.as_deref(), Some(pair.refresh_token_id.as_str()));
    assert_eq!(child.rotation_count, 1);

    // And the new pair still refreshes.
    harness
        .core
        .tokens
        .refresh(&rotated.refresh_token, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn revoke_is_idempotent() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let pair = harness.core.tokens.issue(&user, None).await.unwrap();

    harness.core.tokens.revoke(&pair.refresh_token_id).await.unwrap();
    let after_first = harness
        .refresh_tokens
        .get(&pair.refresh_token_id)
        .await
        .unwrap()
        .unwrap();

    // Second revocation is a no-op, not an error, and changes nothing.
    harness.core.tokens.revoke(&pair.refresh_token_id).await.unwrap();
    let after_second = harness
        .refresh_tokens
        .get(&pair.refresh_token_id)
        .await
        .unwrap()
        .unwrap();

    assert!(after_second.revoked);
    assert_eq!(
        after_second.revoked_reason,
        Some(RevocationReason::Manual)
    );
    assert_eq!(after_first.revoked_at, after_second.revoked_at);
    assert_eq!(after_first.version, after_second.version);

    let err = harness
        .core
        .tokens
        .refresh(&pair.refresh_token, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::TokenRevoked));
}

#[tokio::test]
async fn expiry_boundary_at_now() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let pair = harness.core.tokens.issue(&user, None).await.unwrap();

    let mut record = harness
        .refresh_tokens
        .get(&pair.refresh_token_id)
        .await
        .unwrap()
        .unwrap();

    // Expiry in the past: expired.
    record.expires_at = Utc::now() - Duration::seconds(1);
    harness.refresh_tokens.put(&record).await.unwrap();
    let err = harness
        .core
        .tokens
        .refresh(&pair.refresh_token, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::TokenExpired));

    // Comfortably in the future: refreshable again.
    record.expires_at = Utc::now() + Duration::seconds(30);
    harness.refresh_tokens.put(&record).await.unwrap();
    harness
        .core
        .tokens
        .refresh(&pair.refresh_token, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn expiry_equal_to_now_counts_as_expired() {
    let record = RefreshTokenRecord::new(
        "tok".to_string(),
        "user".to_string(),
        "signed",
        Duration::zero(),
        None,
    );
    assert!(record.is_expired());
}

#[tokio::test]
async fn usage_limit_revokes_with_excessive_usage() {
    let mut config = common::test_config();
    config.token.enable_rotation = false;
    config.token.max_refresh_uses = 1;
    let harness = common::harness_with(config).await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let pair = harness.core.tokens.issue(&user, None).await.unwrap();

    // First refresh reuses the refresh token and bumps the usage count.
    let refreshed = harness
        .core
        .tokens
        .refresh(&pair.refresh_token, None)
        .await
        .unwrap();
    assert_eq!(refreshed.refresh_token, pair.refresh_token);
    assert_ne!(refreshed.access_token, pair.access_token);

    // Second refresh trips the limit and revokes the token.
    let err = harness
        .core
        .tokens
        .refresh(&pair.refresh_token, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::UsageLimitExceeded));

    let record = harness
        .refresh_tokens
        .get(&pair.refresh_token_id)
        .await
        .unwrap()
        .unwrap();
    assert!(record.revoked);
    assert_eq!(record.revoked_reason, Some(RevocationReason::ExcessiveUsage));
}

#[tokio::test]
async fn tampered_stored_hash_is_rejected() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let pair = harness.core.tokens.issue(&user, None).await.unwrap();

    let mut record = harness
        .refresh_tokens
        .get(&pair.refresh_token_id)
        .await
        .unwrap()
        .unwrap();
    record.token_hash = RefreshTokenRecord::hash_token("some-other-token");
    harness.refresh_tokens.put(&record).await.unwrap();

    let err = harness
        .core
        .tokens
        .refresh(&pair.refresh_token, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::TamperedToken));
}

#[tokio::test]
async fn blacklisted_access_token_fails_verification() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let pair = harness.core.tokens.issue(&user, None).await.unwrap();

    harness
        .core
        .tokens
        .verify_access_token(&pair.access_token)
        .await
        .unwrap();

    harness
        .core
        .tokens
        .blacklist(&pair.access_token_id, Utc::now() + Duration::minutes(15))
        .await
        .unwrap();
    assert!(harness
        .core
        .tokens
        .is_blacklisted(&pair.access_token_id)
        .await
        .unwrap());

    let err = harness
        .core
        .tokens
        .verify_access_token(&pair.access_token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::TokenBlacklisted));
}

#[tokio::test]
async fn blacklisted_refresh_token_cannot_refresh() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let pair = harness.core.tokens.issue(&user, None).await.unwrap();

    harness
        .core
        .tokens
        .blacklist(&pair.refresh_token_id, Utc::now() + Duration::days(7))
        .await
        .unwrap();

    let err = harness
        .core
        .tokens
        .refresh(&pair.refresh_token, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::TokenBlacklisted));
}

#[tokio::test]
async fn revoke_all_is_a_bulk_logout() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;

    let pairs = vec![
        harness.core.tokens.issue(&user, None).await.unwrap(),
        harness.core.tokens.issue(&user, None).await.unwrap(),
        harness.core.tokens.issue(&user, None).await.unwrap(),
    ];

    let revoked = harness.core.tokens.revoke_all(&user.id).await.unwrap();
    assert_eq!(revoked, 3);

    for pair in pairs {
        let err = harness
            .core
            .tokens
            .refresh(&pair.refresh_token, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenRevoked));
    }
}

#[tokio::test]
async fn refresh_rederives_permissions_from_current_state() {
    let harness = common::harness().await;
    let mut user = harness.create_user(SubscriptionTier::Premium).await;
    let pair = harness.core.tokens.issue(&user, None).await.unwrap();

    let claims = harness
        .core
        .tokens
        .verify_access_token(&pair.access_token)
        .await
        .unwrap();
    assert!(claims.perms.contains(&"analytics:advanced".to_string()));

    // Demote the user, then refresh: the new snapshot must reflect the
    // demotion, not the old token's embedded permissions.
    user.tier = SubscriptionTier::Free;
    {
        use auth_core::stores::UserStore;
        harness.users.update(&user).await.unwrap();
    }

    let rotated = harness
        .core
        .tokens
        .refresh(&pair.refresh_token, None)
        .await
        .unwrap();
    let claims = harness
        .core
        .tokens
        .verify_access_token(&rotated.access_token)
        .await
        .unwrap();
    assert!(!claims.perms.contains(&"analytics:advanced".to_string()));
    assert!(claims.perms.contains(&"analytics:basic".to_string()));
}

#[tokio::test]
async fn scoped_token_covers_only_its_scope() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Enterprise).await;

    let token = harness
        .core
        .tokens
        .issue_scoped_token(&user, &["export:all".to_string()], Duration::minutes(5))
        .unwrap();

    harness
        .core
        .tokens
        .verify_scoped_token(&token, "export:all")
        .unwrap();
    assert!(harness
        .core
        .tokens
        .verify_scoped_token(&token, "admin:users:manage")
        .is_err());

    // A scoped token is not an access token.
    assert!(harness
        .core
        .tokens
        .verify_access_token(&token)
        .await
        .is_err());
}

#[tokio::test]
async fn garbage_and_wrong_secret_tokens_are_invalid() {
    let harness = common::harness().await;

    let err = harness
        .core
        .tokens
        .refresh("not.a.token", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidToken));

    // An access token presented on the refresh path fails signature
    // validation because the secrets differ.
    let user = harness.create_user(SubscriptionTier::Free).await;
    let pair = harness.core.tokens.issue(&user, None).await.unwrap();
    let err = harness
        .core
        .tokens
        .refresh(&pair.access_token, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidToken));
}

#[tokio::test]
async fn rotation_chain_is_recorded() {
    let harness = common::harness().await;
    let user = harness.create_user(SubscriptionTier::Free).await;
    let pair = harness.core.tokens.issue(&user, None).await.unwrap();

    let rotated = harness
        .core
        .tokens
        .refresh(&pair.refresh_token, None)
        .await
        .unwrap();

    // Rotation audit is fire-and-forget; give the spawned write a beat.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    use auth_core::stores::RotationStore;
    let chain = harness
        .rotations
        .chain_for_token(&pair.refresh_token_id)
        .await
        .unwrap();
    assert_eq!(chain.len(), 1);
    assert_eq!(chain[0].old_token_id, pair.refresh_token_id);
    assert_eq!(chain[0].new_token_id, rotated.refresh_token_id);
    assert_eq!(chain[0].user_id, user.id);
}
