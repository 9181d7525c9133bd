//! Session credential lifecycle: issuance, validation, refresh with
//! rotation, revocation, blacklisting, and narrow-purpose scoped tokens.
//!
//! Access and refresh tokens are HS256 JWTs signed with distinct secrets.
//! The server keeps only a SHA-256 hash of each refresh token; the rotation
//! path is guarded by a single conditional write so concurrent refreshes of
//! the same token produce exactly one successor.

use std::collections::BTreeSet;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::config::{AuthConfig, CookieConfig};
use crate::error::AuthError;
use crate::models::{
    BlacklistEntry, DeviceInfo, RefreshTokenRecord, RevocationReason, TokenRotation, User,
};
use crate::services::analytics::{AnalyticsEmitter, AuthEvent};
use crate::services::rbac::RbacService;
use crate::stores::{BlacklistStore, RefreshTokenStore, RotationStore, UserStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
    Scoped,
    Mfa,
}

/// Signed claims: registered fields plus the platform's custom fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub aud: Vec<String>,
    pub exp: i64,
    pub nbf: i64,
    pub iat: i64,
    pub jti: String,

    pub uid: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub sub_tier: String,
    #[serde(default)]
    pub perms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_fp: Option<String>,
    pub token_type: TokenType,
    pub token_version: i32,
}

/// Access + refresh token pair returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_expires_in: i64,
    pub access_token_id: String,
    pub refresh_token_id: String,
}

fn generate_token_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// First-present-wins token transport priority: bearer header, custom
/// header, query parameter, cookie.
pub fn extract_token<'a>(
    authorization: Option<&'a str>,
    custom_header: Option<&'a str>,
    query: Option<&'a str>,
    cookie: Option<&'a str>,
) -> Option<&'a str> {
    if let Some(auth) = authorization {
        let token = auth.strip_prefix("Bearer ").unwrap_or(auth).trim();
        if !token.is_empty() {
            return Some(token);
        }
    }
    custom_header
        .or(query)
        .or(cookie)
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Render a Set-Cookie value for a token, honoring the configured domain
/// and security attributes.
pub fn token_cookie(config: &CookieConfig, name: &str, value: &str, max_age_secs: i64) -> String {
    let mut cookie = format!("{name}={value}; Path=/; Max-Age={max_age_secs}");
    if !config.domain.is_empty() {
        cookie.push_str(&format!("; Domain={}", config.domain));
    }
    if config.secure {
        cookie.push_str("; Secure");
    }
    if config.http_only {
        cookie.push_str("; HttpOnly");
    }
    cookie
}

pub struct TokenService {
    config: Arc<AuthConfig>,
    refresh_store: Arc<dyn RefreshTokenStore>,
    blacklist_store: Arc<dyn BlacklistStore>,
    rotations: Arc<dyn RotationStore>,
    users: Arc<dyn UserStore>,
    rbac: RbacService,
    analytics: AnalyticsEmitter,
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
}

impl TokenService {
    pub fn new(
        config: Arc<AuthConfig>,
        refresh_store: Arc<dyn RefreshTokenStore>,
        blacklist_store: Arc<dyn BlacklistStore>,
        rotations: Arc<dyn RotationStore>,
        users: Arc<dyn UserStore>,
        rbac: RbacService,
        analytics: AnalyticsEmitter,
    ) -> Self {
        let access_secret = config.token.access_token_secret.as_bytes();
        let refresh_secret = config.token.refresh_token_secret.as_bytes();
        Self {
            access_encoding: EncodingKey::from_secret(access_secret),
            access_decoding: DecodingKey::from_secret(access_secret),
            refresh_encoding: EncodingKey::from_secret(refresh_secret),
            refresh_decoding: DecodingKey::from_secret(refresh_secret),
            config,
            refresh_store,
            blacklist_store,
            rotations,
            users,
            rbac,
            analytics,
        }
    }

    fn access_ttl(&self) -> Duration {
        Duration::minutes(self.config.token.access_token_expiry_minutes)
    }

    fn refresh_ttl(&self) -> Duration {
        Duration::days(self.config.token.refresh_token_expiry_days)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.set_audience(&self.config.token.audience);
        validation.set_issuer(&[&self.config.token.issuer]);
        validation
    }

    /// Tier permissions plus the RBAC-resolved set, deduplicated. This is
    /// what gets embedded in access tokens as the permission snapshot.
    async fn snapshot_permissions(&self, user: &User) -> Result<Vec<String>, AuthError> {
        let mut perms: BTreeSet<String> = user.tier.permissions().into_iter().collect();
        for perm in self.rbac.user_permissions(&user.id).await? {
            perms.insert(perm);
        }
        Ok(perms.into_iter().collect())
    }

    fn registered_claims(&self, user_id: &str, token_id: &str, now: DateTime<Utc>, ttl: Duration) -> Claims {
        Claims {
            sub: user_id.to_string(),
            iss: self.config.token.issuer.clone(),
            aud: self.config.token.audience.clone(),
            exp: (now + ttl).timestamp(),
            nbf: now.timestamp(),
            iat: now.timestamp(),
            jti: token_id.to_string(),
            uid: user_id.to_string(),
            email: String::new(),
            sub_tier: String::new(),
            perms: Vec::new(),
            device_fp: None,
            token_type: TokenType::Access,
            token_version: self.config.token.token_version,
        }
    }

    /// Issue a fresh access + refresh pair and persist the refresh record.
    pub async fn issue(
        &self,
        user: &User,
        device: Option<&DeviceInfo>,
    ) -> Result<TokenPair, AuthError> {
        let perms = self.snapshot_permissions(user).await?;
        self.issue_with_parent(user, device, perms, None).await
    }

    async fn issue_with_parent(
        &self,
        user: &User,
        device: Option<&DeviceInfo>,
        perms: Vec<String>,
        parent: Option<&RefreshTokenRecord>,
    ) -> Result<TokenPair, AuthError> {
        let now = Utc::now();
        let access_token_id = generate_token_id();
        let refresh_token_id = generate_token_id();

        let mut access_claims =
            self.registered_claims(&user.id, &access_token_id, now, self.access_ttl());
        access_claims.email = user.email.clone();
        access_claims.sub_tier = user.tier.as_str().to_string();
        access_claims.perms = perms;
        access_claims.device_fp = device.and_then(|d| d.fingerprint.clone());

        let access_token = encode(
            &Header::new(Algorithm::HS256),
            &access_claims,
            &self.access_encoding,
        )
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("failed to sign access token: {e}")))?;

        let mut refresh_claims =
            self.registered_claims(&user.id, &refresh_token_id, now, self.refresh_ttl());
        refresh_claims.token_type = TokenType::Refresh;

        let refresh_token = encode(
            &Header::new(Algorithm::HS256),
            &refresh_claims,
            &self.refresh_encoding,
        )
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("failed to sign refresh token: {e}")))?;

        let mut record = RefreshTokenRecord::new(
            refresh_token_id.clone(),
            user.id.clone(),
            &refresh_token,
            self.refresh_ttl(),
            device.cloned(),
        );
        if let Some(parent) = parent {
            record.parent_id = Some(parent.id.clone());
            record.rotation_count = parent.rotation_count + 1;
        }
        self.refresh_store
            .put(&record)
            .await
            .map_err(AuthError::Store)?;

        self.analytics.emit(AuthEvent::TokenIssued {
            user_id: user.id.clone(),
            token_id: refresh_token_id.clone(),
        });

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl().num_seconds(),
            refresh_expires_in: self.refresh_ttl().num_seconds(),
            access_token_id,
            refresh_token_id,
        })
    }

    /// Refresh a session. With rotation enabled this invalidates the
    /// presented refresh token and returns a brand-new pair; exactly one of
    /// any concurrent callers succeeds. With rotation disabled only a new
    /// access token is minted.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        device: Option<&DeviceInfo>,
    ) -> Result<TokenPair, AuthError> {
        let claims = self.parse_refresh_token(refresh_token)?;

        if self.config.token.enable_blacklist
            && self
                .blacklist_store
                .contains(&claims.jti)
                .await
                .map_err(AuthError::Store)?
        {
            tracing::warn!(token_id = %claims.jti, "Refresh attempted with blacklisted token");
            return Err(AuthError::TokenBlacklisted);
        }

        let record = self
            .refresh_store
            .get(&claims.jti)
            .await
            .map_err(AuthError::Store)?
            .ok_or(AuthError::TokenNotFound)?;

        if record.revoked {
            return Err(match record.revoked_reason {
                Some(RevocationReason::Rotated) => AuthError::AlreadyRotated,
                _ => AuthError::TokenRevoked,
            });
        }
        if record.is_expired() {
            return Err(AuthError::TokenExpired);
        }

        // Hash comparison in constant time. A mismatch with a valid
        // signature means the stored record was tampered with or the token
        // was forged around the store; treat it as a stolen-token signal.
        let presented = RefreshTokenRecord::hash_token(refresh_token);
        if presented
            .as_bytes()
            .ct_eq(record.token_hash.as_bytes())
            .unwrap_u8()
            != 1
        {
            tracing::warn!(
                token_id = %claims.jti,
                user_id = %record.user_id,
                "Refresh token hash mismatch, possible token theft"
            );
            self.analytics.emit(AuthEvent::RefreshRejected {
                token_id: claims.jti.clone(),
                reason: "hash_mismatch".to_string(),
            });
            return Err(AuthError::TamperedToken);
        }

        let user = self
            .users
            .find_by_id(&record.user_id)
            .await
            .map_err(AuthError::Store)?
            .ok_or(AuthError::UserNotFound)?;

        // Permissions are re-derived from current role state on every
        // refresh. Reusing the old snapshot would let a demoted user keep
        // stale privileges for as long as they can keep refreshing.
        let perms = self.snapshot_permissions(&user).await?;

        if self.config.token.max_refresh_uses > 0
            && record.usage_count >= self.config.token.max_refresh_uses
        {
            self.refresh_store
                .revoke(&claims.jti, RevocationReason::ExcessiveUsage)
                .await
                .map_err(AuthError::Store)?;
            self.analytics.emit(AuthEvent::TokenRevoked {
                token_id: claims.jti.clone(),
                reason: RevocationReason::ExcessiveUsage.as_str().to_string(),
            });
            return Err(AuthError::UsageLimitExceeded);
        }

        if self.config.token.enable_rotation {
            // Winner-takes-rotation: mark Active -> Rotated first, then mint
            // the successor. The conditional write is the race guard; the
            // loser never observes two live children.
            let won = self
                .refresh_store
                .revoke_if_active(&claims.jti, RevocationReason::Rotated)
                .await
                .map_err(AuthError::Store)?;
            if !won {
                return Err(AuthError::AlreadyRotated);
            }

            let pair = self
                .issue_with_parent(&user, device, perms, Some(&record))
                .await?;

            let rotation = TokenRotation::new(
                claims.jti.clone(),
                pair.refresh_token_id.clone(),
                user.id.clone(),
                RevocationReason::Rotated.as_str(),
            );
            let rotations = self.rotations.clone();
            tokio::spawn(async move {
                if let Err(e) = rotations.record(&rotation).await {
                    tracing::error!(error = %e, "Failed to record token rotation");
                }
            });

            self.analytics.emit(AuthEvent::TokenRotated {
                user_id: user.id.clone(),
                old_token_id: claims.jti,
                new_token_id: pair.refresh_token_id.clone(),
            });
            Ok(pair)
        } else {
            let now = Utc::now();
            let access_token_id = generate_token_id();
            let mut access_claims =
                self.registered_claims(&user.id, &access_token_id, now, self.access_ttl());
            access_claims.email = user.email.clone();
            access_claims.sub_tier = user.tier.as_str().to_string();
            access_claims.perms = perms;
            access_claims.device_fp = device.and_then(|d| d.fingerprint.clone());
            access_claims.token_version = record.version;

            let access_token = encode(
                &Header::new(Algorithm::HS256),
                &access_claims,
                &self.access_encoding,
            )
            .map_err(|e| {
                AuthError::Internal(anyhow::anyhow!("failed to sign access token: {e}"))
            })?;

            let mut updated = record.clone();
            updated.usage_count += 1;
            updated.last_used_at = Some(now);
            self.refresh_store
                .put(&updated)
                .await
                .map_err(AuthError::Store)?;

            Ok(TokenPair {
                access_token,
                refresh_token: refresh_token.to_string(),
                token_type: "Bearer".to_string(),
                expires_in: self.access_ttl().num_seconds(),
                refresh_expires_in: (record.expires_at - now).num_seconds(),
                access_token_id,
                refresh_token_id: record.id,
            })
        }
    }

    /// Revoke a single refresh token. Revoking an already-terminal token is
    /// a no-op, not an error.
    pub async fn revoke(&self, token_id: &str) -> Result<(), AuthError> {
        self.refresh_store
            .revoke(token_id, RevocationReason::Manual)
            .await
            .map_err(AuthError::Store)?;
        self.analytics.emit(AuthEvent::TokenRevoked {
            token_id: token_id.to_string(),
            reason: RevocationReason::Manual.as_str().to_string(),
        });
        Ok(())
    }

    /// Revoke every active refresh token for a user (bulk logout).
    pub async fn revoke_all(&self, user_id: &str) -> Result<u64, AuthError> {
        let revoked = self
            .refresh_store
            .revoke_all_for_user(user_id, RevocationReason::BulkLogout)
            .await
            .map_err(AuthError::Store)?;
        tracing::info!(user_id, revoked, "Bulk logout revoked refresh tokens");
        Ok(revoked)
    }

    /// Denylist an access token id until its natural expiry.
    pub async fn blacklist(
        &self,
        token_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        self.blacklist_store
            .insert(&BlacklistEntry {
                token_id: token_id.to_string(),
                expires_at,
            })
            .await
            .map_err(AuthError::Store)
    }

    pub async fn is_blacklisted(&self, token_id: &str) -> Result<bool, AuthError> {
        self.blacklist_store
            .contains(token_id)
            .await
            .map_err(AuthError::Store)
    }

    /// Issue a narrow-purpose token carrying only the requested scope, with
    /// its own TTL and no refresh counterpart. For isolated high-value
    /// operations such as bulk export.
    pub fn issue_scoped_token(
        &self,
        user: &User,
        scope: &[String],
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let token_id = generate_token_id();
        let mut claims = self.registered_claims(&user.id, &token_id, now, ttl);
        claims.email = user.email.clone();
        claims.sub_tier = user.tier.as_str().to_string();
        claims.perms = scope.to_vec();
        claims.token_type = TokenType::Scoped;

        encode(&Header::new(Algorithm::HS256), &claims, &self.access_encoding)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("failed to sign scoped token: {e}")))
    }

    /// Short-lived MFA assertion token presented alongside the session token
    /// for gated actions. Independent of the session token's lifecycle.
    pub fn issue_mfa_assertion(&self, user_id: &str, action: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let token_id = generate_token_id();
        let mut claims = self.registered_claims(
            user_id,
            &token_id,
            now,
            Duration::seconds(self.config.mfa.assertion_ttl_secs),
        );
        claims.perms = vec![action.to_string()];
        claims.token_type = TokenType::Mfa;

        encode(&Header::new(Algorithm::HS256), &claims, &self.access_encoding)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("failed to sign MFA assertion: {e}")))
    }

    /// Verify an MFA assertion token against the action it must cover.
    pub fn verify_mfa_assertion(&self, token: &str, action: &str) -> Result<Claims, AuthError> {
        let claims = self.decode(token, &self.access_decoding)?;
        if claims.token_type != TokenType::Mfa || !claims.perms.iter().any(|p| p == action) {
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }

    /// Validate an access token: signature, expiry, audience, and (when
    /// enabled) the blacklist.
    pub async fn verify_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self.decode(token, &self.access_decoding)?;
        if claims.token_type != TokenType::Access {
            return Err(AuthError::InvalidToken);
        }
        if self.config.token.enable_blacklist
            && self
                .blacklist_store
                .contains(&claims.jti)
                .await
                .map_err(AuthError::Store)?
        {
            return Err(AuthError::TokenBlacklisted);
        }
        Ok(claims)
    }

    /// Validate a scoped token and check it covers the required scope.
    pub fn verify_scoped_token(&self, token: &str, scope: &str) -> Result<Claims, AuthError> {
        let claims = self.decode(token, &self.access_decoding)?;
        if claims.token_type != TokenType::Scoped || !claims.perms.iter().any(|p| p == scope) {
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }

    fn parse_refresh_token(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self.decode(token, &self.refresh_decoding)?;
        if claims.token_type != TokenType::Refresh {
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }

    fn decode(&self, token: &str, key: &DecodingKey) -> Result<Claims, AuthError> {
        decode::<Claims>(token, key, &self.validation())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            })
    }
}
