//! Immutable configuration for the identity core.
//!
//! A config value is built once (from the environment or literally), passed
//! through `validate()`, and then shared by reference into every component.
//! Nothing mutates it after construction.

use std::collections::HashSet;
use std::env;

use serde::Deserialize;

use crate::error::AuthError;
use crate::models::user::Provider;

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub token: TokenConfig,
    pub rbac: RbacConfig,
    pub mfa: MfaConfig,
    pub oauth: OAuthConfig,
    pub cookies: CookieConfig,
    /// Capacity of the bounded analytics event queue.
    pub analytics_queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub access_token_secret: String,
    pub refresh_token_secret: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
    pub issuer: String,
    pub audience: Vec<String>,
    pub enable_rotation: bool,
    pub enable_blacklist: bool,
    /// 0 disables the usage-count limit.
    pub max_refresh_uses: i64,
    pub token_version: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RbacConfig {
    pub enable_cache: bool,
    pub cache_ttl_secs: i64,
    pub enable_inheritance: bool,
    pub max_roles_per_user: usize,
    pub default_role: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MfaConfig {
    pub totp_issuer: String,
    /// Accepted clock skew, in 30-second TOTP steps.
    pub totp_skew: u8,
    pub challenge_ttl_secs: i64,
    pub webauthn_rp_id: String,
    pub webauthn_rp_name: String,
    pub webauthn_origin: String,
    pub max_attempts: u32,
    pub attempt_window_secs: i64,
    pub cooldown_secs: i64,
    pub backup_codes_count: usize,
    pub backup_code_length: usize,
    /// Action names that require a fresh MFA assertion token.
    pub high_value_actions: HashSet<String>,
    pub assertion_ttl_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub google: ProviderCredentials,
    pub discord: ProviderCredentials,
    pub twitch: ProviderCredentials,
    pub riot: ProviderCredentials,
    pub github: ProviderCredentials,
    pub state_ttl_secs: i64,
    pub default_redirect: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl ProviderCredentials {
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    pub domain: String,
    pub access_cookie_name: String,
    pub refresh_cookie_name: String,
    pub secure: bool,
    pub http_only: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_token_secret: String::new(),
            refresh_token_secret: String::new(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
            issuer: "arena-id".to_string(),
            audience: vec!["arena-api".to_string()],
            enable_rotation: true,
            enable_blacklist: true,
            max_refresh_uses: 0,
            token_version: 1,
        }
    }
}

impl Default for RbacConfig {
    fn default() -> Self {
        Self {
            enable_cache: true,
            cache_ttl_secs: 900,
            enable_inheritance: true,
            max_roles_per_user: 10,
            default_role: "player:standard".to_string(),
        }
    }
}

impl Default for MfaConfig {
    fn default() -> Self {
        Self {
            totp_issuer: "Arena".to_string(),
            totp_skew: 1,
            challenge_ttl_secs: 300,
            webauthn_rp_id: "arena.gg".to_string(),
            webauthn_rp_name: "Arena".to_string(),
            webauthn_origin: "https://arena.gg".to_string(),
            max_attempts: 5,
            attempt_window_secs: 3600,
            cooldown_secs: 900,
            backup_codes_count: 10,
            backup_code_length: 8,
            high_value_actions: [
                "analytics:export",
                "team:management",
                "subscription:change",
                "account:delete",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            assertion_ttl_secs: 300,
        }
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            google: ProviderCredentials::default(),
            discord: ProviderCredentials::default(),
            twitch: ProviderCredentials::default(),
            riot: ProviderCredentials::default(),
            github: ProviderCredentials::default(),
            state_ttl_secs: 600,
            default_redirect: "https://arena.gg/dashboard".to_string(),
        }
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            domain: ".arena.gg".to_string(),
            access_cookie_name: "arena_access_token".to_string(),
            refresh_cookie_name: "arena_refresh_token".to_string(),
            secure: true,
            http_only: true,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token: TokenConfig::default(),
            rbac: RbacConfig::default(),
            mfa: MfaConfig::default(),
            oauth: OAuthConfig::default(),
            cookies: CookieConfig::default(),
            analytics_queue_capacity: 1024,
        }
    }
}

impl AuthConfig {
    /// Load configuration from the environment. Secrets have no defaults and
    /// must be present; everything else falls back to a sane dev value.
    pub fn from_env() -> Result<Self, AuthError> {
        let config = AuthConfig {
            token: TokenConfig {
                access_token_secret: get_env("AUTH_ACCESS_TOKEN_SECRET", None)?,
                refresh_token_secret: get_env("AUTH_REFRESH_TOKEN_SECRET", None)?,
                access_token_expiry_minutes: get_parsed(
                    "AUTH_ACCESS_TOKEN_EXPIRY_MINUTES",
                    "15",
                )?,
                refresh_token_expiry_days: get_parsed("AUTH_REFRESH_TOKEN_EXPIRY_DAYS", "7")?,
                issuer: get_env("AUTH_TOKEN_ISSUER", Some("arena-id"))?,
                audience: get_env("AUTH_TOKEN_AUDIENCE", Some("arena-api"))?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
                enable_rotation: get_parsed("AUTH_ENABLE_TOKEN_ROTATION", "true")?,
                enable_blacklist: get_parsed("AUTH_ENABLE_TOKEN_BLACKLIST", "true")?,
                max_refresh_uses: get_parsed("AUTH_MAX_REFRESH_USES", "0")?,
                token_version: get_parsed("AUTH_TOKEN_VERSION", "1")?,
            },
            rbac: RbacConfig {
                enable_cache: get_parsed("RBAC_ENABLE_CACHE", "true")?,
                cache_ttl_secs: get_parsed("RBAC_CACHE_TTL_SECONDS", "900")?,
                enable_inheritance: get_parsed("RBAC_ENABLE_INHERITANCE", "true")?,
                max_roles_per_user: get_parsed("RBAC_MAX_ROLES_PER_USER", "10")?,
                default_role: get_env("RBAC_DEFAULT_ROLE", Some("player:standard"))?,
            },
            mfa: MfaConfig {
                totp_issuer: get_env("MFA_TOTP_ISSUER", Some("Arena"))?,
                totp_skew: get_parsed("MFA_TOTP_SKEW", "1")?,
                challenge_ttl_secs: get_parsed("MFA_CHALLENGE_TTL_SECONDS", "300")?,
                webauthn_rp_id: get_env("MFA_WEBAUTHN_RP_ID", Some("arena.gg"))?,
                webauthn_rp_name: get_env("MFA_WEBAUTHN_RP_NAME", Some("Arena"))?,
                webauthn_origin: get_env("MFA_WEBAUTHN_ORIGIN", Some("https://arena.gg"))?,
                max_attempts: get_parsed("MFA_MAX_ATTEMPTS", "5")?,
                attempt_window_secs: get_parsed("MFA_ATTEMPT_WINDOW_SECONDS", "3600")?,
                cooldown_secs: get_parsed("MFA_COOLDOWN_SECONDS", "900")?,
                backup_codes_count: get_parsed("MFA_BACKUP_CODES_COUNT", "10")?,
                backup_code_length: get_parsed("MFA_BACKUP_CODE_LENGTH", "8")?,
                high_value_actions: get_env(
                    "MFA_HIGH_VALUE_ACTIONS",
                    Some("analytics:export,team:management,subscription:change,account:delete"),
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
                assertion_ttl_secs: get_parsed("MFA_ASSERTION_TTL_SECONDS", "300")?,
            },
            oauth: OAuthConfig {
                google: provider_from_env("GOOGLE")?,
                discord: provider_from_env("DISCORD")?,
                twitch: provider_from_env("TWITCH")?,
                riot: provider_from_env("RIOT")?,
                github: provider_from_env("GITHUB")?,
                state_ttl_secs: get_parsed("OAUTH_STATE_TTL_SECONDS", "600")?,
                default_redirect: get_env(
                    "OAUTH_DEFAULT_REDIRECT",
                    Some("https://arena.gg/dashboard"),
                )?,
            },
            cookies: CookieConfig {
                domain: get_env("AUTH_COOKIE_DOMAIN", Some(".arena.gg"))?,
                access_cookie_name: get_env("AUTH_ACCESS_COOKIE_NAME", Some("arena_access_token"))?,
                refresh_cookie_name: get_env(
                    "AUTH_REFRESH_COOKIE_NAME",
                    Some("arena_refresh_token"),
                )?,
                secure: get_parsed("AUTH_COOKIE_SECURE", "true")?,
                http_only: get_parsed("AUTH_COOKIE_HTTP_ONLY", "true")?,
            },
            analytics_queue_capacity: get_parsed("ANALYTICS_QUEUE_CAPACITY", "1024")?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if self.token.access_token_secret.is_empty() || self.token.refresh_token_secret.is_empty() {
            return Err(AuthError::Validation(
                "token secrets must not be empty".to_string(),
            ));
        }
        if self.token.access_token_secret == self.token.refresh_token_secret {
            return Err(AuthError::Validation(
                "access and refresh token secrets must differ".to_string(),
            ));
        }
        if self.token.access_token_expiry_minutes <= 0 {
            return Err(AuthError::Validation(
                "access token expiry must be positive".to_string(),
            ));
        }
        if self.token.refresh_token_expiry_days <= 0 {
            return Err(AuthError::Validation(
                "refresh token expiry must be positive".to_string(),
            ));
        }
        // The access token must always die before the refresh token it is
        // paired with.
        if self.token.access_token_expiry_minutes * 60
            >= self.token.refresh_token_expiry_days * 86_400
        {
            return Err(AuthError::Validation(
                "access token TTL must be strictly shorter than refresh token TTL".to_string(),
            ));
        }
        if self.rbac.cache_ttl_secs <= 0 {
            return Err(AuthError::Validation(
                "permission cache TTL must be positive".to_string(),
            ));
        }
        if self.rbac.max_roles_per_user == 0 {
            return Err(AuthError::Validation(
                "max roles per user must be at least 1".to_string(),
            ));
        }
        if self.mfa.totp_skew > 2 {
            return Err(AuthError::Validation(
                "TOTP skew wider than 2 steps defeats the point of TOTP".to_string(),
            ));
        }
        if self.mfa.backup_codes_count == 0 || self.mfa.backup_code_length < 6 {
            return Err(AuthError::Validation(
                "backup codes must exist and be at least 6 characters".to_string(),
            ));
        }
        if self.mfa.max_attempts == 0 {
            return Err(AuthError::Validation(
                "MFA max attempts must be at least 1".to_string(),
            ));
        }
        if self.oauth.state_ttl_secs <= 0 {
            return Err(AuthError::Validation(
                "OAuth state TTL must be positive".to_string(),
            ));
        }
        if self.analytics_queue_capacity == 0 {
            return Err(AuthError::Validation(
                "analytics queue capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Credentials for a provider, if that provider is configured.
    pub fn provider_credentials(&self, provider: Provider) -> &ProviderCredentials {
        match provider {
            Provider::Google => &self.oauth.google,
            Provider::Discord => &self.oauth.discord,
            Provider::Twitch => &self.oauth.twitch,
            Provider::Riot => &self.oauth.riot,
            Provider::Github => &self.oauth.github,
        }
    }
}

fn provider_from_env(prefix: &str) -> Result<ProviderCredentials, AuthError> {
    Ok(ProviderCredentials {
        client_id: get_env(&format!("{prefix}_CLIENT_ID"), Some(""))?,
        client_secret: get_env(&format!("{prefix}_CLIENT_SECRET"), Some(""))?,
        redirect_uri: get_env(&format!("{prefix}_REDIRECT_URI"), Some(""))?,
    })
}

fn get_env(key: &str, default: Option<&str>) -> Result<String, AuthError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => match default {
            Some(def) => Ok(def.to_string()),
            None => Err(AuthError::Validation(format!(
                "{key} is required but not set"
            ))),
        },
    }
}

fn get_parsed<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, AuthError>
where
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default))?
        .parse()
        .map_err(|e| AuthError::Validation(format!("{key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AuthConfig {
        let mut config = AuthConfig::default();
        config.token.access_token_secret = "access-secret".to_string();
        config.token.refresh_token_secret = "refresh-secret".to_string();
        config
    }

    #[test]
    fn default_config_with_secrets_validates() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn rejects_access_ttl_not_shorter_than_refresh() {
        let mut config = valid_config();
        config.token.access_token_expiry_minutes = 7 * 24 * 60;
        config.token.refresh_token_expiry_days = 7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_shared_secret() {
        let mut config = valid_config();
        config.token.refresh_token_secret = config.token.access_token_secret.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_secrets() {
        let config = AuthConfig::default();
        assert!(config.validate().is_err());
    }
}
