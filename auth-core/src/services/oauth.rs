//! OAuth login orchestration: authorize-URL construction with CSRF state,
//! callback handling with consume-once state validation, provider token
//! exchange, profile fetch, user resolution, and session issuance.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{Duration, Utc};
use rand::RngCore;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::models::{DeviceInfo, OAuthState, Provider, SubscriptionTier, User};
use crate::services::analytics::{AnalyticsEmitter, AuthEvent};
use crate::services::providers::{parse_profile, ProviderProfile};
use crate::services::token::{TokenPair, TokenService};
use crate::stores::{StateStore, UserStore};

/// Result of `start_login`: where to send the browser.
#[derive(Debug, Clone, Serialize)]
pub struct LoginStart {
    pub auth_url: String,
    pub state: String,
    pub provider: Provider,
    pub expires_in: i64,
}

/// Result of a successful callback.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackOutcome {
    pub user: User,
    pub tokens: TokenPair,
    pub redirect_url: String,
    pub is_new_user: bool,
}

/// Error reported by the provider on the callback query string.
#[derive(Debug, Clone)]
pub struct ProviderCallbackError {
    pub code: String,
    pub description: String,
}

async fn with_deadline<T, F>(deadline: Option<Instant>, fut: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, AuthError>>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| AuthError::Timeout)?,
        None => fut.await,
    }
}

pub struct OAuthService {
    config: Arc<AuthConfig>,
    states: Arc<dyn StateStore>,
    users: Arc<dyn UserStore>,
    tokens: Arc<TokenService>,
    http: reqwest::Client,
    analytics: AnalyticsEmitter,
}

impl OAuthService {
    pub fn new(
        config: Arc<AuthConfig>,
        states: Arc<dyn StateStore>,
        users: Arc<dyn UserStore>,
        tokens: Arc<TokenService>,
        analytics: AnalyticsEmitter,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            config,
            states,
            users,
            tokens,
            http,
            analytics,
        }
    }

    /// Begin a provider login: validate the provider, mint a random state
    /// token, persist it with a fixed TTL, and build the authorization URL.
    pub async fn start_login(
        &self,
        provider: &str,
        redirect_url: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Result<LoginStart, AuthError> {
        let provider: Provider = provider
            .parse()
            .map_err(|_| AuthError::UnsupportedProvider(provider.to_string()))?;
        let credentials = self.config.provider_credentials(provider);
        if !credentials.is_configured() {
            return Err(AuthError::UnsupportedProvider(provider.to_string()));
        }

        let state_token = generate_state_token();
        let ttl = Duration::seconds(self.config.oauth.state_ttl_secs);
        let state = OAuthState::new(state_token.clone(), provider, redirect_url, metadata, ttl);
        self.states.put(&state).await.map_err(AuthError::Store)?;

        let endpoints = provider.endpoints();
        let auth_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            endpoints.auth_url,
            urlencoding::encode(&credentials.client_id),
            urlencoding::encode(&credentials.redirect_uri),
            urlencoding::encode(&endpoints.scopes.join(" ")),
            urlencoding::encode(&state_token),
        );

        self.analytics.emit(AuthEvent::LoginStarted { provider });

        Ok(LoginStart {
            auth_url,
            state: state_token,
            provider,
            expires_in: ttl.num_seconds(),
        })
    }

    /// Handle the provider callback.
    ///
    /// Provider-reported errors surface without touching storage. Otherwise
    /// the CSRF state is consumed exactly once (it is gone afterwards no
    /// matter how the rest of the flow ends), the code is exchanged and the
    /// profile fetched under the caller's deadline, and the user is resolved
    /// or created before a token pair is issued. Nothing is written for the
    /// user until the provider round trip has fully succeeded, so a timeout
    /// cannot leave a half-created account.
    pub async fn handle_callback(
        &self,
        provider: Provider,
        state: &str,
        code: &str,
        provider_error: Option<ProviderCallbackError>,
        deadline: Option<Instant>,
    ) -> Result<CallbackOutcome, AuthError> {
        if let Some(err) = provider_error {
            return Err(AuthError::Provider {
                code: err.code,
                description: err.description,
            });
        }

        let stored = self
            .states
            .take(state)
            .await
            .map_err(AuthError::Store)?
            .ok_or(AuthError::InvalidState)?;

        if stored.provider != provider {
            tracing::warn!(
                expected = %stored.provider,
                got = %provider,
                "OAuth provider mismatch on callback"
            );
            return Err(AuthError::ProviderMismatch {
                expected: stored.provider.to_string(),
                got: provider.to_string(),
            });
        }

        let access_token =
            with_deadline(deadline, self.exchange_code(provider, code)).await?;
        let profile =
            with_deadline(deadline, self.fetch_profile(provider, &access_token)).await?;

        let device = device_from_metadata(&stored.metadata);
        let (user, is_new_user) = self.resolve_user(provider, profile, &stored).await?;

        let tokens = self.tokens.issue(&user, device.as_ref()).await?;

        if is_new_user {
            self.analytics.emit(AuthEvent::Registration {
                user_id: user.id.clone(),
                provider,
            });
        } else {
            self.analytics.emit(AuthEvent::Login {
                user_id: user.id.clone(),
                provider,
            });
        }

        let redirect_url = stored
            .redirect_url
            .unwrap_or_else(|| self.config.oauth.default_redirect.clone());

        Ok(CallbackOutcome {
            user,
            tokens,
            redirect_url,
            is_new_user,
        })
    }

    /// Session-only renewal, no provider round trip.
    pub async fn refresh_session(
        &self,
        refresh_token: &str,
        device: Option<&DeviceInfo>,
    ) -> Result<TokenPair, AuthError> {
        self.tokens.refresh(refresh_token, device).await
    }

    async fn exchange_code(&self, provider: Provider, code: &str) -> Result<String, AuthError> {
        let credentials = self.config.provider_credentials(provider);
        let endpoints = provider.endpoints();

        let response = self
            .http
            .post(endpoints.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", credentials.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, %provider, "OAuth code exchange failed");
                AuthError::Provider {
                    code: "token_exchange_failed".to_string(),
                    description: "could not reach provider token endpoint".to_string(),
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, body = %body, %provider, "OAuth token exchange rejected");
            return Err(AuthError::Provider {
                code: "token_exchange_failed".to_string(),
                description: format!("provider returned {status}"),
            });
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            AuthError::Internal(anyhow::anyhow!("token response parse: {e}"))
        })?;
        body["access_token"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| AuthError::Provider {
                code: "token_exchange_failed".to_string(),
                description: "provider response had no access_token".to_string(),
            })
    }

    async fn fetch_profile(
        &self,
        provider: Provider,
        access_token: &str,
    ) -> Result<ProviderProfile, AuthError> {
        let endpoints = provider.endpoints();
        let mut request = self
            .http
            .get(endpoints.profile_url)
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .header("User-Agent", "arena-auth-core");
        // Helix requires the application id alongside the user token.
        if provider == Provider::Twitch {
            request = request.header(
                "Client-ID",
                self.config.provider_credentials(provider).client_id.as_str(),
            );
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, %provider, "OAuth profile fetch failed");
            AuthError::Provider {
                code: "profile_fetch_failed".to_string(),
                description: "could not reach provider profile endpoint".to_string(),
            }
        })?;

        if !response.status().is_success() {
            return Err(AuthError::Provider {
                code: "profile_fetch_failed".to_string(),
                description: format!("provider returned {}", response.status()),
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("profile parse: {e}")))?;
        parse_profile(provider, &body)
    }

    async fn resolve_user(
        &self,
        provider: Provider,
        profile: ProviderProfile,
        state: &OAuthState,
    ) -> Result<(User, bool), AuthError> {
        let existing = self
            .users
            .find_by_provider_id(provider, &profile.provider_id)
            .await
            .map_err(AuthError::Store)?;

        match existing {
            Some(mut user) => {
                user.merge_metadata(&state.metadata);
                user.name = profile.name;
                user.avatar_url = profile.avatar_url.or(user.avatar_url);
                user.updated_at = Utc::now();
                self.users.update(&user).await.map_err(AuthError::Store)?;
                tracing::info!(user_id = %user.id, %provider, "User logged in");
                Ok((user, false))
            }
            None => {
                let mut user = User::new(
                    provider,
                    profile.provider_id,
                    profile.email,
                    profile.name,
                );
                user.username = profile.username.clone();
                user.avatar_url = profile.avatar_url;
                user.metadata = state.metadata.clone();
                user.tier = SubscriptionTier::Free;
                match provider {
                    Provider::Discord => user.profile.discord_username = profile.username,
                    Provider::Twitch => user.profile.twitch_username = profile.username,
                    Provider::Riot => user.profile.region = Some("na1".to_string()),
                    _ => {}
                }
                self.users.create(&user).await.map_err(AuthError::Store)?;
                tracing::info!(user_id = %user.id, %provider, "User registered");
                Ok((user, true))
            }
        }
    }
}

fn generate_state_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn device_from_metadata(metadata: &HashMap<String, String>) -> Option<DeviceInfo> {
    let ip_address = metadata.get("client_ip").cloned();
    let user_agent = metadata.get("user_agent").cloned();
    if ip_address.is_none() && user_agent.is_none() {
        return None;
    }
    Some(DeviceInfo {
        ip_address,
        user_agent,
        ..DeviceInfo::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_tokens_are_random_and_urlsafe() {
        let a = generate_state_token();
        let b = generate_state_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43); // 32 bytes, unpadded base64url
    }

    #[test]
    fn device_extraction_needs_at_least_one_field() {
        assert!(device_from_metadata(&HashMap::new()).is_none());
        let meta = HashMap::from([("client_ip".to_string(), "10.0.0.1".to_string())]);
        let device = device_from_metadata(&meta).unwrap();
        assert_eq!(device.ip_address.as_deref(), Some("10.0.0.1"));
    }
}
