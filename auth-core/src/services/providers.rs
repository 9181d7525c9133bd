//! Provider-specific glue: endpoint tables and profile mapping.
//!
//! Each provider returns its own profile shape; this module normalizes them
//! into `ProviderProfile`. Nothing here is load-bearing for the login state
//! machine itself.

use serde_json::Value;

use crate::error::AuthError;
use crate::models::Provider;

pub struct ProviderEndpoints {
    pub auth_url: &'static str,
    pub token_url: &'static str,
    pub profile_url: &'static str,
    pub scopes: &'static [&'static str],
}

impl Provider {
    pub fn endpoints(&self) -> ProviderEndpoints {
        match self {
            Provider::Google => ProviderEndpoints {
                auth_url: "https://accounts.google.com/o/oauth2/v2/auth",
                token_url: "https://oauth2.googleapis.com/token",
                profile_url: "https://www.googleapis.com/oauth2/v2/userinfo",
                scopes: &["openid", "profile", "email"],
            },
            Provider::Discord => ProviderEndpoints {
                auth_url: "https://discord.com/api/oauth2/authorize",
                token_url: "https://discord.com/api/oauth2/token",
                profile_url: "https://discord.com/api/users/@me",
                scopes: &["identify", "email"],
            },
            Provider::Twitch => ProviderEndpoints {
                auth_url: "https://id.twitch.tv/oauth2/authorize",
                token_url: "https://id.twitch.tv/oauth2/token",
                profile_url: "https://api.twitch.tv/helix/users",
                scopes: &["openid", "user:read:email"],
            },
            Provider::Riot => ProviderEndpoints {
                auth_url: "https://auth.riotgames.com/oauth2/authorize",
                token_url: "https://auth.riotgames.com/token",
                profile_url: "https://auth.riotgames.com/userinfo",
                scopes: &["openid", "cpid", "ppid"],
            },
            Provider::Github => ProviderEndpoints {
                auth_url: "https://github.com/login/oauth/authorize",
                token_url: "https://github.com/login/oauth/access_token",
                profile_url: "https://api.github.com/user",
                scopes: &["user:email", "read:user"],
            },
        }
    }
}

/// Normalized identity as reported by a provider.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    pub provider_id: String,
    pub email: String,
    pub name: String,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
}

fn missing(provider: Provider, field: &str) -> AuthError {
    AuthError::Provider {
        code: "malformed_profile".to_string(),
        description: format!("{provider} profile missing {field}"),
    }
}

pub(crate) fn parse_profile(provider: Provider, body: &Value) -> Result<ProviderProfile, AuthError> {
    match provider {
        Provider::Google => {
            let id = body["id"].as_str().ok_or_else(|| missing(provider, "id"))?;
            let email = body["email"]
                .as_str()
                .ok_or_else(|| missing(provider, "email"))?;
            if body["verified_email"] == Value::Bool(false) {
                return Err(AuthError::Provider {
                    code: "unverified_email".to_string(),
                    description: "Google account email not verified".to_string(),
                });
            }
            Ok(ProviderProfile {
                provider_id: id.to_string(),
                email: email.to_string(),
                name: body["name"].as_str().unwrap_or(email).to_string(),
                username: None,
                avatar_url: body["picture"].as_str().map(String::from),
            })
        }
        Provider::Discord => {
            let id = body["id"].as_str().ok_or_else(|| missing(provider, "id"))?;
            let username = body["username"]
                .as_str()
                .ok_or_else(|| missing(provider, "username"))?;
            let avatar_url = body["avatar"]
                .as_str()
                .map(|hash| format!("https://cdn.discordapp.com/avatars/{id}/{hash}.png"));
            Ok(ProviderProfile {
                provider_id: id.to_string(),
                email: body["email"].as_str().unwrap_or_default().to_string(),
                name: body["global_name"].as_str().unwrap_or(username).to_string(),
                username: Some(username.to_string()),
                avatar_url,
            })
        }
        Provider::Twitch => {
            // Helix wraps the user in a data array.
            let user = body["data"]
                .as_array()
                .and_then(|d| d.first())
                .ok_or_else(|| missing(provider, "data"))?;
            let id = user["id"].as_str().ok_or_else(|| missing(provider, "id"))?;
            let login = user["login"]
                .as_str()
                .ok_or_else(|| missing(provider, "login"))?;
            Ok(ProviderProfile {
                provider_id: id.to_string(),
                email: user["email"].as_str().unwrap_or_default().to_string(),
                name: user["display_name"].as_str().unwrap_or(login).to_string(),
                username: Some(login.to_string()),
                avatar_url: user["profile_image_url"].as_str().map(String::from),
            })
        }
        Provider::Riot => {
            let sub = body["sub"].as_str().ok_or_else(|| missing(provider, "sub"))?;
            Ok(ProviderProfile {
                provider_id: sub.to_string(),
                email: body["email"].as_str().unwrap_or_default().to_string(),
                name: body["cpid"].as_str().unwrap_or(sub).to_string(),
                username: None,
                avatar_url: None,
            })
        }
        Provider::Github => {
            let id = body["id"]
                .as_i64()
                .map(|n| n.to_string())
                .or_else(|| body["id"].as_str().map(String::from))
                .ok_or_else(|| missing(provider, "id"))?;
            let login = body["login"]
                .as_str()
                .ok_or_else(|| missing(provider, "login"))?;
            Ok(ProviderProfile {
                provider_id: id,
                email: body["email"].as_str().unwrap_or_default().to_string(),
                name: body["name"].as_str().unwrap_or(login).to_string(),
                username: Some(login.to_string()),
                avatar_url: body["avatar_url"].as_str().map(String::from),
            })
        }
    }
}
