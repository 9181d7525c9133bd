//! User identity and subscription model.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// OAuth providers supported for login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Discord,
    Twitch,
    Riot,
    Github,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::Google,
        Provider::Discord,
        Provider::Twitch,
        Provider::Riot,
        Provider::Github,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Discord => "discord",
            Provider::Twitch => "twitch",
            Provider::Riot => "riot",
            Provider::Github => "github",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "google" => Ok(Provider::Google),
            "discord" => Ok(Provider::Discord),
            "twitch" => Ok(Provider::Twitch),
            "riot" => Ok(Provider::Riot),
            "github" => Ok(Provider::Github),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Subscription tiers, ordered. Tier gating compares with `>=`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Premium,
    Pro,
    Enterprise,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Premium => "premium",
            SubscriptionTier::Pro => "pro",
            SubscriptionTier::Enterprise => "enterprise",
        }
    }

    /// Baseline permissions granted by a subscription tier, independent of
    /// any role assignments.
    pub fn permissions(&self) -> Vec<String> {
        let perms: &[&str] = match self {
            SubscriptionTier::Enterprise => &[
                "analytics:advanced",
                "api:unlimited",
                "coaching:premium",
                "team:management",
                "export:all",
            ],
            SubscriptionTier::Pro => &[
                "analytics:advanced",
                "api:extended",
                "coaching:premium",
                "team:basic",
                "export:basic",
            ],
            SubscriptionTier::Premium => &[
                "analytics:advanced",
                "api:standard",
                "coaching:basic",
                "export:basic",
            ],
            SubscriptionTier::Free => &["analytics:basic", "api:limited"],
        };
        perms.iter().map(|p| p.to_string()).collect()
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Game-side profile blob attached to a user. The core never interprets it
/// beyond defaulting it at registration; the analytics domain owns its
/// contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub summoner_name: Option<String>,
    pub region: Option<String>,
    pub rank: Option<String>,
    #[serde(default)]
    pub preferred_roles: Vec<String>,
    pub discord_username: Option<String>,
    pub twitch_username: Option<String>,
    #[serde(default)]
    pub preferences: HashMap<String, String>,
}

/// Platform user, created on first successful OAuth callback and updated on
/// subsequent logins. Never hard-deleted by this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub provider: Provider,
    pub provider_id: String,
    pub tier: SubscriptionTier,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub profile: PlayerProfile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(provider: Provider, provider_id: String, email: String, name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            email,
            name,
            username: None,
            avatar_url: None,
            provider,
            provider_id,
            tier: SubscriptionTier::Free,
            metadata: HashMap::new(),
            profile: PlayerProfile::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge new client metadata over the existing map; new keys win.
    pub fn merge_metadata(&mut self, incoming: &HashMap<String, String>) {
        for (k, v) in incoming {
            self.metadata.insert(k.clone(), v.clone());
        }
    }
}
