//! CSRF state for the OAuth login round trip.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::user::Provider;

/// One-time token binding an OAuth redirect to its initiator. Created at
/// login start, consumed exactly once at callback, deleted regardless of the
/// callback outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthState {
    pub state: String,
    pub provider: Provider,
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl OAuthState {
    pub fn new(
        state: String,
        provider: Provider,
        redirect_url: Option<String>,
        metadata: HashMap<String, String>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            state,
            provider,
            redirect_url,
            metadata,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}
