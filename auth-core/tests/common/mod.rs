//! Shared harness for auth-core integration tests: a fully wired core over
//! in-memory stores, plus direct handles to those stores for fixture setup.

#![allow(dead_code)]

use std::sync::Arc;

use auth_core::config::AuthConfig;
use auth_core::models::{Provider, SubscriptionTier, User};
use auth_core::services::MemorySink;
use auth_core::stores::memory::{
    MemoryBlacklistStore, MemoryMfaStore, MemoryPermissionCache, MemoryRbacStore,
    MemoryRefreshTokenStore, MemoryRotationStore, MemoryStateStore, MemoryUserStore,
};
use auth_core::{AuthCore, StoreSet};

pub struct TestHarness {
    pub core: AuthCore,
    pub users: Arc<MemoryUserStore>,
    pub states: Arc<MemoryStateStore>,
    pub refresh_tokens: Arc<MemoryRefreshTokenStore>,
    pub blacklist: Arc<MemoryBlacklistStore>,
    pub rotations: Arc<MemoryRotationStore>,
    pub rbac_store: Arc<MemoryRbacStore>,
    pub cache: Arc<MemoryPermissionCache>,
    pub mfa_store: Arc<MemoryMfaStore>,
    pub sink: Arc<MemorySink>,
}

pub fn test_config() -> AuthConfig {
    let mut config = AuthConfig::default();
    config.token.access_token_secret = "test-access-secret".to_string();
    config.token.refresh_token_secret = "test-refresh-secret".to_string();
    config.oauth.google.client_id = "google-client".to_string();
    config.oauth.google.client_secret = "google-secret".to_string();
    config.oauth.google.redirect_uri = "https://arena.gg/auth/google/callback".to_string();
    config.oauth.discord.client_id = "discord-client".to_string();
    config.oauth.discord.client_secret = "discord-secret".to_string();
    config.oauth.discord.redirect_uri = "https://arena.gg/auth/discord/callback".to_string();
    config
}

pub async fn harness() -> TestHarness {
    harness_with(test_config()).await
}

pub async fn harness_with(config: AuthConfig) -> TestHarness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let users = Arc::new(MemoryUserStore::new());
    let states = Arc::new(MemoryStateStore::new());
    let refresh_tokens = Arc::new(MemoryRefreshTokenStore::new());
    let blacklist = Arc::new(MemoryBlacklistStore::new());
    let rotations = Arc::new(MemoryRotationStore::new());
    let rbac_store = Arc::new(MemoryRbacStore::new());
    let cache = Arc::new(MemoryPermissionCache::new());
    let mfa_store = Arc::new(MemoryMfaStore::new());
    let sink = Arc::new(MemorySink::new());

    let stores = StoreSet {
        users: users.clone(),
        states: states.clone(),
        refresh_tokens: refresh_tokens.clone(),
        blacklist: blacklist.clone(),
        rotations: rotations.clone(),
        rbac: rbac_store.clone(),
        permission_cache: cache.clone(),
        mfa: mfa_store.clone(),
    };

    let core = AuthCore::new(config, stores, sink.clone()).expect("failed to build auth core");

    TestHarness {
        core,
        users,
        states,
        refresh_tokens,
        blacklist,
        rotations,
        rbac_store,
        cache,
        mfa_store,
        sink,
    }
}

impl TestHarness {
    /// Create and persist a user at the given tier.
    pub async fn create_user(&self, tier: SubscriptionTier) -> User {
        use auth_core::stores::UserStore;
        let mut user = User::new(
            Provider::Google,
            format!("prov-{}", uuid::Uuid::new_v4()),
            format!("{}@example.com", uuid::Uuid::new_v4()),
            "Test Player".to_string(),
        );
        user.tier = tier;
        self.users.create(&user).await.expect("create user");
        user
    }
}
