//! Identity and access core for the Arena gaming analytics platform.
//!
//! Four components behind narrow store contracts:
//!
//! - [`services::OAuthService`] drives provider login round trips with
//!   CSRF-protected, consume-once state.
//! - [`services::TokenService`] issues, validates, rotates, revokes, and
//!   blacklists session credentials.
//! - [`services::RbacService`] resolves effective permission sets (direct,
//!   inherited, and team roles) and answers point checks through a short-TTL
//!   cache.
//! - [`services::MfaService`] enrolls and verifies TOTP, WebAuthn, and
//!   backup-code factors and gates high-value actions behind assertion
//!   tokens.
//!
//! Persistence lives behind the traits in [`stores`]; HTTP transport, CLI
//! wiring, and analytics processing are out of scope for this crate.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod stores;

use std::sync::Arc;

pub use config::AuthConfig;
pub use error::{AuthError, ErrorCategory};

use services::{
    AnalyticsEmitter, AnalyticsSink, MfaService, OAuthService, RbacService, TokenService,
};
use stores::{
    BlacklistStore, MfaStore, PermissionCache, RbacStore, RefreshTokenStore, RotationStore,
    StateStore, UserStore,
};

/// The stores an [`AuthCore`] is composed over.
pub struct StoreSet {
    pub users: Arc<dyn UserStore>,
    pub states: Arc<dyn StateStore>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub blacklist: Arc<dyn BlacklistStore>,
    pub rotations: Arc<dyn RotationStore>,
    pub rbac: Arc<dyn RbacStore>,
    pub permission_cache: Arc<dyn PermissionCache>,
    pub mfa: Arc<dyn MfaStore>,
}

/// Fully wired identity core. Built once at composition time from a
/// validated config, a set of stores, and an analytics sink.
pub struct AuthCore {
    pub config: Arc<AuthConfig>,
    pub tokens: Arc<TokenService>,
    pub rbac: RbacService,
    pub mfa: MfaService,
    pub oauth: OAuthService,
    pub analytics: AnalyticsEmitter,
}

impl AuthCore {
    pub fn new(
        config: AuthConfig,
        stores: StoreSet,
        sink: Arc<dyn AnalyticsSink>,
    ) -> Result<Self, AuthError> {
        config.validate()?;
        let config = Arc::new(config);

        let analytics = AnalyticsEmitter::spawn(sink, config.analytics_queue_capacity);

        let rbac = RbacService::new(
            stores.rbac,
            stores.permission_cache,
            config.clone(),
            analytics.clone(),
        );
        let tokens = Arc::new(TokenService::new(
            config.clone(),
            stores.refresh_tokens,
            stores.blacklist,
            stores.rotations,
            stores.users.clone(),
            rbac.clone(),
            analytics.clone(),
        ));
        let mfa = MfaService::new(
            stores.mfa,
            tokens.clone(),
            config.clone(),
            analytics.clone(),
        )?;
        let oauth = OAuthService::new(
            config.clone(),
            stores.states,
            stores.users,
            tokens.clone(),
            analytics.clone(),
        );

        Ok(Self {
            config,
            tokens,
            rbac,
            mfa,
            oauth,
            analytics,
        })
    }
}
