pub mod analytics;
pub mod mfa;
pub mod oauth;
pub mod providers;
pub mod rbac;
pub mod token;

pub use analytics::{AnalyticsEmitter, AnalyticsSink, AuthEvent, MemorySink, NullSink};
pub use mfa::{MfaService, MfaStatus, TotpProvisioning};
pub use oauth::{CallbackOutcome, LoginStart, OAuthService, ProviderCallbackError};
pub use providers::ProviderProfile;
pub use rbac::{wildcard_match, RbacService};
pub use token::{extract_token, token_cookie, Claims, TokenPair, TokenService, TokenType};
