//! # Auth-Core - Trust core for the EdgeGate CDN gateway
//!
//! This crate decides who may do what to which customer's resources, and
//! protects the flows that establish identity:
//!
//! - [`authz::AuthorizationManager`]: role and permission evaluation with
//!   per-customer isolation policies
//! - [`token::TokenValidator`]: JWT (JWKS) and RFC 7662 introspection
//!   validation with result caching
//! - [`oauth::OAuth21ComplianceManager`]: PKCE, single-use state, DPoP,
//!   redirect URI and authorization server checks
//! - [`vault::CredentialVault`]: encrypted storage and rotation of service secrets
//!
//! [`AuthCore`] wires all four from one [`AuthCoreConfig`].

use std::sync::Arc;
use std::time::Duration;

pub mod authz;
pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod oauth;
pub mod token;
pub mod vault;

pub use authz::{
    AuthorizationContext, AuthorizationDecision, AuthorizationManager, AuthorizationRequest, CustomerContext,
    CustomerIsolationPolicy, Identity, IsolationLevel, Permission, PermissionScope, ResourceRestriction, Role,
    RoleUpdate,
};
pub use cache::{CacheService, MemoryCache};
pub use crate::config::AuthCoreConfig;
pub use error::{AuthError, Result};
pub use logging::{setup_logging, LoggingConfig};
pub use oauth::{AuthorizationUrlParams, DpopValidation, OAuth21ComplianceManager, OAuth21Config, PkceParameters};
pub use token::{TokenClaims, TokenValidationResult, TokenValidator, TokenValidatorConfig};
pub use vault::{CredentialVault, SecretGenerator, SecretMetadata, VaultConfig};

/// The four trust components sharing one HTTP client and one cache
pub struct AuthCore {
    pub authorization: Arc<AuthorizationManager>,
    pub tokens: Arc<TokenValidator>,
    pub oauth: Arc<OAuth21ComplianceManager>,
    pub vault: Arc<CredentialVault>,
}

impl AuthCore {
    /// Validate `config` and build every component.
    pub fn new(config: AuthCoreConfig, cache: Option<Arc<dyn CacheService>>) -> Result<Self> {
        config.validate()?;

        let timeout = config.token.http_timeout_ms.max(config.oauth.http_timeout_ms);
        let http = http::build_client(Duration::from_millis(timeout))?;

        let authorization = AuthorizationManager::with_config(config.authorization);
        let tokens = TokenValidator::with_http_client(config.token, cache.clone(), http.clone());
        let oauth = OAuth21ComplianceManager::with_http_client(config.oauth, cache, http)?;
        let vault = CredentialVault::new(config.vault)?;

        tracing::info!("Auth core initialized");
        Ok(Self {
            authorization: Arc::new(authorization),
            tokens: Arc::new(tokens),
            oauth: Arc::new(oauth),
            vault: Arc::new(vault),
        })
    }
}
