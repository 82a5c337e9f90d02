//! OAuth 2.1 security envelope
//!
//! [`OAuth21ComplianceManager`] provides the primitives of the
//! authorization-code flow: PKCE, single-use state and nonce values, DPoP
//! proofs, redirect URI checks, and trust validation of authorization
//! servers. It runs on the login path, not on every request.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::cache::CacheService;
use crate::error::{AuthError, Result};
use crate::http;

pub mod dpop;
pub mod metadata;
pub mod phishing;
pub mod pkce;
pub mod state;

pub use dpop::{access_token_hash, DpopSigner, EcPublicJwk};
pub use metadata::{AuthorizationServerMetadata, MetadataCache};
pub use phishing::default_high_risk_tlds;
pub use pkce::{compute_s256_challenge, CodeChallengeMethod, PkceParameters};
pub use state::STATE_TTL_SECONDS;

/// OAuth 2.1 compliance configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OAuth21Config {
    pub min_code_verifier_length: usize,
    pub max_code_verifier_length: usize,
    /// Issuers whose metadata may be trusted
    pub trusted_authorization_servers: Vec<String>,
    pub metadata_cache_ttl: u64,
    pub high_risk_tlds: Vec<String>,
    /// Accepted age of a DPoP proof's `iat`, in seconds, in either direction
    pub dpop_proof_max_age: u64,
    /// Accept the deprecated `plain` PKCE method
    pub allow_plain_pkce: bool,
    pub http_timeout_ms: u64,
}

impl Default for OAuth21Config {
    fn default() -> Self {
        Self {
            min_code_verifier_length: 43,
            max_code_verifier_length: 128,
            trusted_authorization_servers: Vec::new(),
            metadata_cache_ttl: 3600,
            high_risk_tlds: default_high_risk_tlds(),
            dpop_proof_max_age: 300,
            allow_plain_pkce: true,
            http_timeout_ms: 5000,
        }
    }
}

/// Parameters of an authorization request
#[derive(Debug, Clone, Default)]
pub struct AuthorizationUrlParams {
    /// Defaults to `code`
    pub response_type: Option<String>,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub state: String,
    pub code_challenge: String,
    pub code_challenge_method: CodeChallengeMethod,
    pub nonce: Option<String>,
    pub prompt: Option<String>,
    pub max_age: Option<u64>,
    pub login_hint: Option<String>,
    /// Appended after the standard parameters
    pub extra: Vec<(String, String)>,
}

/// Outcome of DPoP proof validation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DpopValidation {
    pub valid: bool,
    /// RFC 7638 thumbprint of the proof key, comparable with `cnf.jkt`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jkt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DpopValidation {
    fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            jkt: None,
            error: Some(error.into()),
        }
    }
}

pub struct OAuth21ComplianceManager {
    config: OAuth21Config,
    http: reqwest::Client,
    cache: Option<Arc<dyn CacheService>>,
    metadata: MetadataCache,
    dpop: DpopSigner,
}

impl OAuth21ComplianceManager {
    pub fn new(config: OAuth21Config, cache: Option<Arc<dyn CacheService>>) -> Result<Self> {
        let http = http::build_client(Duration::from_millis(config.http_timeout_ms))?;
        Self::with_http_client(config, cache, http)
    }

    pub fn with_http_client(
        config: OAuth21Config,
        cache: Option<Arc<dyn CacheService>>,
        http: reqwest::Client,
    ) -> Result<Self> {
        Ok(Self {
            metadata: MetadataCache::new(Duration::from_secs(config.metadata_cache_ttl)),
            dpop: DpopSigner::generate()?,
            config,
            http,
            cache,
        })
    }

    pub fn generate_pkce_parameters(&self) -> PkceParameters {
        let code_verifier =
            pkce::generate_code_verifier(self.config.min_code_verifier_length, self.config.max_code_verifier_length);
        let code_challenge = compute_s256_challenge(&code_verifier);
        PkceParameters {
            code_verifier,
            code_challenge,
            code_challenge_method: CodeChallengeMethod::S256,
        }
    }

    /// Check a code verifier against the challenge sent with the authorization request.
    pub fn validate_pkce(&self, verifier: &str, challenge: &str, method: &str) -> bool {
        let len = verifier.len();
        if len < self.config.min_code_verifier_length || len > self.config.max_code_verifier_length {
            warn!(length = len, "Invalid code verifier length");
            return false;
        }
        if !pkce::is_unreserved(verifier) {
            warn!("Invalid code verifier characters");
            return false;
        }

        let method = match method.parse::<CodeChallengeMethod>() {
            Ok(method) => method,
            Err(_) => {
                error!(method = %method, "Invalid code challenge method");
                return false;
            }
        };

        let expected = match method {
            CodeChallengeMethod::Plain if !self.config.allow_plain_pkce => {
                warn!("Plain PKCE method rejected by configuration");
                return false;
            }
            CodeChallengeMethod::Plain => verifier.to_string(),
            CodeChallengeMethod::S256 => compute_s256_challenge(verifier),
        };

        if expected.len() != challenge.len() {
            debug!(method = %method, "PKCE validation error: challenge length mismatch");
            return false;
        }
        let matched = constant_time_eq::constant_time_eq(expected.as_bytes(), challenge.as_bytes());
        if matched && method == CodeChallengeMethod::Plain {
            warn!("PKCE plain method is deprecated in OAuth 2.1; clients should use S256");
        }
        matched
    }

    pub fn generate_state(&self) -> String {
        state::random_token()
    }

    pub fn generate_nonce(&self) -> String {
        state::random_token()
    }

    fn require_cache(&self) -> Result<&Arc<dyn CacheService>> {
        self.cache.as_ref().ok_or(AuthError::CacheRequired)
    }

    /// Store `data` under `state` for ten minutes
    pub async fn store_state(&self, state: &str, data: &Value) -> Result<()> {
        let cache = self.require_cache()?;
        let raw = serde_json::to_string(data)?;
        cache.set(&state::state_key(state), &raw, STATE_TTL_SECONDS).await?;
        debug!("OAuth state stored");
        Ok(())
    }

    /// Consume a stored state; a second call for the same value returns `None`.
    pub async fn validate_state(&self, state: &str) -> Option<Value> {
        let cache = match self.require_cache() {
            Ok(cache) => cache,
            Err(e) => {
                error!(error = %e, "State validation without cache");
                return None;
            }
        };

        match cache.take(&state::state_key(state)).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!(error = %e, "Failed to parse state data");
                    None
                }
            },
            Ok(None) => {
                warn!("State not found or expired");
                None
            }
            Err(e) => {
                error!(error = %e, "State lookup failed");
                None
            }
        }
    }

    pub async fn store_nonce(&self, nonce: &str) -> Result<()> {
        let cache = self.require_cache()?;
        cache.set(&state::nonce_key(nonce), "1", STATE_TTL_SECONDS).await
    }

    /// Consume a stored nonce
    pub async fn validate_nonce(&self, nonce: &str) -> bool {
        let Ok(cache) = self.require_cache() else {
            error!("Nonce validation without cache");
            return false;
        };
        match cache.take(&state::nonce_key(nonce)).await {
            Ok(Some(_)) => true,
            Ok(None) => {
                warn!("Nonce not found or expired");
                false
            }
            Err(e) => {
                error!(error = %e, "Nonce lookup failed");
                false
            }
        }
    }

    /// Sign a DPoP proof for one HTTP request
    pub fn create_dpop_proof(&self, method: &str, url: &str, access_token: Option<&str>) -> Result<String> {
        let jti = Uuid::new_v4().to_string();
        let iat = chrono::Utc::now().timestamp();
        self.dpop.sign_proof(&jti, method, url, iat, access_token)
    }

    /// Thumbprint of this manager's DPoP key
    pub fn dpop_jwk_thumbprint(&self) -> String {
        self.dpop.public_jwk().thumbprint()
    }

    /// Verify a DPoP proof presented with a request.
    pub async fn validate_dpop_proof(
        &self,
        proof: &str,
        method: &str,
        url: &str,
        access_token: Option<&str>,
    ) -> DpopValidation {
        let verified = match dpop::verify_proof_signature(proof) {
            Ok(verified) => verified,
            Err(e) => {
                debug!(error = %e, "DPoP proof rejected");
                return DpopValidation::invalid(e.to_string());
            }
        };
        let claims = &verified.claims;
        let claim = |name: &str| claims.get(name).and_then(Value::as_str);

        if claim("htm") != Some(method) {
            return DpopValidation::invalid("DPoP htm does not match request method");
        }
        if claim("htu").map(without_query) != Some(without_query(url)) {
            return DpopValidation::invalid("DPoP htu does not match request URL");
        }

        let Some(iat) = claims.get("iat").and_then(Value::as_i64) else {
            return DpopValidation::invalid("DPoP proof missing iat");
        };
        let age = (chrono::Utc::now().timestamp() - iat).unsigned_abs();
        if age > self.config.dpop_proof_max_age {
            return DpopValidation::invalid("DPoP proof outside accepted time window");
        }

        if let Some(token) = access_token {
            if claim("ath") != Some(access_token_hash(token).as_str()) {
                return DpopValidation::invalid("DPoP ath does not match access token");
            }
        }

        let Some(jti) = claim("jti") else {
            return DpopValidation::invalid("DPoP proof missing jti");
        };
        if let Some(cache) = &self.cache {
            let key = state::dpop_jti_key(jti);
            match cache.set_if_absent(&key, "1", self.config.dpop_proof_max_age * 2).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(jti = %jti, "DPoP proof replayed");
                    return DpopValidation::invalid("DPoP proof replayed");
                }
                Err(e) => {
                    error!(error = %e, "DPoP replay lookup failed");
                    return DpopValidation::invalid("DPoP replay check unavailable");
                }
            }
        }

        DpopValidation {
            valid: true,
            jkt: Some(verified.jwk.thumbprint()),
            error: None,
        }
    }

    /// Heuristic phishing indicators for a client's redirect URI
    pub fn check_phishing_indicators(&self, redirect_uri: &str, client_id: &str) -> Vec<String> {
        let indicators = phishing::check_phishing_indicators(redirect_uri, &self.config.high_risk_tlds);
        if !indicators.is_empty() {
            warn!(
                client_id = %client_id,
                redirect_uri = %redirect_uri,
                indicators = ?indicators,
                "Phishing indicators detected"
            );
        }
        indicators
    }

    /// Exact match against a registered URI; `https` unless the host is loopback.
    pub fn validate_redirect_uri(&self, redirect_uri: &str, registered: &[String]) -> bool {
        let Ok(url) = Url::parse(redirect_uri) else {
            warn!(redirect_uri = %redirect_uri, "Redirect URI is not a valid URL");
            return false;
        };
        if url.fragment().is_some() {
            warn!(redirect_uri = %redirect_uri, "Redirect URI must not contain a fragment");
            return false;
        }

        let loopback = matches!(url.host_str(), Some("localhost") | Some("127.0.0.1") | Some("[::1]"));
        let secure = url.scheme() == "https" || (url.scheme() == "http" && loopback);
        if !secure {
            warn!(redirect_uri = %redirect_uri, "Redirect URI must use https");
            return false;
        }

        let registered_match = registered.iter().any(|r| r == redirect_uri);
        if !registered_match {
            warn!(redirect_uri = %redirect_uri, "Redirect URI not registered");
        }
        registered_match
    }

    /// Confirm `issuer` is trusted and its metadata meets OAuth 2.1 requirements.
    pub async fn validate_authorization_server(&self, issuer: &str) -> bool {
        let normalized = issuer.trim_end_matches('/');
        let trusted = self
            .config
            .trusted_authorization_servers
            .iter()
            .any(|t| t.trim_end_matches('/') == normalized);
        if !trusted {
            warn!(issuer = %issuer, "Authorization server not in trusted list");
            return false;
        }

        let metadata = match self.metadata.get(normalized) {
            Some(metadata) => metadata,
            None => match metadata::fetch_metadata(&self.http, normalized).await {
                Ok(metadata) => {
                    self.metadata.insert(normalized, metadata.clone());
                    metadata
                }
                Err(e) => {
                    error!(issuer = %issuer, error = %e, "Failed to validate authorization server");
                    return false;
                }
            },
        };

        if metadata.issuer.trim_end_matches('/') != normalized {
            warn!(issuer = %issuer, advertised = %metadata.issuer, "Authorization server metadata issuer mismatch");
            return false;
        }
        if !metadata.code_challenge_methods_supported.iter().any(|m| m == "S256") {
            warn!(issuer = %issuer, "Authorization server does not support required S256 PKCE method");
            return false;
        }
        if metadata.response_types_supported.iter().any(|t| t == "token") {
            warn!(issuer = %issuer, "Authorization server supports deprecated implicit grant");
            return false;
        }

        info!(issuer = %issuer, "Authorization server validated");
        true
    }

    /// Append authorization request parameters to `endpoint`, keeping its existing query.
    pub fn build_authorization_url(&self, endpoint: &str, params: &AuthorizationUrlParams) -> Result<String> {
        let required = [
            ("client_id", &params.client_id),
            ("redirect_uri", &params.redirect_uri),
            ("scope", &params.scope),
            ("state", &params.state),
            ("code_challenge", &params.code_challenge),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.is_empty()) {
            return Err(AuthError::InvalidRequest(format!(
                "Missing required authorization parameter: {}",
                name
            )));
        }

        let response_type = params.response_type.as_deref().unwrap_or("code");
        if response_type.split_whitespace().any(|t| t == "token") {
            return Err(AuthError::InvalidRequest("Implicit grant is not permitted".to_string()));
        }
        if params.code_challenge_method == CodeChallengeMethod::Plain {
            warn!(client_id = %params.client_id, "Authorization request uses deprecated plain PKCE method");
        }

        let mut url = Url::parse(endpoint)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", response_type)
                .append_pair("client_id", &params.client_id)
                .append_pair("redirect_uri", &params.redirect_uri)
                .append_pair("scope", &params.scope)
                .append_pair("state", &params.state)
                .append_pair("code_challenge", &params.code_challenge)
                .append_pair("code_challenge_method", &params.code_challenge_method.to_string());

            if let Some(nonce) = &params.nonce {
                query.append_pair("nonce", nonce);
            }
            if let Some(prompt) = &params.prompt {
                query.append_pair("prompt", prompt);
            }
            if let Some(max_age) = params.max_age {
                query.append_pair("max_age", &max_age.to_string());
            }
            if let Some(login_hint) = &params.login_hint {
                query.append_pair("login_hint", login_hint);
            }
            for (name, value) in &params.extra {
                query.append_pair(name, value);
            }
        }
        Ok(url.into())
    }
}

fn without_query(url: &str) -> &str {
    url.split(|c| c == '?' || c == '#').next().unwrap_or(url)
}
