//! Bearer token validation
//!
//! [`TokenValidator`] turns a bearer credential into a verified claim set.
//! Three-segment base64url tokens are verified locally as JWTs against a
//! cached JWKS; anything else goes to the RFC 7662 introspection endpoint.
//! Results are cached under a SHA-256 of the raw token, never the token
//! itself.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::cache::CacheService;
use crate::error::{AuthError, Result};
use crate::http;

pub mod claims;
pub mod introspection;
pub mod jwks;

pub use claims::{missing_scopes, Audience, Confirmation, TokenClaims, TokenValidationResult};
pub use introspection::{IntrospectionClient, IntrospectionResponse};
pub use jwks::{Jwk, JwkSet, JwksCache};

pub const NO_VALIDATION_METHOD: &str =
    "No validation method available (neither JWT validation nor introspection configured)";

/// `cnf` member holding a certificate thumbprint (RFC 8705)
pub const BINDING_CERTIFICATE_THUMBPRINT: &str = "x5t#S256";
/// `cnf` member holding a JWK thumbprint (RFC 9449)
pub const BINDING_JWK_THUMBPRINT: &str = "jkt";

const CACHE_PREFIX: &str = "token:validation:";

/// Token validator configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenValidatorConfig {
    pub jwks_uri: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<Vec<String>>,
    pub allowed_algorithms: Vec<String>,
    pub required_claims: Vec<String>,
    pub clock_skew_seconds: u64,
    pub introspection_endpoint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Seconds a valid result stays cached
    pub valid_token_cache_ttl: u64,
    /// Seconds an invalid result stays cached
    pub invalid_token_cache_ttl: u64,
    pub jwks_cache_ttl: u64,
    pub http_timeout_ms: u64,
}

impl Default for TokenValidatorConfig {
    fn default() -> Self {
        Self {
            jwks_uri: None,
            issuer: None,
            audience: None,
            allowed_algorithms: vec!["RS256".to_string(), "ES256".to_string()],
            required_claims: vec!["sub".to_string(), "exp".to_string()],
            clock_skew_seconds: 60,
            introspection_endpoint: None,
            client_id: None,
            client_secret: None,
            valid_token_cache_ttl: 300,
            invalid_token_cache_ttl: 60,
            jwks_cache_ttl: 3600,
            http_timeout_ms: 5000,
        }
    }
}

pub struct TokenValidator {
    config: TokenValidatorConfig,
    http: reqwest::Client,
    cache: Option<Arc<dyn CacheService>>,
    jwks: JwksCache,
    introspection: Option<IntrospectionClient>,
}

impl TokenValidator {
    pub fn new(config: TokenValidatorConfig, cache: Option<Arc<dyn CacheService>>) -> Result<Self> {
        let http = http::build_client(Duration::from_millis(config.http_timeout_ms))?;
        Ok(Self::with_http_client(config, cache, http))
    }

    pub fn with_http_client(
        config: TokenValidatorConfig,
        cache: Option<Arc<dyn CacheService>>,
        http: reqwest::Client,
    ) -> Self {
        let introspection = config.introspection_endpoint.as_ref().map(|endpoint| IntrospectionClient {
            endpoint: endpoint.clone(),
            client_id: config.client_id.clone().unwrap_or_default(),
            client_secret: config.client_secret.clone().unwrap_or_default(),
        });

        Self {
            jwks: JwksCache::new(Duration::from_secs(config.jwks_cache_ttl)),
            config,
            http,
            cache,
            introspection,
        }
    }

    /// Validate a bearer token and optionally require scopes.
    ///
    /// Never fails; every fault becomes an invalid result.
    pub async fn validate_access_token(&self, token: &str, required_scopes: Option<&[String]>) -> TokenValidationResult {
        let key = cache_key(token);

        let result = match self.cached_result(&key).await {
            Some(result) => result,
            None => {
                let result = self.validate_uncached(token).await;
                self.store_result(&key, &result).await;
                result
            }
        };

        match required_scopes {
            Some(required) if result.valid && !required.is_empty() => {
                let scope = result.claims.as_ref().and_then(|c| c.scope.as_deref());
                let missing = missing_scopes(scope, required);
                if missing.is_empty() {
                    result
                } else {
                    debug!(missing = %missing.join(" "), "Token lacks required scopes");
                    TokenValidationResult {
                        valid: false,
                        active: result.active,
                        claims: None,
                        error: Some(format!("Missing required scopes: {}", missing.join(" "))),
                        cached: result.cached,
                    }
                }
            }
            _ => result,
        }
    }

    async fn cached_result(&self, key: &str) -> Option<TokenValidationResult> {
        let cache = self.cache.as_ref()?;
        match cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str::<TokenValidationResult>(&raw) {
                Ok(result) if result.valid && self.seconds_until_expiry(&result).is_some_and(|s| s <= 0) => {
                    debug!("Discarding cached result for an expired token");
                    None
                }
                Ok(mut result) => {
                    result.cached = Some(true);
                    Some(result)
                }
                Err(e) => {
                    warn!(error = %e, "Discarding unreadable cached validation result");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Token cache lookup failed");
                None
            }
        }
    }

    /// Seconds left before `exp` plus clock skew, when the claims carry `exp`
    fn seconds_until_expiry(&self, result: &TokenValidationResult) -> Option<i64> {
        let exp = result.claims.as_ref()?.exp?;
        let skew = i64::try_from(self.config.clock_skew_seconds).unwrap_or(i64::MAX);
        Some(exp.saturating_add(skew).saturating_sub(chrono::Utc::now().timestamp()))
    }

    async fn store_result(&self, key: &str, result: &TokenValidationResult) {
        let Some(cache) = &self.cache else {
            return;
        };
        let ttl = if result.valid {
            match self.seconds_until_expiry(result) {
                Some(remaining) if remaining <= 0 => {
                    debug!("Not caching a token that expires now");
                    return;
                }
                Some(remaining) => self.config.valid_token_cache_ttl.min(remaining.unsigned_abs()),
                None => self.config.valid_token_cache_ttl,
            }
        } else {
            self.config.invalid_token_cache_ttl
        };
        let stored = serde_json::to_string(result).map_err(AuthError::from);
        let outcome = match stored {
            Ok(raw) => cache.set(key, &raw, ttl).await,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            warn!(error = %e, "Failed to cache token validation result");
        }
    }

    async fn validate_uncached(&self, token: &str) -> TokenValidationResult {
        let jwt_configured = self.config.jwks_uri.is_some();
        if !jwt_configured && self.introspection.is_none() {
            return TokenValidationResult::invalid(NO_VALIDATION_METHOD);
        }

        if jwt_configured && looks_like_jwt(token) {
            return self.validate_jwt(token).await;
        }

        match &self.introspection {
            Some(client) => self.validate_introspected(client, token).await,
            None => TokenValidationResult::invalid("Opaque token requires introspection, which is not configured"),
        }
    }

    async fn validate_jwt(&self, token: &str) -> TokenValidationResult {
        let (header, payload) = match decode_unverified(token) {
            Ok(parts) => parts,
            Err(e) => return TokenValidationResult::invalid(format!("Malformed JWT: {}", e)),
        };

        let alg = header.get("alg").and_then(Value::as_str).unwrap_or_default();
        let algorithm = match Algorithm::from_str(alg) {
            Ok(algorithm) if self.config.allowed_algorithms.iter().any(|a| a == alg) => algorithm,
            _ => return TokenValidationResult::invalid(format!("Algorithm {} not allowed", alg)),
        };

        let Some(kid) = header.get("kid").and_then(Value::as_str) else {
            return TokenValidationResult::invalid("JWT missing kid header");
        };

        let Some(jwk) = self.resolve_key(kid).await else {
            return TokenValidationResult::invalid("Signing key not found");
        };
        let decoding_key = match jwk.to_decoding_key() {
            Ok(key) => key,
            Err(e) => {
                warn!(kid = %kid, error = %e, "Unusable signing key");
                return TokenValidationResult::invalid("Signing key not found");
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.leeway = self.config.clock_skew_seconds;
        validation.validate_nbf = true;
        validation.required_spec_claims = HashSet::new();
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.config.audience {
            Some(audience) => validation.set_audience(audience.as_slice()),
            None => validation.validate_aud = false,
        }

        let claims = match jsonwebtoken::decode::<TokenClaims>(token, &decoding_key, &validation) {
            Ok(data) => data.claims,
            Err(e) => {
                let message = match e.kind() {
                    ErrorKind::ExpiredSignature => "Token expired".to_string(),
                    ErrorKind::ImmatureSignature => "Token not yet valid".to_string(),
                    ErrorKind::InvalidSignature => "Invalid token signature".to_string(),
                    ErrorKind::InvalidIssuer => "Invalid token issuer".to_string(),
                    ErrorKind::InvalidAudience => "Invalid token audience".to_string(),
                    _ => format!("Token verification failed: {}", e),
                };
                debug!(kid = %kid, error = %e, "JWT verification failed");
                return TokenValidationResult::invalid(message);
            }
        };

        let missing: Vec<&str> = self
            .config
            .required_claims
            .iter()
            .map(String::as_str)
            .filter(|name| !payload.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return TokenValidationResult::invalid(format!("Missing required claims: {}", missing.join(", ")));
        }

        TokenValidationResult::valid(claims)
    }

    async fn resolve_key(&self, kid: &str) -> Option<Jwk> {
        if let Some(jwk) = self.jwks.get(kid) {
            return Some(jwk);
        }

        let jwks_uri = self.config.jwks_uri.as_deref()?;
        match jwks::fetch_jwks(&self.http, jwks_uri).await {
            Ok(set) => self.jwks.replace(set),
            Err(e) => warn!(jwks_uri = %jwks_uri, error = %e, "JWKS fetch failed"),
        }

        let jwk = self.jwks.get(kid);
        if jwk.is_none() {
            warn!(kid = %kid, "Signing key not found");
        }
        jwk
    }

    async fn validate_introspected(&self, client: &IntrospectionClient, token: &str) -> TokenValidationResult {
        match client.introspect(&self.http, token).await {
            Ok(response) if !response.active => TokenValidationResult {
                valid: false,
                active: Some(false),
                error: Some("Token inactive".to_string()),
                ..Default::default()
            },
            Ok(response) => TokenValidationResult::valid(response.claims),
            Err(AuthError::ProviderError(message)) => {
                warn!(endpoint = %client.endpoint, error = %message, "Introspection rejected");
                TokenValidationResult::invalid(message)
            }
            Err(e) => {
                warn!(endpoint = %client.endpoint, error = %e, "Introspection request failed");
                TokenValidationResult::invalid(format!("Introspection request failed: {}", e))
            }
        }
    }

    /// Check that the token's `cnf` claim binds it to `expected_value`.
    pub async fn validate_token_binding(&self, token: &str, binding_type: &str, expected_value: &str) -> bool {
        let result = self.validate_access_token(token, None).await;
        if !result.valid {
            return false;
        }
        let Some(cnf) = result.claims.and_then(|claims| claims.cnf) else {
            return false;
        };

        let actual = match binding_type {
            BINDING_CERTIFICATE_THUMBPRINT => cnf.x5t_s256,
            BINDING_JWK_THUMBPRINT => cnf.jkt,
            other => {
                warn!(binding_type = %other, "Unknown token binding type");
                return false;
            }
        };

        actual
            .map(|value| constant_time_eq::constant_time_eq(value.as_bytes(), expected_value.as_bytes()))
            .unwrap_or(false)
    }

    /// Drop the cached validation result for `token`.
    ///
    /// This only evicts the local result; it does not call the authorization
    /// server's revocation endpoint.
    pub async fn revoke_token(&self, token: &str, token_type: &str) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.del(&cache_key(token)).await?;
        }
        info!(token_type = %token_type, "Token revoked");
        Ok(())
    }

    /// Force the next JWT validation to refetch the key set
    pub fn clear_jwks_cache(&self) {
        self.jwks.clear();
    }
}

/// Cache key derived from a SHA-256 of the raw token
pub fn cache_key(token: &str) -> String {
    format!("{}{}", CACHE_PREFIX, hex::encode(Sha256::digest(token.as_bytes())))
}

fn is_base64url_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'=')
}

/// Three dot-separated base64url segments
pub fn looks_like_jwt(token: &str) -> bool {
    let segments: Vec<&str> = token.split('.').collect();
    segments.len() == 3 && segments.iter().all(|s| is_base64url_segment(s))
}

fn decode_segment(segment: &str) -> Result<Map<String, Value>> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Header and payload of a JWT without checking its signature
fn decode_unverified(token: &str) -> Result<(Map<String, Value>, Map<String, Value>)> {
    let mut parts = token.split('.');
    let (Some(header), Some(payload)) = (parts.next(), parts.next()) else {
        return Err(AuthError::InvalidToken("expected three segments".to_string()));
    };
    Ok((decode_segment(header)?, decode_segment(payload)?))
}
