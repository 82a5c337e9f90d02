//! JSON Web Key Set retrieval and caching

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::DecodingKey;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AuthError, Result};

/// A single published verification key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

fn component<'a>(value: &'a Option<String>, name: &str, kty: &str) -> Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| AuthError::InvalidToken(format!("{} key missing '{}'", kty, name)))
}

impl Jwk {
    pub fn to_decoding_key(&self) -> Result<DecodingKey> {
        let key = match self.kty.as_str() {
            "RSA" => DecodingKey::from_rsa_components(
                component(&self.n, "n", "RSA")?,
                component(&self.e, "e", "RSA")?,
            )?,
            "EC" => DecodingKey::from_ec_components(
                component(&self.x, "x", "EC")?,
                component(&self.y, "y", "EC")?,
            )?,
            "OKP" => DecodingKey::from_ed_components(component(&self.x, "x", "OKP")?)?,
            "oct" => {
                let secret = URL_SAFE_NO_PAD
                    .decode(component(&self.k, "k", "oct")?)
                    .map_err(|e| AuthError::InvalidToken(format!("oct key is not base64url: {}", e)))?;
                DecodingKey::from_secret(&secret)
            }
            other => {
                return Err(AuthError::InvalidToken(format!("Unsupported key type {}", other)));
            }
        };
        Ok(key)
    }
}

struct CachedKeySet {
    keys: HashMap<String, Jwk>,
    expires_at: Instant,
}

/// In-process `kid -> JWK` cache with one expiry for the whole set.
///
/// Refreshes may race; the last writer wins.
pub struct JwksCache {
    state: RwLock<Option<CachedKeySet>>,
    ttl: Duration,
}

impl JwksCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: RwLock::new(None),
            ttl,
        }
    }

    /// Key for `kid` unless the set is missing or expired
    pub fn get(&self, kid: &str) -> Option<Jwk> {
        let state = self.state.read();
        let cached = state.as_ref()?;
        if Instant::now() >= cached.expires_at {
            return None;
        }
        cached.keys.get(kid).cloned()
    }

    /// Replace the whole set
    pub fn replace(&self, set: JwkSet) {
        let keys: HashMap<String, Jwk> = set
            .keys
            .into_iter()
            .filter_map(|jwk| match jwk.kid.clone() {
                Some(kid) => Some((kid, jwk)),
                None => {
                    warn!(kty = %jwk.kty, "Skipping JWK without kid");
                    None
                }
            })
            .collect();
        debug!(keys = keys.len(), "JWKS cache refreshed");
        *self.state.write() = Some(CachedKeySet {
            keys,
            expires_at: Instant::now() + self.ttl,
        });
    }

    pub fn clear(&self) {
        *self.state.write() = None;
    }
}

/// Fetch a key set from `jwks_uri`
pub async fn fetch_jwks(client: &reqwest::Client, jwks_uri: &str) -> Result<JwkSet> {
    let response = client
        .get(jwks_uri)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(AuthError::ProviderError(format!(
            "JWKS fetch failed: {}",
            response.status().as_u16()
        )));
    }

    Ok(response.json::<JwkSet>().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oct(kid: &str) -> Jwk {
        Jwk {
            kty: "oct".into(),
            kid: Some(kid.into()),
            alg: Some("HS256".into()),
            use_field: Some("sig".into()),
            crv: None,
            n: None,
            e: None,
            x: None,
            y: None,
            k: Some(URL_SAFE_NO_PAD.encode(b"secret")),
        }
    }

    #[test]
    fn test_cache_lookup_and_clear() {
        let cache = JwksCache::new(Duration::from_secs(60));
        assert!(cache.get("k1").is_none());

        cache.replace(JwkSet { keys: vec![oct("k1")] });
        assert!(cache.get("k1").is_some());
        assert!(cache.get("k2").is_none());

        cache.clear();
        assert!(cache.get("k1").is_none());
    }

    #[test]
    fn test_expired_set_misses() {
        let cache = JwksCache::new(Duration::ZERO);
        cache.replace(JwkSet { keys: vec![oct("k1")] });
        assert!(cache.get("k1").is_none());
    }

    #[test]
    fn test_decoding_key_types() {
        assert!(oct("k").to_decoding_key().is_ok());

        let mut rsa = oct("k");
        rsa.kty = "RSA".into();
        assert!(rsa.to_decoding_key().is_err());

        let mut unknown = oct("k");
        unknown.kty = "XYZ".into();
        assert!(unknown.to_decoding_key().is_err());
    }
}
