//! Authorization server metadata (RFC 8414) discovery and caching

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

pub const WELL_KNOWN_PATH: &str = "/.well-known/oauth-authorization-server";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introspection_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<String>,
    #[serde(default)]
    pub response_types_supported: Vec<String>,
    #[serde(default)]
    pub grant_types_supported: Vec<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
    #[serde(default)]
    pub dpop_signing_alg_values_supported: Vec<String>,
}

pub fn discovery_url(issuer: &str) -> String {
    format!("{}{}", issuer.trim_end_matches('/'), WELL_KNOWN_PATH)
}

pub async fn fetch_metadata(client: &reqwest::Client, issuer: &str) -> Result<AuthorizationServerMetadata> {
    let response = client
        .get(discovery_url(issuer))
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(AuthError::ProviderError(format!(
            "Metadata discovery failed: {}",
            response.status().as_u16()
        )));
    }

    Ok(response.json::<AuthorizationServerMetadata>().await?)
}

/// Issuer-keyed metadata cache; concurrent refreshes may race, last writer wins
pub struct MetadataCache {
    entries: DashMap<String, (AuthorizationServerMetadata, Instant)>,
    ttl: Duration,
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, issuer: &str) -> Option<AuthorizationServerMetadata> {
        let entry = self.entries.get(issuer)?;
        let (metadata, expires_at) = entry.value();
        (Instant::now() < *expires_at).then(|| metadata.clone())
    }

    pub fn insert(&self, issuer: &str, metadata: AuthorizationServerMetadata) {
        self.entries
            .insert(issuer.to_string(), (metadata, Instant::now() + self.ttl));
    }

    pub fn invalidate(&self, issuer: &str) {
        self.entries.remove(issuer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> AuthorizationServerMetadata {
        serde_json::from_value(serde_json::json!({
            "issuer": "https://as.example.com",
            "authorization_endpoint": "https://as.example.com/authorize",
            "token_endpoint": "https://as.example.com/token",
            "code_challenge_methods_supported": ["S256"]
        }))
        .unwrap()
    }

    #[test]
    fn test_discovery_url() {
        assert_eq!(
            discovery_url("https://as.example.com/"),
            "https://as.example.com/.well-known/oauth-authorization-server"
        );
    }

    #[test]
    fn test_optional_lists_default_empty() {
        let m = metadata();
        assert!(m.response_types_supported.is_empty());
        assert_eq!(m.code_challenge_methods_supported, vec!["S256".to_string()]);
    }

    #[test]
    fn test_cache_expiry() {
        let cache = MetadataCache::new(Duration::from_secs(60));
        cache.insert("https://as.example.com", metadata());
        assert!(cache.get("https://as.example.com").is_some());
        cache.invalidate("https://as.example.com");
        assert!(cache.get("https://as.example.com").is_none());

        let expired = MetadataCache::new(Duration::ZERO);
        expired.insert("https://as.example.com", metadata());
        assert!(expired.get("https://as.example.com").is_none());
    }
}
