//! Token claim set and validation result

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::authz::Identity;

/// `aud` may be a single string or an array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == value,
            Audience::Multiple(auds) => auds.iter().any(|aud| aud == value),
        }
    }
}

/// Confirmation (`cnf`) claim binding a token to a key or certificate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Confirmation {
    /// SHA-256 thumbprint of the client certificate (RFC 8705)
    #[serde(rename = "x5t#S256", default, skip_serializing_if = "Option::is_none")]
    pub x5t_s256: Option<String>,
    /// JWK SHA-256 thumbprint of the DPoP key (RFC 9449)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jkt: Option<String>,
}

/// Claims of a verified JWT or an RFC 7662 introspection response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Space-delimited scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cnf: Option<Confirmation>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl TokenClaims {
    pub fn scopes(&self) -> Vec<&str> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Identity handed to the authorization manager
    pub fn identity(&self) -> Identity {
        Identity {
            subject: self
                .sub
                .clone()
                .or_else(|| self.username.clone())
                .or_else(|| self.client_id.clone())
                .unwrap_or_default(),
            client_id: self.client_id.clone(),
            scopes: self.scopes().into_iter().map(String::from).collect(),
        }
    }
}

/// Required scopes absent from a space-delimited scope string
pub fn missing_scopes(granted: Option<&str>, required: &[String]) -> Vec<String> {
    let granted: Vec<&str> = granted.map(|s| s.split_whitespace().collect()).unwrap_or_default();
    required
        .iter()
        .filter(|scope| !granted.contains(&scope.as_str()))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenValidationResult {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<TokenClaims>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
}

impl TokenValidationResult {
    pub fn valid(claims: TokenClaims) -> Self {
        Self {
            valid: true,
            active: Some(true),
            claims: Some(claims),
            ..Default::default()
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_scopes() {
        let required = vec!["read".to_string(), "write".to_string()];
        assert_eq!(missing_scopes(Some("read"), &required), vec!["write".to_string()]);
        assert!(missing_scopes(Some("write  read admin"), &required).is_empty());
        assert_eq!(missing_scopes(None, &required), required);
    }

    #[test]
    fn test_claims_parse_cnf_and_extra() {
        let claims: TokenClaims = serde_json::from_value(serde_json::json!({
            "sub": "user-1",
            "aud": ["api", "gateway"],
            "scope": "read write",
            "cnf": {"x5t#S256": "thumb"},
            "tenant": "acme"
        }))
        .unwrap();

        assert_eq!(claims.cnf.unwrap().x5t_s256.as_deref(), Some("thumb"));
        assert!(claims.aud.unwrap().contains("gateway"));
        assert_eq!(claims.extra.get("tenant"), Some(&serde_json::json!("acme")));
    }

    #[test]
    fn test_identity_falls_back_to_client_id() {
        let claims = TokenClaims {
            client_id: Some("svc".into()),
            scope: Some("purge".into()),
            ..Default::default()
        };
        let identity = claims.identity();
        assert_eq!(identity.subject, "svc");
        assert_eq!(identity.scopes, vec!["purge".to_string()]);
    }
}
