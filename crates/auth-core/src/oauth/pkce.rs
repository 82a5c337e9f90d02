//! PKCE (Proof Key for Code Exchange, RFC 7636) primitives

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AuthError;

/// RFC 3986 unreserved characters
const UNRESERVED: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum CodeChallengeMethod {
    #[default]
    #[serde(rename = "S256")]
    S256,
    /// Deprecated in OAuth 2.1; accepted for legacy clients only
    #[serde(rename = "plain")]
    Plain,
}

impl fmt::Display for CodeChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S256 => write!(f, "S256"),
            Self::Plain => write!(f, "plain"),
        }
    }
}

impl FromStr for CodeChallengeMethod {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S256" => Ok(Self::S256),
            "plain" | "PLAIN" => Ok(Self::Plain),
            other => Err(AuthError::InvalidRequest(format!("Invalid code challenge method: {}", other))),
        }
    }
}

/// Verifier/challenge pair for one authorization attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PkceParameters {
    pub code_verifier: String,
    pub code_challenge: String,
    pub code_challenge_method: CodeChallengeMethod,
}

/// Random verifier with a length drawn uniformly from `min_len..=max_len`
pub fn generate_code_verifier(min_len: usize, max_len: usize) -> String {
    let mut rng = OsRng;
    let len = rng.gen_range(min_len..=max_len.max(min_len));
    (0..len)
        .map(|_| UNRESERVED[rng.gen_range(0..UNRESERVED.len())] as char)
        .collect()
}

/// `base64url_nopad(SHA256(verifier))`
pub fn compute_s256_challenge(code_verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()))
}

pub fn is_unreserved(value: &str) -> bool {
    value.bytes().all(|b| UNRESERVED.contains(&b))
}
