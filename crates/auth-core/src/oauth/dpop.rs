//! DPoP proofs (RFC 9449) signed with an ES256 key

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_FIXED, ECDSA_P256_SHA256_FIXED_SIGNING,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{AuthError, Result};

pub const DPOP_TYP: &str = "dpop+jwt";
pub const DPOP_ALG: &str = "ES256";

/// Public half of a P-256 key in JWK form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcPublicJwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
}

impl EcPublicJwk {
    fn from_uncompressed_point(point: &[u8]) -> Result<Self> {
        if point.len() != 65 || point[0] != 0x04 {
            return Err(AuthError::InternalError("unexpected P-256 public key encoding".to_string()));
        }
        Ok(Self {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: URL_SAFE_NO_PAD.encode(&point[1..33]),
            y: URL_SAFE_NO_PAD.encode(&point[33..65]),
        })
    }

    fn to_uncompressed_point(&self) -> Result<Vec<u8>> {
        let x = URL_SAFE_NO_PAD
            .decode(&self.x)
            .map_err(|e| AuthError::InvalidToken(format!("bad jwk x: {}", e)))?;
        let y = URL_SAFE_NO_PAD
            .decode(&self.y)
            .map_err(|e| AuthError::InvalidToken(format!("bad jwk y: {}", e)))?;
        if x.len() != 32 || y.len() != 32 {
            return Err(AuthError::InvalidToken("jwk coordinates must be 32 bytes".to_string()));
        }
        let mut point = Vec::with_capacity(65);
        point.push(0x04);
        point.extend_from_slice(&x);
        point.extend_from_slice(&y);
        Ok(point)
    }

    /// RFC 7638 thumbprint: SHA-256 over the required members in lexical order
    pub fn thumbprint(&self) -> String {
        let canonical = format!(
            r#"{{"crv":"{}","kty":"{}","x":"{}","y":"{}"}}"#,
            self.crv, self.kty, self.x, self.y
        );
        URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
    }
}

/// `ath` claim value for an access token
pub fn access_token_hash(access_token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(access_token.as_bytes()))
}

/// Holder key used to sign outgoing proofs
pub struct DpopSigner {
    key_pair: EcdsaKeyPair,
    jwk: EcPublicJwk,
    rng: SystemRandom,
}

impl DpopSigner {
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|_| AuthError::InternalError("failed to generate DPoP key".to_string()))?;
        Self::from_pkcs8(pkcs8.as_ref())
    }

    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self> {
        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
            .map_err(|e| AuthError::ConfigError(format!("invalid DPoP key: {}", e)))?;
        let jwk = EcPublicJwk::from_uncompressed_point(key_pair.public_key().as_ref())?;
        Ok(Self { key_pair, jwk, rng })
    }

    pub fn public_jwk(&self) -> &EcPublicJwk {
        &self.jwk
    }

    pub fn sign_proof(&self, jti: &str, method: &str, url: &str, iat: i64, access_token: Option<&str>) -> Result<String> {
        let header = json!({
            "typ": DPOP_TYP,
            "alg": DPOP_ALG,
            "jwk": self.jwk,
        });

        let mut payload = json!({
            "jti": jti,
            "htm": method,
            "htu": url,
            "iat": iat,
        });
        if let Some(token) = access_token {
            payload["ath"] = Value::from(access_token_hash(token));
        }

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload)?)
        );
        let signature = self
            .key_pair
            .sign(&self.rng, signing_input.as_bytes())
            .map_err(|_| AuthError::InternalError("DPoP signing failed".to_string()))?;

        Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature.as_ref())))
    }
}

/// A proof whose signature has been verified; claims still need policy checks
#[derive(Debug, Clone)]
pub struct VerifiedProof {
    pub jwk: EcPublicJwk,
    pub claims: Map<String, Value>,
}

fn decode_json(segment: &str) -> Result<Map<String, Value>> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AuthError::InvalidToken(format!("DPoP proof is not base64url: {}", e)))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Check structure, header and signature of a proof
pub fn verify_proof_signature(proof: &str) -> Result<VerifiedProof> {
    let parts: Vec<&str> = proof.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthError::InvalidToken("DPoP proof must have three parts".to_string()));
    }

    let header = decode_json(parts[0])?;
    if header.get("typ").and_then(Value::as_str) != Some(DPOP_TYP) {
        return Err(AuthError::InvalidToken("DPoP proof has wrong typ".to_string()));
    }
    if header.get("alg").and_then(Value::as_str) != Some(DPOP_ALG) {
        return Err(AuthError::InvalidToken("DPoP proof algorithm not supported".to_string()));
    }
    let jwk_value = header
        .get("jwk")
        .ok_or_else(|| AuthError::InvalidToken("DPoP proof missing jwk".to_string()))?;
    if jwk_value.get("d").is_some() {
        return Err(AuthError::InvalidToken("DPoP jwk contains private key material".to_string()));
    }
    let jwk: EcPublicJwk = serde_json::from_value(jwk_value.clone())?;
    if jwk.kty != "EC" || jwk.crv != "P-256" {
        return Err(AuthError::InvalidToken("DPoP jwk must be a P-256 key".to_string()));
    }

    let signature = URL_SAFE_NO_PAD
        .decode(parts[2])
        .map_err(|e| AuthError::InvalidToken(format!("DPoP signature is not base64url: {}", e)))?;
    let point = jwk.to_uncompressed_point()?;
    let signing_input = &proof[..parts[0].len() + 1 + parts[1].len()];
    UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, point)
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| AuthError::InvalidToken("DPoP signature invalid".to_string()))?;

    Ok(VerifiedProof {
        jwk,
        claims: decode_json(parts[1])?,
    })
}
