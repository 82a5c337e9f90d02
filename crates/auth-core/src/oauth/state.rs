//! Random state/nonce values and their single-use cache keys

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

/// Lifetime of stored state and nonce entries
pub const STATE_TTL_SECONDS: u64 = 600;

const STATE_PREFIX: &str = "oauth2:state:";
const NONCE_PREFIX: &str = "oauth2:nonce:";
const DPOP_JTI_PREFIX: &str = "oauth2:dpop:jti:";

/// 32 random bytes, base64url without padding
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn state_key(state: &str) -> String {
    format!("{}{}", STATE_PREFIX, state)
}

pub fn nonce_key(nonce: &str) -> String {
    format!("{}{}", NONCE_PREFIX, nonce)
}

pub fn dpop_jti_key(jti: &str) -> String {
    format!("{}{}", DPOP_JTI_PREFIX, jti)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_token_shape() {
        let token = random_token();
        assert_eq!(token.len(), 43);
        assert!(!token.contains('='));
        assert!(token.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
    }

    #[test]
    fn test_keys_are_namespaced() {
        assert_eq!(state_key("abc"), "oauth2:state:abc");
        assert_eq!(nonce_key("abc"), "oauth2:nonce:abc");
        assert_ne!(state_key("abc"), nonce_key("abc"));
    }
}
