//! Secret envelope: PBKDF2-HMAC-SHA256 key derivation and AES-256-GCM

use std::num::NonZeroU32;

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use crate::error::{AuthError, Result};

pub const SALT_LEN: usize = 32;
pub const KEY_LEN: usize = 32;

/// Ciphertext plus everything needed to decrypt it except the passphrase
#[derive(Clone)]
pub struct SealedSecret {
    pub salt: [u8; SALT_LEN],
    pub iv: [u8; NONCE_LEN],
    pub iterations: NonZeroU32,
    /// Ciphertext with the GCM tag appended
    pub ciphertext: Vec<u8>,
}

impl std::fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedSecret")
            .field("iterations", &self.iterations)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

fn derive_key(passphrase: &[u8], salt: &[u8], iterations: NonZeroU32) -> Result<LessSafeKey> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, iterations, salt, passphrase, &mut key[..]);
    let unbound = UnboundKey::new(&AES_256_GCM, &key[..])
        .map_err(|_| AuthError::EncryptionFailed("invalid key length".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt `plaintext` under a key derived from `passphrase` with a fresh salt and IV.
///
/// `aad` is authenticated but not encrypted; the same value must be supplied to [`open`].
pub fn seal(passphrase: &[u8], iterations: NonZeroU32, aad: &[u8], plaintext: &[u8]) -> Result<SealedSecret> {
    let rng = SystemRandom::new();
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; NONCE_LEN];
    rng.fill(&mut salt)
        .and_then(|_| rng.fill(&mut iv))
        .map_err(|_| AuthError::EncryptionFailed("random generation failed".to_string()))?;

    let key = derive_key(passphrase, &salt, iterations)?;
    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(Nonce::assume_unique_for_key(iv), Aad::from(aad), &mut in_out)
        .map_err(|_| AuthError::EncryptionFailed("seal failed".to_string()))?;

    Ok(SealedSecret {
        salt,
        iv,
        iterations,
        ciphertext: in_out,
    })
}

/// Decrypt and authenticate a sealed secret.
pub fn open(passphrase: &[u8], aad: &[u8], sealed: &SealedSecret) -> Result<Zeroizing<Vec<u8>>> {
    let key = derive_key(passphrase, &sealed.salt, sealed.iterations)
        .map_err(|e| AuthError::DecryptionFailed(e.to_string()))?;
    let mut in_out = Zeroizing::new(sealed.ciphertext.clone());
    let plaintext_len = key
        .open_in_place(Nonce::assume_unique_for_key(sealed.iv), Aad::from(aad), in_out.as_mut_slice())
        .map_err(|_| AuthError::DecryptionFailed("authentication tag mismatch".to_string()))?
        .len();
    in_out.truncate(plaintext_len);
    Ok(in_out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iterations() -> NonZeroU32 {
        NonZeroU32::new(1_000).unwrap()
    }

    #[test]
    fn test_seal_open() {
        let sealed = seal(b"correct horse battery", iterations(), b"id-1", b"api-key-value").unwrap();
        assert_eq!(sealed.ciphertext.len(), "api-key-value".len() + AES_256_GCM.tag_len());

        let opened = open(b"correct horse battery", b"id-1", &sealed).unwrap();
        assert_eq!(opened.as_slice(), b"api-key-value");
    }

    #[test]
    fn test_fresh_salt_and_iv_per_seal() {
        let a = seal(b"passphrase-passphrase", iterations(), b"id", b"same").unwrap();
        let b = seal(b"passphrase-passphrase", iterations(), b"id", b"same").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_passphrase_or_aad_fails() {
        let sealed = seal(b"passphrase-passphrase", iterations(), b"id-1", b"value").unwrap();
        assert!(matches!(
            open(b"another-passphrase!!", b"id-1", &sealed),
            Err(AuthError::DecryptionFailed(_))
        ));
        assert!(open(b"passphrase-passphrase", b"id-2", &sealed).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut sealed = seal(b"passphrase-passphrase", iterations(), b"id", b"value").unwrap();
        sealed.ciphertext[0] ^= 0x01;
        assert!(open(b"passphrase-passphrase", b"id", &sealed).is_err());
    }

    #[test]
    fn test_large_payload() {
        let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        let sealed = seal(b"passphrase-passphrase", iterations(), b"big", &payload).unwrap();
        let opened = open(b"passphrase-passphrase", b"big", &sealed).unwrap();
        assert_eq!(opened.as_slice(), payload.as_slice());
    }
}
