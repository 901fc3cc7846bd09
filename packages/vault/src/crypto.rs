//! AEAD encryption of PANs at rest, HMAC fingerprinting for deduplication,
//! and token generation. Grounded in `ring::aead` / `ring::hmac` usage
//! patterns from the wider corpus (see DESIGN.md).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::VaultError;
use crate::keys::{VaultKey, VaultPepper};

const NONCE_LEN: usize = 12;

/// Encrypt a canonical (digits-only) PAN. Output layout is
/// `nonce(12) || ciphertext || tag(16)`.
pub fn encrypt_pan(key: &VaultKey, rng: &SystemRandom, canonical_pan: &str) -> Result<Vec<u8>, VaultError> {
    let unbound =
        UnboundKey::new(&AES_256_GCM, key.as_bytes()).map_err(|_| VaultError::InvalidKeyMaterial)?;
    let sealing_key = LessSafeKey::new(unbound);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut nonce_bytes).map_err(|_| VaultError::CryptoFailed)?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = canonical_pan.as_bytes().to_vec();
    sealing_key
        .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| VaultError::CryptoFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&in_out);
    Ok(out)
}

/// Decrypt a PAN ciphertext produced by [`encrypt_pan`]. Tag mismatch (or
/// malformed input) surfaces as [`VaultError::CryptoFailed`], which callers
/// must treat as a fatal tamper indicator per spec.md §4.2.
pub fn decrypt_pan(key: &VaultKey, ciphertext: &[u8]) -> Result<String, VaultError> {
    if ciphertext.len() < NONCE_LEN + AES_256_GCM.tag_len() {
        return Err(VaultError::CryptoFailed);
    }

    let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_LEN);
    let unbound =
        UnboundKey::new(&AES_256_GCM, key.as_bytes()).map_err(|_| VaultError::InvalidKeyMaterial)?;
    let opening_key = LessSafeKey::new(unbound);

    let mut nonce_arr = [0u8; NONCE_LEN];
    nonce_arr.copy_from_slice(nonce_bytes);
    let nonce = Nonce::assume_unique_for_key(nonce_arr);

    let mut in_out = sealed.to_vec();
    let plaintext = opening_key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| VaultError::CryptoFailed)?;

    String::from_utf8(plaintext.to_vec()).map_err(|_| VaultError::CryptoFailed)
}

/// Deterministic keyed digest of a canonical PAN, used as the unique dedup
/// key (never the PAN or ciphertext itself — see spec.md §3 invariant 2).
pub fn fingerprint(pepper: &VaultPepper, canonical_pan: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, pepper.as_bytes());
    let tag = hmac::sign(&key, canonical_pan.as_bytes());
    URL_SAFE_NO_PAD.encode(tag.as_ref())
}

/// Generate a fresh token: `tok_` + 43 base64url characters encoding 256
/// random bits.
pub fn generate_token(rng: &SystemRandom) -> Result<String, VaultError> {
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes).map_err(|_| VaultError::CryptoFailed)?;
    Ok(format!("tok_{}", URL_SAFE_NO_PAD.encode(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    fn test_key() -> VaultKey {
        VaultKey::from_base64(&STANDARD.encode([3u8; 32])).unwrap()
    }

    fn test_pepper() -> VaultPepper {
        VaultPepper::from_base64(&STANDARD.encode([5u8; 32])).unwrap()
    }

    #[test]
    fn encrypt_then_decrypt_roundtrips() {
        let key = test_key();
        let rng = SystemRandom::new();
        let ciphertext = encrypt_pan(&key, &rng, "4532015112830366").unwrap();
        let plaintext = decrypt_pan(&key, &ciphertext).unwrap();
        assert_eq!(plaintext, "4532015112830366");
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let key = test_key();
        let rng = SystemRandom::new();
        let mut ciphertext = encrypt_pan(&key, &rng, "4532015112830366").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;
        assert!(matches!(decrypt_pan(&key, &ciphertext), Err(VaultError::CryptoFailed)));
    }

    #[test]
    fn nonce_differs_per_call() {
        let key = test_key();
        let rng = SystemRandom::new();
        let a = encrypt_pan(&key, &rng, "4532015112830366").unwrap();
        let b = encrypt_pan(&key, &rng, "4532015112830366").unwrap();
        assert_ne!(&a[..12], &b[..12]);
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_is_deterministic_and_keyed() {
        let pepper = test_pepper();
        let a = fingerprint(&pepper, "4532015112830366");
        let b = fingerprint(&pepper, "4532015112830366");
        assert_eq!(a, b);

        let other_pepper = VaultPepper::from_base64(&STANDARD.encode([6u8; 32])).unwrap();
        let c = fingerprint(&other_pepper, "4532015112830366");
        assert_ne!(a, c, "fingerprint must depend on the pepper");
    }

    #[test]
    fn generated_token_has_expected_shape() {
        let rng = SystemRandom::new();
        let token = generate_token(&rng).unwrap();
        assert!(token.starts_with("tok_"));
        assert_eq!(token.len(), 4 + 43);
    }
}
