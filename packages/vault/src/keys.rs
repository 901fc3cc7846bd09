//! Key material newtypes. Zeroized on drop; never logged, never serialized.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::VaultError;

/// 256-bit AEAD key used to encrypt PANs at rest.
#[derive(Clone, ZeroizeOnDrop)]
pub struct VaultKey(Vec<u8>);

/// 256-bit HMAC pepper used to compute the deterministic PAN fingerprint.
#[derive(Clone, ZeroizeOnDrop)]
pub struct VaultPepper(Vec<u8>);

impl VaultKey {
    /// Decode a standard-base64-encoded 32-byte key.
    pub fn from_base64(encoded: &str) -> Result<Self, VaultError> {
        let bytes = decode_32_bytes(encoded)?;
        Ok(Self(bytes))
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl VaultPepper {
    pub fn from_base64(encoded: &str) -> Result<Self, VaultError> {
        let bytes = decode_32_bytes(encoded)?;
        Ok(Self(bytes))
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

fn decode_32_bytes(encoded: &str) -> Result<Vec<u8>, VaultError> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    let mut bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|_| VaultError::InvalidKeyMaterial)?;
    if bytes.len() != 32 {
        bytes.zeroize();
        return Err(VaultError::InvalidKeyMaterial);
    }
    Ok(bytes)
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey(REDACTED)")
    }
}

impl std::fmt::Debug for VaultPepper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultPepper(REDACTED)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    #[test]
    fn accepts_32_byte_key() {
        let raw = [7u8; 32];
        let encoded = STANDARD.encode(raw);
        let key = VaultKey::from_base64(&encoded).unwrap();
        assert_eq!(key.as_bytes(), &raw);
    }

    #[test]
    fn rejects_wrong_length() {
        let encoded = STANDARD.encode([1u8; 16]);
        assert!(matches!(
            VaultKey::from_base64(&encoded),
            Err(VaultError::InvalidKeyMaterial)
        ));
    }

    #[test]
    fn debug_never_prints_key_material() {
        let raw = [9u8; 32];
        let key = VaultKey::from_base64(&STANDARD.encode(raw)).unwrap();
        assert_eq!(format!("{key:?}"), "VaultKey(REDACTED)");
    }
}
