//! Vault error taxonomy. See spec.md §7 — these never carry plaintext PANs
//! or token values in their `Display` output.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("PAN failed Luhn validation")]
    InvalidPan,

    #[error("token not found or inactive")]
    UnknownToken,

    #[error("authentication tag verification failed")]
    CryptoFailed,

    #[error("storage backend unavailable after retry")]
    StorageFailed,

    #[error("key or pepper material is malformed")]
    InvalidKeyMaterial,
}
