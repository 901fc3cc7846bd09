//! Adapter error taxonomy. See spec.md §7.

use thiserror::Error;
use tokenshield_vault::VaultError;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("vault operation failed: {0}")]
    Vault(#[from] VaultError),
}
