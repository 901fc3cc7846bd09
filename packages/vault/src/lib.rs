//! Encrypted PAN/token vault: idempotent tokenization, detokenization,
//! revocation, and a pluggable storage backend. See spec.md §3.

mod audit;
mod crypto;
mod error;
mod keys;
mod store;
mod types;
mod vault;

pub use error::VaultError;
pub use keys::{VaultKey, VaultPepper};
pub use store::{InMemoryVaultStore, VaultStore};
pub use types::{display_parts, CardInfo, CardRecord, EventKind, TokenEvent};
pub use vault::Vault;
