//! Storage boundary. The real backend (a relational `card_records` /
//! `token_events` schema, per spec.md §6) is an external collaborator and
//! out of scope for this crate — only the trait it must satisfy lives here,
//! plus an in-memory implementation used by tests, local runs, and the demo
//! deployment. Grounded on `packages/treasury/src/balance.rs`'s
//! `BalanceLedger` (same `parking_lot::RwLock<HashMap<..>>` discipline).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::error::VaultError;
use crate::types::{CardRecord, TokenEvent};

/// The contract every vault storage backend must satisfy.
#[async_trait]
pub trait VaultStore: Send + Sync {
    /// Insert `record` unless an active record already exists for its
    /// fingerprint, in which case the existing record is returned instead.
    /// Must be atomic with respect to concurrent callers racing on the same
    /// fingerprint (spec.md §3 invariant 2, §4.2 concurrency).
    async fn insert_if_absent(&self, record: CardRecord) -> Result<CardRecord, VaultError>;

    async fn find_by_fingerprint(&self, fingerprint: &str) -> Option<CardRecord>;

    async fn find_by_token(&self, token: &str) -> Option<CardRecord>;

    /// Bump `updated_at` on a re-tokenization hit.
    async fn touch_updated_at(&self, token: &str) -> Result<(), VaultError>;

    /// Flip `active = false`. Idempotent; errors only if the token never
    /// existed.
    async fn revoke(&self, token: &str) -> Result<(), VaultError>;

    /// Append an audit row. Best-effort — failures must not propagate to
    /// the adaptation path (spec.md §7).
    async fn record_event(&self, event: TokenEvent) -> Result<(), VaultError>;
}

/// Default, non-persistent backend: two `RwLock`-guarded maps plus an
/// append-only event log. Satisfies every invariant in spec.md §3 but does
/// not survive a restart.
#[derive(Default)]
pub struct InMemoryVaultStore {
    records_by_token: RwLock<HashMap<String, CardRecord>>,
    token_by_fingerprint: RwLock<HashMap<String, String>>,
    events: RwLock<Vec<TokenEvent>>,
}

impl InMemoryVaultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the audit log, newest last. Test/diagnostic use only.
    pub fn events(&self) -> Vec<TokenEvent> {
        self.events.read().clone()
    }

    pub fn record_count(&self) -> usize {
        self.records_by_token.read().len()
    }
}

#[async_trait]
impl VaultStore for InMemoryVaultStore {
    async fn insert_if_absent(&self, record: CardRecord) -> Result<CardRecord, VaultError> {
        let mut fingerprints = self.token_by_fingerprint.write();
        let mut records = self.records_by_token.write();

        if let Some(existing_token) = fingerprints.get(&record.fingerprint) {
            if let Some(existing) = records.get(existing_token) {
                if existing.active {
                    return Ok(existing.clone());
                }
            }
        }

        fingerprints.insert(record.fingerprint.clone(), record.token.clone());
        records.insert(record.token.clone(), record.clone());
        Ok(record)
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> Option<CardRecord> {
        let fingerprints = self.token_by_fingerprint.read();
        let token = fingerprints.get(fingerprint)?;
        self.records_by_token.read().get(token).cloned()
    }

    async fn find_by_token(&self, token: &str) -> Option<CardRecord> {
        self.records_by_token.read().get(token).cloned()
    }

    async fn touch_updated_at(&self, token: &str) -> Result<(), VaultError> {
        let mut records = self.records_by_token.write();
        let record = records.get_mut(token).ok_or(VaultError::UnknownToken)?;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn revoke(&self, token: &str) -> Result<(), VaultError> {
        let mut records = self.records_by_token.write();
        let record = records.get_mut(token).ok_or(VaultError::UnknownToken)?;
        record.active = false;
        Ok(())
    }

    async fn record_event(&self, event: TokenEvent) -> Result<(), VaultError> {
        self.events.write().push(event);
        Ok(())
    }
}
