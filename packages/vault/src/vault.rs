//! The `Vault` façade: tokenize / detokenize / revoke / info, each wrapping
//! a storage call in the bounded-retry policy from spec.md §4.2 (up to 3
//! attempts, exponential backoff from a 50ms base) and an audit event.
//!
//! Audit writes go through a bounded queue drained by a single background
//! task, per spec.md §5's "multi-producer, single-consumer queue; dropping
//! oldest on overflow with a dropped-events counter" (see [`crate::audit`]).
//! A write failure at the storage backend is a distinct, separately
//! counted failure mode (spec.md §3/§7: "failure to log does not abort
//! adaptation but is surfaced as a metric").

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ring::rand::SystemRandom;
use tokenshield_scanner::{luhn, Brand};

use crate::audit::AuditQueue;
use crate::crypto::{decrypt_pan, encrypt_pan, fingerprint, generate_token};
use crate::error::VaultError;
use crate::keys::{VaultKey, VaultPepper};
use crate::store::VaultStore;
use crate::types::{display_parts, CardInfo, CardRecord, EventKind, TokenEvent};

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY: Duration = Duration::from_millis(50);
const AUDIT_QUEUE_CAPACITY: usize = 1024;

/// Retry a storage operation up to [`MAX_ATTEMPTS`] times with exponential
/// backoff, but only when it reports [`VaultError::StorageFailed`] — every
/// other error is a permanent rejection and surfaces immediately.
async fn with_retry<T, F, Fut>(mut op: F) -> Result<T, VaultError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VaultError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(VaultError::StorageFailed) if attempt + 1 < MAX_ATTEMPTS => {
                tokio::time::sleep(BASE_DELAY * 2u32.pow(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Strip everything but ASCII digits, the canonical PAN form used for
/// hashing, encryption, and Luhn validation throughout this crate.
fn canonicalize(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn event_with_context(
    mut event: TokenEvent,
    source_addr: Option<String>,
    destination_url: Option<String>,
    http_status: Option<u16>,
) -> TokenEvent {
    if let Some(addr) = source_addr {
        event = event.with_source_addr(addr);
    }
    if let Some(url) = destination_url {
        event = event.with_destination_url(url);
    }
    if let Some(status) = http_status {
        event = event.with_http_status(status);
    }
    event
}

pub struct Vault<S: VaultStore> {
    store: Arc<S>,
    key: VaultKey,
    pepper: VaultPepper,
    rng: SystemRandom,
    audit_queue: Arc<AuditQueue>,
    failed_audit_writes: Arc<AtomicU64>,
    crypto_failures: AtomicU64,
    miss_count: AtomicU64,
}

impl<S: VaultStore + 'static> Vault<S> {
    /// Spawns the single background task that drains the audit queue into
    /// `store.record_event`. Must be called from within a Tokio runtime.
    pub fn new(store: Arc<S>, key: VaultKey, pepper: VaultPepper) -> Self {
        let audit_queue = Arc::new(AuditQueue::new(AUDIT_QUEUE_CAPACITY));
        let failed_audit_writes = Arc::new(AtomicU64::new(0));

        let consumer_store = Arc::clone(&store);
        let consumer_queue = Arc::clone(&audit_queue);
        let consumer_failed = Arc::clone(&failed_audit_writes);
        tokio::spawn(async move {
            loop {
                let event = consumer_queue.pop().await;
                // Best-effort per spec.md §7: a write failure here must
                // never propagate back to the adaptation path — but it is
                // surfaced as a metric per spec.md §3, not swallowed.
                if consumer_store.record_event(event).await.is_err() {
                    consumer_failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        Self {
            store,
            key,
            pepper,
            rng: SystemRandom::new(),
            audit_queue,
            failed_audit_writes,
            crypto_failures: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
        }
    }

    /// Count of audit events evicted because the queue was full.
    pub fn dropped_audit_events(&self) -> u64 {
        self.audit_queue.dropped()
    }

    /// Count of audit events dequeued but never persisted because
    /// `VaultStore::record_event` returned an error.
    pub fn failed_audit_writes(&self) -> u64 {
        self.failed_audit_writes.load(Ordering::Relaxed)
    }

    /// Count of detokenize calls that failed AEAD tag verification — the
    /// tamper-detection counter behind spec.md §7's `CryptoFailed`
    /// disposition.
    pub fn crypto_failures(&self) -> u64 {
        self.crypto_failures.load(Ordering::Relaxed)
    }

    /// Count of detokenize calls against an unknown or revoked token.
    pub fn miss_count(&self) -> u64 {
        self.miss_count.load(Ordering::Relaxed)
    }

    /// Tokenize `raw_pan`, returning the existing record if this PAN has
    /// already been tokenized (spec.md §3 invariant 2: idempotent).
    pub async fn tokenize(&self, raw_pan: &str) -> Result<CardRecord, VaultError> {
        self.tokenize_with_context(raw_pan, None, None, None).await
    }

    /// Same as [`tokenize`](Self::tokenize), but attaches `source_addr`,
    /// `destination_url`, and `http_status` to the resulting audit event
    /// (spec.md §3 `TokenEvent`) — the ICAP layer is the only caller that
    /// has this connection-level context.
    pub async fn tokenize_with_context(
        &self,
        raw_pan: &str,
        source_addr: Option<String>,
        destination_url: Option<String>,
        http_status: Option<u16>,
    ) -> Result<CardRecord, VaultError> {
        let canonical = canonicalize(raw_pan);
        if canonical.len() < 13 || canonical.len() > 19 || !luhn::is_valid(&canonical) {
            return Err(VaultError::InvalidPan);
        }

        let fp = fingerprint(&self.pepper, &canonical);

        if let Some(existing) = self.store.find_by_fingerprint(&fp).await {
            if existing.active {
                with_retry(|| self.store.touch_updated_at(&existing.token)).await?;
                self.audit(event_with_context(
                    TokenEvent::new(&existing.token, EventKind::Tokenize),
                    source_addr,
                    destination_url,
                    http_status,
                ));
                return Ok(existing);
            }
        }

        let ciphertext = encrypt_pan(&self.key, &self.rng, &canonical)?;
        let token = generate_token(&self.rng)?;
        let (first_six, last_four) = display_parts(&canonical);
        let brand = Brand::classify(&canonical);
        let now = chrono::Utc::now();

        let record = CardRecord {
            token: token.clone(),
            pan_ciphertext: ciphertext,
            fingerprint: fp,
            first_six,
            last_four,
            brand,
            created_at: now,
            updated_at: now,
            active: true,
        };

        let stored = with_retry(|| self.store.insert_if_absent(record.clone())).await?;
        self.audit(event_with_context(
            TokenEvent::new(&stored.token, EventKind::Tokenize),
            source_addr,
            destination_url,
            http_status,
        ));
        Ok(stored)
    }

    /// Recover the plaintext PAN behind `token`. Inactive or unknown tokens
    /// are indistinguishable to the caller — both are `UnknownToken`.
    pub async fn detokenize(&self, token: &str) -> Result<String, VaultError> {
        self.detokenize_with_context(token, None, None, None).await
    }

    /// Same as [`detokenize`](Self::detokenize), but attaches
    /// `source_addr`, `destination_url`, and `http_status` to the
    /// resulting audit event — `http_status` is typically only available
    /// on a RESPMOD call, where the embedded message is itself an HTTP
    /// response.
    pub async fn detokenize_with_context(
        &self,
        token: &str,
        source_addr: Option<String>,
        destination_url: Option<String>,
        http_status: Option<u16>,
    ) -> Result<String, VaultError> {
        let record = self.store.find_by_token(token).await;
        match record {
            Some(record) if record.active => {
                let plaintext = decrypt_pan(&self.key, &record.pan_ciphertext).map_err(|err| {
                    self.crypto_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(token = %token, "AEAD tag verification failed, treating as tamper");
                    err
                })?;
                self.audit(event_with_context(
                    TokenEvent::new(token, EventKind::Detokenize),
                    source_addr,
                    destination_url,
                    http_status,
                ));
                Ok(plaintext)
            }
            _ => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                self.audit(event_with_context(
                    TokenEvent::new(token, EventKind::Miss),
                    source_addr,
                    destination_url,
                    http_status,
                ));
                Err(VaultError::UnknownToken)
            }
        }
    }

    /// Permanently disable a token. Idempotent at the store layer; repeated
    /// calls against an already-revoked token still succeed.
    pub async fn revoke(&self, token: &str) -> Result<(), VaultError> {
        with_retry(|| self.store.revoke(token)).await?;
        self.audit(TokenEvent::new(token, EventKind::Revoke));
        Ok(())
    }

    /// Non-sensitive metadata lookup — never touches the PAN ciphertext.
    pub async fn info(&self, token: &str) -> Result<CardInfo, VaultError> {
        self.store
            .find_by_token(token)
            .await
            .as_ref()
            .map(CardInfo::from)
            .ok_or(VaultError::UnknownToken)
    }

    fn audit(&self, event: TokenEvent) {
        self.audit_queue.push(event);
    }
}
