//! Vault data model. See spec.md §3.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokenshield_scanner::Brand;

/// A vault entry: the encrypted binding of a PAN to its token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardRecord {
    /// Opaque, globally unique, URL-safe token: `tok_` + 43 base64url chars.
    pub token: String,
    /// AEAD ciphertext of the canonical PAN (nonce + tag bundled in).
    #[serde(with = "serde_bytes_as_base64")]
    pub pan_ciphertext: Vec<u8>,
    /// Deterministic HMAC digest of the canonical PAN; the unique dedup key.
    pub fingerprint: String,
    pub first_six: String,
    pub last_four: String,
    pub brand: Brand,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Revoked entries remain in the store but refuse detokenization.
    pub active: bool,
}

/// Non-sensitive projection of a [`CardRecord`], returned by `Vault::info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardInfo {
    pub brand: Brand,
    pub first_six: String,
    pub last_four: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&CardRecord> for CardInfo {
    fn from(r: &CardRecord) -> Self {
        Self {
            brand: r.brand,
            first_six: r.first_six.clone(),
            last_four: r.last_four.clone(),
            active: r.active,
            created_at: r.created_at,
        }
    }
}

/// Kind of audit event recorded for every tokenize/detokenize/revoke/miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Tokenize,
    Detokenize,
    Revoke,
    Miss,
}

/// Append-only audit row. Written best-effort — see spec.md §3 and §5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEvent {
    pub token: String,
    pub kind: EventKind,
    pub source_addr: Option<String>,
    pub destination_url: Option<String>,
    pub http_status: Option<u16>,
    pub timestamp: DateTime<Utc>,
}

impl TokenEvent {
    pub fn new(token: impl Into<String>, kind: EventKind) -> Self {
        Self {
            token: token.into(),
            kind,
            source_addr: None,
            destination_url: None,
            http_status: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_source_addr(mut self, addr: impl Into<String>) -> Self {
        self.source_addr = Some(addr.into());
        self
    }

    pub fn with_destination_url(mut self, url: impl Into<String>) -> Self {
        self.destination_url = Some(url.into());
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }
}

/// First-six/last-four display split of a canonical PAN, a pure function of
/// the PAN per spec.md §3 invariant 4.
pub fn display_parts(canonical_pan: &str) -> (String, String) {
    let first_six = canonical_pan.chars().take(6).collect();
    let last_four: String = canonical_pan
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    (first_six, last_four)
}

mod serde_bytes_as_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_parts_splits_correctly() {
        let (first_six, last_four) = display_parts("4532015112830366");
        assert_eq!(first_six, "453201");
        assert_eq!(last_four, "0366");
    }
}
