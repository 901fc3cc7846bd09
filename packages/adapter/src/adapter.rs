//! Body-rewrite algorithm. See spec.md §4.3. Grounded in the teacher's
//! `ProtocolAdapter` shape (`packages/nexus/src/protocols/nlip.rs`) but
//! concrete rather than multi-protocol, since this crate only ever adapts
//! HTTP bodies.

use std::sync::Arc;

use tokenshield_scanner::{luhn, CardScanner, MatchKind};
use tokenshield_vault::{Vault, VaultError, VaultStore};

use crate::content_kind::ContentKind;
use crate::error::AdapterError;
use crate::policy::{AdaptContext, AdapterPolicy, Direction};

const JSON_SAFETY_NET_KEYS: &[&str] = &["card_number", "cardNumber", "pan", "creditCard"];

/// Result of one body adaptation pass.
#[derive(Debug, Clone)]
pub struct AdaptedBody {
    pub body: Vec<u8>,
    /// Whether `body` differs from the input. The ICAP layer maps this to
    /// `204 No Content` (false) or `200 OK` with a rewritten body (true).
    pub changed: bool,
}

/// Single walk over `body` using [`CardScanner`], substituting each match
/// per `direction` and leaving unresolved or out-of-direction matches
/// verbatim. Attaches `ctx` to every vault call so the resulting audit
/// events carry the connection's source address, destination URL, and HTTP
/// status (spec.md §3 `TokenEvent`). Factored out of [`Adapter`] so the
/// ICAP layer's streaming window mode (for bodies exceeding the buffered
/// maximum) can reuse the exact same splice logic per window.
pub async fn rewrite_bytes_with_context<S: VaultStore + 'static>(
    vault: &Vault<S>,
    direction: Direction,
    body: &[u8],
    ctx: &AdaptContext,
) -> Result<(Vec<u8>, bool), AdapterError> {
    let scanner = CardScanner::new();
    let matches = scanner.scan(body);
    if matches.is_empty() {
        return Ok((body.to_vec(), false));
    }

    let mut out = Vec::with_capacity(body.len());
    let mut cursor = 0usize;
    let mut changed = false;

    for m in matches {
        out.extend_from_slice(&body[cursor..m.offset]);
        let original_span = &body[m.offset..m.offset + m.length];

        match (direction, m.kind) {
            (Direction::Tokenize, MatchKind::Pan) => match vault
                .tokenize_with_context(
                    &m.canonical,
                    ctx.source_addr.clone(),
                    ctx.destination_url.clone(),
                    ctx.http_status,
                )
                .await
            {
                Ok(record) => {
                    out.extend_from_slice(record.token.as_bytes());
                    changed = true;
                }
                Err(VaultError::InvalidPan) => out.extend_from_slice(original_span),
                Err(VaultError::StorageFailed) => {
                    return Err(AdapterError::Vault(VaultError::StorageFailed))
                }
                Err(other) => return Err(AdapterError::Vault(other)),
            },
            (Direction::Detokenize, MatchKind::Token) => match vault
                .detokenize_with_context(
                    &m.canonical,
                    ctx.source_addr.clone(),
                    ctx.destination_url.clone(),
                    ctx.http_status,
                )
                .await
            {
                Ok(pan) => {
                    out.extend_from_slice(pan.as_bytes());
                    changed = true;
                }
                Err(VaultError::UnknownToken) => out.extend_from_slice(original_span),
                Err(VaultError::CryptoFailed) => {
                    // Vault already logged this at error level; here it's
                    // just a verbatim-passthrough decision.
                    out.extend_from_slice(original_span);
                }
                Err(VaultError::StorageFailed) => {
                    return Err(AdapterError::Vault(VaultError::StorageFailed))
                }
                Err(other) => return Err(AdapterError::Vault(other)),
            },
            // A token seen while tokenizing, or a raw PAN seen while
            // detokenizing, is out of scope for this pass — left as-is.
            _ => out.extend_from_slice(original_span),
        }

        cursor = m.offset + m.length;
    }

    out.extend_from_slice(&body[cursor..]);
    Ok((out, changed))
}

pub struct Adapter<S: VaultStore> {
    vault: Arc<Vault<S>>,
    policy: AdapterPolicy,
}

impl<S: VaultStore + 'static> Adapter<S> {
    pub fn new(vault: Arc<Vault<S>>, policy: AdapterPolicy) -> Self {
        Self { vault, policy }
    }

    /// Transform a single HTTP message body per the configured direction.
    /// `content_type` is the body's `Content-Type` header value, if present.
    pub async fn adapt(&self, body: &[u8], content_type: Option<&str>) -> Result<AdaptedBody, AdapterError> {
        self.adapt_with_context(body, content_type, &AdaptContext::default()).await
    }

    /// Same as [`adapt`](Self::adapt), but attaches `ctx` (the ICAP
    /// connection's source address and destination URL) to every audit
    /// event emitted while processing this body.
    pub async fn adapt_with_context(
        &self,
        body: &[u8],
        content_type: Option<&str>,
        ctx: &AdaptContext,
    ) -> Result<AdaptedBody, AdapterError> {
        let kind = ContentKind::classify(
            content_type.unwrap_or(""),
            &self.policy.ignore_content_types,
        );

        if kind == ContentKind::Binary {
            return Ok(AdaptedBody { body: body.to_vec(), changed: false });
        }

        let (mut rewritten, mut changed) = self.rewrite_raw(body, ctx).await?;

        if kind == ContentKind::Json {
            if let Some(after_safety_net) = self.apply_json_safety_net(&rewritten, ctx).await? {
                rewritten = after_safety_net;
                changed = true;
            }
        }

        Ok(AdaptedBody { body: rewritten, changed })
    }

    /// Single walk over the body using [`CardScanner`]; unchanged byte
    /// ranges pass through verbatim, matches are substituted or left as-is
    /// depending on the vault's response.
    async fn rewrite_raw(&self, body: &[u8], ctx: &AdaptContext) -> Result<(Vec<u8>, bool), AdapterError> {
        rewrite_bytes_with_context(&self.vault, self.policy.direction, body, ctx).await
    }

    /// Redundant safety net over four well-known top-level JSON key names
    /// (spec.md §4.3). In practice the raw-byte pass above already catches
    /// these since it operates on the whole buffer; this only fires if a
    /// match's exact key/value framing survived the first pass untouched.
    async fn apply_json_safety_net(&self, body: &[u8], ctx: &AdaptContext) -> Result<Option<Vec<u8>>, AdapterError> {
        let Ok(text) = std::str::from_utf8(body) else {
            return Ok(None);
        };
        let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(text) else {
            return Ok(None);
        };

        let mut patched = text.to_string();
        let mut changed = false;

        for key in JSON_SAFETY_NET_KEYS {
            let Some(serde_json::Value::String(value)) = map.get(*key) else {
                continue;
            };

            let replacement = match self.policy.direction {
                Direction::Tokenize if is_raw_pan(value) => {
                    match self
                        .vault
                        .tokenize_with_context(
                            value,
                            ctx.source_addr.clone(),
                            ctx.destination_url.clone(),
                            ctx.http_status,
                        )
                        .await
                    {
                        Ok(record) => Some(record.token),
                        Err(VaultError::InvalidPan) => None,
                        Err(VaultError::StorageFailed) => {
                            return Err(AdapterError::Vault(VaultError::StorageFailed))
                        }
                        Err(other) => return Err(AdapterError::Vault(other)),
                    }
                }
                Direction::Detokenize if looks_like_token(value) => {
                    match self
                        .vault
                        .detokenize_with_context(
                            value,
                            ctx.source_addr.clone(),
                            ctx.destination_url.clone(),
                            ctx.http_status,
                        )
                        .await
                    {
                        Ok(pan) => Some(pan),
                        Err(VaultError::UnknownToken) | Err(VaultError::CryptoFailed) => None,
                        Err(VaultError::StorageFailed) => {
                            return Err(AdapterError::Vault(VaultError::StorageFailed))
                        }
                        Err(other) => return Err(AdapterError::Vault(other)),
                    }
                }
                _ => None,
            };

            if let Some(new_value) = replacement {
                let needle = format!("\"{key}\":\"{value}\"");
                let replacement = format!("\"{key}\":\"{new_value}\"");
                if let Some(pos) = patched.find(&needle) {
                    patched.replace_range(pos..pos + needle.len(), &replacement);
                    changed = true;
                }
            }
        }

        Ok(changed.then(|| patched.into_bytes()))
    }
}

fn is_raw_pan(value: &str) -> bool {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    let non_digits_are_separators = value.chars().all(|c| c.is_ascii_digit() || c == ' ' || c == '-');
    non_digits_are_separators
        && (13..=19).contains(&digits.len())
        && luhn::is_valid(&digits)
}

fn looks_like_token(value: &str) -> bool {
    value.len() == 47
        && value.starts_with("tok_")
        && value[4..]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use tokenshield_vault::{InMemoryVaultStore, VaultKey, VaultPepper};

    fn test_vault() -> Arc<Vault<InMemoryVaultStore>> {
        let store = Arc::new(InMemoryVaultStore::new());
        let key = VaultKey::from_base64(&STANDARD.encode([3u8; 32])).unwrap();
        let pepper = VaultPepper::from_base64(&STANDARD.encode([5u8; 32])).unwrap();
        Arc::new(Vault::new(store, key, pepper))
    }

    #[tokio::test]
    async fn tokenizes_pan_in_json_body() {
        let vault = test_vault();
        let adapter = Adapter::new(vault, AdapterPolicy::new(Direction::Tokenize));
        let body = br#"{"card_number":"4532015112830366","amount":"99.99"}"#;
        let result = adapter.adapt(body, Some("application/json")).await.unwrap();
        assert!(result.changed);
        let text = String::from_utf8(result.body).unwrap();
        assert!(text.contains("\"amount\":\"99.99\""));
        assert!(!text.contains("4532015112830366"));
        assert!(text.contains("\"card_number\":\"tok_"));
    }

    #[tokio::test]
    async fn detokenizes_on_egress() {
        let vault = test_vault();
        let record = vault.tokenize("4532015112830366").await.unwrap();

        let adapter = Adapter::new(Arc::clone(&vault), AdapterPolicy::new(Direction::Detokenize));
        let body = format!(r#"{{"card_number":"{}","amount":"99.99"}}"#, record.token);
        let result = adapter.adapt(body.as_bytes(), Some("application/json")).await.unwrap();
        assert!(result.changed);
        let text = String::from_utf8(result.body).unwrap();
        assert!(text.contains("4532015112830366"));
    }

    #[tokio::test]
    async fn unknown_token_passes_through_unchanged() {
        let vault = test_vault();
        let adapter = Adapter::new(vault, AdapterPolicy::new(Direction::Detokenize));
        let token = format!("tok_{}", "A".repeat(43));
        let body = format!(r#"{{"note":"{token}"}}"#);
        let result = adapter.adapt(body.as_bytes(), Some("application/json")).await.unwrap();
        assert!(!result.changed);
        assert_eq!(String::from_utf8(result.body).unwrap(), body);
    }

    #[tokio::test]
    async fn non_luhn_digit_run_is_left_unchanged() {
        let vault = test_vault();
        let adapter = Adapter::new(vault, AdapterPolicy::new(Direction::Tokenize));
        let body = br#"{"card_number":"4532015112830367"}"#;
        let result = adapter.adapt(body, Some("application/json")).await.unwrap();
        assert!(!result.changed);
    }

    #[tokio::test]
    async fn binary_content_type_bypasses_scanning() {
        let vault = test_vault();
        let adapter = Adapter::new(vault, AdapterPolicy::new(Direction::Tokenize));
        let body = b"4532015112830366 embedded in a fake png";
        let result = adapter.adapt(body, Some("image/png")).await.unwrap();
        assert!(!result.changed);
        assert_eq!(result.body, body);
    }

    #[tokio::test]
    async fn body_with_no_pans_or_tokens_is_byte_identical() {
        let vault = test_vault();
        let adapter = Adapter::new(vault, AdapterPolicy::new(Direction::Tokenize));
        let body = br#"{"amount":"99.99","currency":"usd"}"#;
        let result = adapter.adapt(body, Some("application/json")).await.unwrap();
        assert!(!result.changed);
        assert_eq!(result.body, body);
    }

    #[tokio::test]
    async fn form_urlencoded_falls_back_to_raw_scan() {
        let vault = test_vault();
        let adapter = Adapter::new(vault, AdapterPolicy::new(Direction::Tokenize));
        let body = b"card_number=4532015112830366&amount=99.99";
        let result = adapter
            .adapt(body, Some("application/x-www-form-urlencoded"))
            .await
            .unwrap();
        assert!(result.changed);
        let text = String::from_utf8(result.body).unwrap();
        assert!(text.contains("tok_"));
    }
}
