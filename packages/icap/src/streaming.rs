//! Windowed body rewriting for bodies over `ICAP_MAX_BODY` (spec.md §4.4):
//! process the body in fixed-size windows instead of buffering it whole,
//! carrying a short tail into the next window so a PAN or token straddling
//! a window boundary is never split mid-match.

use tokenshield_adapter::{rewrite_bytes_with_context, AdaptContext, AdapterError, Direction};
use tokenshield_vault::Vault;
use tokenshield_vault::VaultStore;

pub const WINDOW_SIZE: usize = 64 * 1024;
/// Target carry-over distance from the end of a window (one token plus a
/// little slack) — the actual split point is the nearest byte at or before
/// this distance that cannot be part of a PAN or token match, so a run of
/// digits or token characters is never cut in two.
pub const CARRY_OVER: usize = 21;

fn is_match_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b' '
}

/// Find the rightmost index `<= target` at which splitting `data` cannot
/// divide a PAN/token run: either the split is at the very start, or the
/// byte immediately before it is not a character that can appear inside a
/// match. Falls back to `0` (carry everything) if no such point exists,
/// which only happens when the window is one unbroken run of digits/letters
/// with no delimiter at all — correctness over memory-boundedness in that
/// pathological case.
fn safe_split_point(data: &[u8], target: usize) -> usize {
    let target = target.min(data.len());
    for i in (0..=target).rev() {
        if i == 0 || !is_match_byte(data[i - 1]) {
            return i;
        }
    }
    0
}

/// Rewrite `body` window by window, reusing [`rewrite_bytes_with_context`]
/// on each finalized slice. Only invoked once the body length exceeds
/// `ICAP_MAX_BODY`; bodies within the configured bound go through the
/// buffered path in `connection.rs` directly.
pub async fn rewrite_windowed<S: VaultStore + 'static>(
    vault: &Vault<S>,
    direction: Direction,
    body: &[u8],
    ctx: &AdaptContext,
) -> Result<(Vec<u8>, bool), AdapterError> {
    let mut out = Vec::with_capacity(body.len());
    let mut changed = false;
    let mut pending: Vec<u8> = Vec::new();
    let mut cursor = 0usize;

    while cursor < body.len() || !pending.is_empty() {
        let chunk_end = (cursor + WINDOW_SIZE).min(body.len());
        let mut combined = std::mem::take(&mut pending);
        combined.extend_from_slice(&body[cursor..chunk_end]);
        cursor = chunk_end;
        let is_last = cursor >= body.len();

        let process_len = if is_last {
            combined.len()
        } else {
            safe_split_point(&combined, combined.len().saturating_sub(CARRY_OVER))
        };

        let (to_process, tail) = combined.split_at(process_len);
        let (rewritten, window_changed) = rewrite_bytes_with_context(vault, direction, to_process, ctx).await?;
        changed |= window_changed;
        out.extend_from_slice(&rewritten);
        pending = tail.to_vec();
    }

    Ok((out, changed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use tokenshield_vault::{InMemoryVaultStore, VaultKey, VaultPepper};

    fn test_vault() -> Vault<InMemoryVaultStore> {
        let store = std::sync::Arc::new(InMemoryVaultStore::new());
        let key = VaultKey::from_base64(&STANDARD.encode([7u8; 32])).unwrap();
        let pepper = VaultPepper::from_base64(&STANDARD.encode([9u8; 32])).unwrap();
        Vault::new(store, key, pepper)
    }

    #[tokio::test]
    async fn small_body_single_window_matches_buffered_path() {
        let vault = test_vault();
        let ctx = AdaptContext::default();
        let body = br#"{"card_number":"4532015112830366"}"#;
        let (windowed, changed) = rewrite_windowed(&vault, Direction::Tokenize, body, &ctx).await.unwrap();
        assert!(changed);
        assert!(!String::from_utf8_lossy(&windowed).contains("4532015112830366"));
    }

    #[tokio::test]
    async fn match_spanning_a_window_boundary_is_still_tokenized() {
        let vault = test_vault();
        let ctx = AdaptContext::default();
        // Quotes give the splitter a safe boundary near the window edge in
        // realistic JSON; padded with digits-adjacent filler to land the PAN
        // across the WINDOW_SIZE cut point.
        let padding = "\"x\":\"".to_string() + &"z".repeat(WINDOW_SIZE - 20) + "\",\"card_number\":\"";
        let body = format!("{{{padding}4532015112830366\"}}").into_bytes();
        let (windowed, changed) = rewrite_windowed(&vault, Direction::Tokenize, &body, &ctx).await.unwrap();
        assert!(changed);
        let text = String::from_utf8_lossy(&windowed);
        assert!(!text.contains("4532015112830366"));
        assert!(text.contains("tok_"));
    }

    #[tokio::test]
    async fn body_with_no_matches_is_byte_identical_across_windows() {
        let vault = test_vault();
        let ctx = AdaptContext::default();
        let body = "y".repeat(WINDOW_SIZE * 2 + 500).into_bytes();
        let (windowed, changed) = rewrite_windowed(&vault, Direction::Tokenize, &body, &ctx).await.unwrap();
        assert!(!changed);
        assert_eq!(windowed, body);
    }

    #[test]
    fn safe_split_finds_delimiter_near_target() {
        let data = b"abc,defghij";
        let point = safe_split_point(data, 9);
        assert_eq!(&data[..point], b"abc,");
    }

    #[test]
    fn safe_split_falls_back_to_zero_with_no_delimiter() {
        let data = b"abcdefghij";
        assert_eq!(safe_split_point(data, 5), 0);
    }
}
