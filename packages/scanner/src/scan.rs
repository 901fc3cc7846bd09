//! Core scanning algorithm: locate non-overlapping PAN/token candidates in a
//! byte buffer. See spec.md §4.1.

use crate::luhn;
use crate::pattern::TOKEN_PATTERN;

/// What kind of thing a [`ScanMatch`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// A Luhn-valid primary account number.
    Pan,
    /// A `tok_…` token.
    Token,
}

/// A single located match in a scanned buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanMatch {
    /// Byte offset of the match start in the scanned buffer.
    pub offset: usize,
    /// Byte length of the match in the scanned buffer (as it appeared,
    /// including any separators for a PAN).
    pub length: usize,
    pub kind: MatchKind,
    /// For a PAN: the digits-only canonical form. For a token: the token
    /// string itself.
    pub canonical: String,
}

impl ScanMatch {
    fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// Stateless scanner for PANs and tokens over raw byte buffers.
#[derive(Debug, Default, Clone, Copy)]
pub struct CardScanner;

impl CardScanner {
    pub fn new() -> Self {
        Self
    }

    /// Scan `buf` and return non-overlapping matches in left-to-right order.
    ///
    /// On overlap between candidates, the earliest start wins; on equal
    /// start, the longer match wins. This naturally gives tokens precedence
    /// over PAN candidates that start inside a token's body, since a token
    /// match always starts at or before any digit run nested within it.
    pub fn scan(&self, buf: &[u8]) -> Vec<ScanMatch> {
        let mut candidates = self.token_candidates(buf);
        candidates.extend(self.pan_candidates(buf));

        // Earliest start first; for a tied start prefer the longer match so
        // the greedy sweep below picks it over a shorter competitor.
        candidates.sort_by(|a, b| a.offset.cmp(&b.offset).then(b.length.cmp(&a.length)));

        let mut accepted = Vec::new();
        let mut next_allowed = 0usize;
        for candidate in candidates {
            if candidate.offset < next_allowed {
                continue;
            }
            next_allowed = candidate.end();
            accepted.push(candidate);
        }
        accepted
    }

    fn token_candidates(&self, buf: &[u8]) -> Vec<ScanMatch> {
        TOKEN_PATTERN
            .find_iter(buf)
            .map(|m| ScanMatch {
                offset: m.start(),
                length: m.end() - m.start(),
                kind: MatchKind::Token,
                canonical: String::from_utf8_lossy(m.as_bytes()).into_owned(),
            })
            .collect()
    }

    /// Maximal digit runs allowing at most one separator (space or hyphen)
    /// between adjacent digits, accepted when the digit-only length is in
    /// [13, 19] and the Luhn checksum passes.
    fn pan_candidates(&self, buf: &[u8]) -> Vec<ScanMatch> {
        let mut out = Vec::new();
        let mut i = 0usize;

        while i < buf.len() {
            if !buf[i].is_ascii_digit() {
                i += 1;
                continue;
            }

            let start = i;
            let mut digits = String::new();
            let mut cursor = i;
            let mut last_was_separator = false;

            while cursor < buf.len() {
                let b = buf[cursor];
                if b.is_ascii_digit() {
                    digits.push(b as char);
                    cursor += 1;
                    last_was_separator = false;
                } else if (b == b' ' || b == b'-') && !last_was_separator {
                    // Only consume the separator if another digit follows.
                    if cursor + 1 < buf.len() && buf[cursor + 1].is_ascii_digit() {
                        cursor += 1;
                        last_was_separator = true;
                    } else {
                        break;
                    }
                } else {
                    break;
                }
            }

            let end = if last_was_separator { cursor - 1 } else { cursor };

            if digits.len() >= 13 && digits.len() <= 19 && luhn::is_valid(&digits) {
                out.push(ScanMatch {
                    offset: start,
                    length: end - start,
                    kind: MatchKind::Pan,
                    canonical: digits,
                });
            }

            i = cursor.max(start + 1);
        }

        out
    }
}
