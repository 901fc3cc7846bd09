//! Compiled patterns shared across scans.

use once_cell::sync::Lazy;
use regex::bytes::Regex;

/// `tok_` followed by 43 base64url characters (256 bits of random payload).
pub static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"tok_[A-Za-z0-9_-]{43}").expect("token pattern is valid"));
