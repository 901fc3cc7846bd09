//! Card brand classification from PAN prefix + length, per spec.md §4.1.

use serde::{Deserialize, Serialize};

/// Card network, classified from a canonical (digits-only) PAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Brand {
    Visa,
    Mastercard,
    Amex,
    Discover,
    Unknown,
}

impl Brand {
    /// Classify a canonical, digits-only PAN.
    ///
    /// `4…` (13/16/19) -> visa; `51-55…` (16) -> mastercard; `34/37…` (15)
    /// -> amex; `6011…` or `65…` (16) -> discover; otherwise unknown.
    pub fn classify(digits: &str) -> Self {
        let len = digits.len();
        let starts_with = |p: &str| digits.starts_with(p);

        if starts_with("4") && matches!(len, 13 | 16 | 19) {
            return Brand::Visa;
        }

        if len == 16 {
            if let Some(prefix2) = digits.get(0..2).and_then(|s| s.parse::<u8>().ok()) {
                if (51..=55).contains(&prefix2) {
                    return Brand::Mastercard;
                }
            }
        }

        if len == 15 && (starts_with("34") || starts_with("37")) {
            return Brand::Amex;
        }

        if len == 16 && (starts_with("6011") || starts_with("65")) {
            return Brand::Discover;
        }

        Brand::Unknown
    }
}

impl std::fmt::Display for Brand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Brand::Visa => "visa",
            Brand::Mastercard => "mastercard",
            Brand::Amex => "amex",
            Brand::Discover => "discover",
            Brand::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}
