//! Environment-driven configuration. Grounded in
//! `packages/runtime/src/config.rs`'s `Default` + env-override pattern, but
//! validating rather than silently defaulting where spec.md §6 requires a
//! value (`VAULT_KEY`, `VAULT_PEPPER`) — a missing or malformed required
//! value is a startup-time configuration error (exit code 64), not a
//! silently-applied default.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokenshield_vault::{VaultKey, VaultPepper};

const DEFAULT_BIND: &str = "0.0.0.0:1344";
const DEFAULT_MAX_BODY: usize = 1024 * 1024;
const DEFAULT_DEADLINE_MS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    /// Reject the message (ICAP `500`) when the vault is unavailable.
    Closed,
    /// Pass the message through unchanged, logging the miss.
    Open,
}

pub struct Config {
    pub bind: SocketAddr,
    pub max_body: usize,
    pub deadline: Duration,
    /// Accepted and parsed for forward compatibility with a relational
    /// `VaultStore`; the in-process default backend ignores it (§6).
    pub vault_url: Option<String>,
    pub vault_key: VaultKey,
    pub vault_pepper: VaultPepper,
    pub fail_mode: FailMode,
    pub ignore_content_types: Vec<String>,
    /// Destination host/URL prefixes treated as egress on the `/reqmod`
    /// path (spec.md §9's second Open Question: REQMOD direction is
    /// inferred from the destination, and that mapping "must be made
    /// explicit in configuration" — this is that configuration). A REQMOD
    /// whose embedded request targets a host matching one of these entries
    /// runs the Adapter in `Detokenize` mode; anything else defaults to
    /// `Tokenize` (ingress).
    pub egress_destinations: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind = parse_env_or("ICAP_BIND", DEFAULT_BIND, "ICAP_BIND")?;
        let max_body = parse_env_or("ICAP_MAX_BODY", &DEFAULT_MAX_BODY.to_string(), "ICAP_MAX_BODY")?;
        let deadline_ms: u64 =
            parse_env_or("ICAP_DEADLINE_MS", &DEFAULT_DEADLINE_MS.to_string(), "ICAP_DEADLINE_MS")?;

        let vault_url = env::var("VAULT_URL").ok();

        let vault_key_raw = env::var("VAULT_KEY").map_err(|_| ConfigError::Missing("VAULT_KEY"))?;
        let vault_key = VaultKey::from_base64(&vault_key_raw).map_err(|e| ConfigError::Invalid {
            name: "VAULT_KEY",
            reason: e.to_string(),
        })?;

        let vault_pepper_raw = env::var("VAULT_PEPPER").map_err(|_| ConfigError::Missing("VAULT_PEPPER"))?;
        let vault_pepper = VaultPepper::from_base64(&vault_pepper_raw).map_err(|e| ConfigError::Invalid {
            name: "VAULT_PEPPER",
            reason: e.to_string(),
        })?;

        let fail_mode = match env::var("FAIL_MODE").as_deref() {
            Ok("open") => FailMode::Open,
            Ok("closed") | Err(_) => FailMode::Closed,
            Ok(other) => {
                return Err(ConfigError::Invalid {
                    name: "FAIL_MODE",
                    reason: format!("expected \"open\" or \"closed\", got {other:?}"),
                })
            }
        };

        let ignore_content_types = env::var("IGNORE_CONTENT_TYPES")
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        let egress_destinations = env::var("EGRESS_DESTINATIONS")
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        if vault_url.is_none() {
            tracing::warn!("VAULT_URL not set; running with the non-persistent in-memory vault store");
        } else {
            tracing::warn!("VAULT_URL is configured but ignored: no relational VaultStore ships in this crate");
        }

        Ok(Self {
            bind,
            max_body,
            deadline: Duration::from_millis(deadline_ms),
            vault_url,
            vault_key,
            vault_pepper,
            fail_mode,
            ignore_content_types,
            egress_destinations,
        })
    }

    /// True if `destination` (a `Host` header value or request URI) matches
    /// a configured egress entry, by prefix. Empty by default: with no
    /// `EGRESS_DESTINATIONS` configured, every REQMOD is treated as
    /// ingress (tokenize), matching this crate's conservative default.
    pub fn is_egress_destination(&self, destination: &str) -> bool {
        let destination = destination.to_ascii_lowercase();
        self.egress_destinations
            .iter()
            .any(|entry| destination.starts_with(&entry.to_ascii_lowercase()))
    }
}

fn parse_env_or<T>(var: &str, default: &str, name: &'static str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    let raw = env::var(var).unwrap_or_else(|_| default.to_string());
    raw.parse().map_err(|_| ConfigError::Invalid {
        name,
        reason: format!("could not parse {raw:?}"),
    })
}
