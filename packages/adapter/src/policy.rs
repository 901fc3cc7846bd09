//! Per-request adaptation policy. Carries the direction (tokenize on
//! ingress, detokenize on egress/response) and the operator's bypass list,
//! both sourced from configuration and request metadata per spec.md §4.3.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Tokenize,
    Detokenize,
}

#[derive(Debug, Clone)]
pub struct AdapterPolicy {
    pub direction: Direction,
    /// `IGNORE_CONTENT_TYPES`, checked in addition to the built-in binary
    /// prefixes (spec.md §4.3, §6).
    pub ignore_content_types: Vec<String>,
}

impl AdapterPolicy {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            ignore_content_types: Vec::new(),
        }
    }

    pub fn with_ignore_content_types(mut self, prefixes: Vec<String>) -> Self {
        self.ignore_content_types = prefixes;
        self
    }
}

/// Connection-level context threaded into vault audit events
/// (`TokenEvent::source_addr` / `destination_url` / `http_status`,
/// spec.md §3). Only the ICAP layer has this; plain `Adapter::adapt` calls
/// default it to `None`. `http_status` is populated from the embedded
/// HTTP message's status line when there is one — in practice only on
/// RESPMOD, since a REQMOD's embedded message is a request.
#[derive(Debug, Clone, Default)]
pub struct AdaptContext {
    pub source_addr: Option<String>,
    pub destination_url: Option<String>,
    pub http_status: Option<u16>,
}
