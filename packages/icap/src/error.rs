//! Service-level error taxonomy. See spec.md §7 — `MalformedICAP` and
//! `Timeout` are raised directly by this crate; vault/adapter failures are
//! wrapped so the connection handler can map every outcome to one ICAP
//! status code.

use thiserror::Error;
use tokenshield_adapter::AdapterError;

#[derive(Debug, Error)]
pub enum IcapError {
    #[error("malformed ICAP request: {0}")]
    MalformedIcap(String),

    #[error("request exceeded its deadline")]
    Timeout,

    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
