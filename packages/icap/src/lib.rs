//! ICAP/1.0 REQMOD/RESPMOD service: parses HTTP embedded in ICAP, drives
//! the tokenization [`Adapter`](tokenshield_adapter::Adapter) over each
//! body, and serializes the adapted ICAP response. See spec.md §4.4.

mod config;
mod connection;
mod error;
mod http;
mod metrics;
mod service;
mod streaming;
mod wire;

pub use config::{Config, ConfigError, FailMode};
pub use error::IcapError;
pub use metrics::{ServiceMetrics, ServiceMetricsSnapshot};
pub use service::IcapService;
