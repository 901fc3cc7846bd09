//! Atomic request counters plus a rolling-window p99 latency gauge.
//! Grounded directly on `packages/gate/src/observability.rs`'s
//! `MetricsCollector` (same atomics + `parking_lot::Mutex<Vec<u64>>`
//! discipline, same rolling-window cap).
//!
//! `miss_total`, `crypto_failures_total`, `dropped_audit_events`, and
//! `failed_audit_writes` in [`ServiceMetricsSnapshot`] are not tracked
//! here — they're observed by the vault (token lookups, the decrypt path,
//! the audit queue), not the ICAP connection loop, and
//! `IcapService::metrics_snapshot` fills them in from `Vault`'s own
//! counters.

use std::sync::atomic::{AtomicU64, Ordering};

const LATENCY_WINDOW: usize = 10_000;

#[derive(Debug, Default)]
pub struct ServiceMetrics {
    requests_total: AtomicU64,
    tokenize_total: AtomicU64,
    detokenize_total: AtomicU64,
    latencies_us: parking_lot::Mutex<Vec<u64>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceMetricsSnapshot {
    pub requests_total: u64,
    pub tokenize_total: u64,
    pub detokenize_total: u64,
    pub miss_total: u64,
    pub crypto_failures_total: u64,
    pub dropped_audit_events: u64,
    pub failed_audit_writes: u64,
    pub p99_latency_us: u64,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, latency_us: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let mut latencies = self.latencies_us.lock();
        latencies.push(latency_us);
        if latencies.len() > LATENCY_WINDOW {
            latencies.remove(0);
        }
    }

    pub fn record_tokenize(&self) {
        self.tokenize_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detokenize(&self) {
        self.detokenize_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServiceMetricsSnapshot {
        let latencies = self.latencies_us.lock();
        let p99 = if latencies.is_empty() {
            0
        } else {
            let mut sorted = latencies.clone();
            sorted.sort_unstable();
            let idx = ((sorted.len() as f64) * 0.99) as usize;
            sorted[idx.min(sorted.len() - 1)]
        };

        ServiceMetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            tokenize_total: self.tokenize_total.load(Ordering::Relaxed),
            detokenize_total: self.detokenize_total.load(Ordering::Relaxed),
            p99_latency_us: p99,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p99_of_empty_window_is_zero() {
        let metrics = ServiceMetrics::new();
        assert_eq!(metrics.snapshot().p99_latency_us, 0);
    }

    #[test]
    fn counters_increment_independently() {
        let metrics = ServiceMetrics::new();
        metrics.record_tokenize();
        metrics.record_tokenize();
        metrics.record_detokenize();
        let snap = metrics.snapshot();
        assert_eq!(snap.tokenize_total, 2);
        assert_eq!(snap.detokenize_total, 1);
    }
}
