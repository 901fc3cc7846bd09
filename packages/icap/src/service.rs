//! TCP accept loop. Grounded in the teacher's `packages/treasury/src/bin/server.rs`
//! (`TcpListener::bind` then serve), generalized from a one-shot
//! `axum::serve` call to a manual `accept()` + `tokio::spawn` loop, since
//! ICAP is a raw line/chunk protocol rather than HTTP that `axum` can route.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use tokenshield_vault::{Vault, VaultStore};

use crate::config::Config;
use crate::connection::handle_connection;
use crate::error::IcapError;
use crate::metrics::ServiceMetrics;

pub struct IcapService<S: VaultStore> {
    vault: Arc<Vault<S>>,
    config: Arc<Config>,
    metrics: Arc<ServiceMetrics>,
}

impl<S: VaultStore + 'static> IcapService<S> {
    pub fn new(vault: Arc<Vault<S>>, config: Arc<Config>) -> Self {
        Self {
            vault,
            config,
            metrics: Arc::new(ServiceMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<ServiceMetrics> {
        Arc::clone(&self.metrics)
    }

    /// A metrics snapshot with the vault-owned counters filled in —
    /// `dropped_audit_events`, `crypto_failures_total`, and `miss_total` all
    /// live on `Vault`, not `ServiceMetrics`, since it's the vault (the
    /// audit queue, the decrypt path, the token lookup) that observes
    /// these events, not the ICAP layer.
    pub fn metrics_snapshot(&self) -> crate::metrics::ServiceMetricsSnapshot {
        let mut snapshot = self.metrics.snapshot();
        snapshot.dropped_audit_events = self.vault.dropped_audit_events();
        snapshot.failed_audit_writes = self.vault.failed_audit_writes();
        snapshot.crypto_failures_total = self.vault.crypto_failures();
        snapshot.miss_total = self.vault.miss_count();
        snapshot
    }

    /// Bind and serve forever, spawning one task per accepted connection.
    /// Returns only on a listener-level I/O error.
    pub async fn run(&self) -> Result<(), IcapError> {
        let listener = TcpListener::bind(self.config.bind).await?;
        self.serve(listener).await
    }

    /// Bind without serving, returning the listener and its actual local
    /// address — used by tests that bind to `127.0.0.1:0` and need to know
    /// which port the OS picked before connecting a client.
    pub async fn bind(&self) -> Result<(TcpListener, SocketAddr), IcapError> {
        let listener = TcpListener::bind(self.config.bind).await?;
        let addr = listener.local_addr()?;
        Ok((listener, addr))
    }

    /// Accept loop over an already-bound listener, spawning one task per
    /// connection. Returns only on a listener-level I/O error.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), IcapError> {
        tracing::info!(bind = %listener.local_addr()?, "ICAP service listening");

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            tracing::debug!(%peer_addr, "accepted connection");

            let vault = Arc::clone(&self.vault);
            let config = Arc::clone(&self.config);
            let metrics = Arc::clone(&self.metrics);

            tokio::spawn(async move {
                handle_connection(stream, peer_addr, vault, config, metrics).await;
            });
        }
    }
}
