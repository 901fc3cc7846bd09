//! `tokenshield-server`: the ICAP listener binary. Grounded in the
//! teacher's `treasury-server`/`runtime` binaries
//! (`packages/treasury/src/bin/server.rs`, `packages/runtime/src/bin/main.rs`):
//! init tracing, load config, build the service, run it, map failures to
//! exit codes.

use std::process::ExitCode;
use std::sync::Arc;

use tokenshield_icap::{Config, IcapService};
use tokenshield_vault::{InMemoryVaultStore, Vault};

const EXIT_OK: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 64;
const EXIT_BACKEND_UNAVAILABLE: u8 = 69;
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "configuration error");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let store = Arc::new(InMemoryVaultStore::new());
    let vault = Arc::new(Vault::new(store, config.vault_key.clone(), config.vault_pepper.clone()));
    let service = IcapService::new(vault, Arc::new(config));

    tokio::select! {
        result = service.run() => {
            match result {
                Ok(()) => ExitCode::from(EXIT_OK),
                Err(err) => {
                    tracing::error!(error = %err, "ICAP service terminated");
                    ExitCode::from(EXIT_BACKEND_UNAVAILABLE)
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received interrupt, shutting down");
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}
