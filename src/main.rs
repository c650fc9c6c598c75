//! # Vault Secret Syncer
//!
//! A Kubernetes controller that syncs secrets from HashiCorp Vault (KV v2) into
//! Kubernetes `Secret` objects.
//!
//! ## Overview
//!
//! 1. **Mapping** - `map.yaml` declares every desired secret and the Vault fields behind it
//! 2. **Poll driver** - full reconciliation on startup, on an interval and on `POST /reconcile`
//! 3. **Watch driver** - reacts to changes of managed secrets as they happen
//! 4. **Session renewal** - logs in to Vault again before the lease runs out
//!
//! Managed secrets carry the label `{secretLabel}/sync=true`.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;
use vault_secret_syncer::config::ControllerConfig;
use vault_secret_syncer::constants::DEFAULT_CONFIG_PATH;
use vault_secret_syncer::runtime;

#[derive(Parser, Debug)]
#[command(name = "vault-secret-syncer")]
#[command(
    about = "Sync secrets from HashiCorp Vault into Kubernetes",
    long_about = None,
    version
)]
struct Cli {
    /// Path to the YAML config file; a missing file means defaults plus environment
    #[arg(short, long, env = "CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ControllerConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    let init = runtime::initialize(config).await?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
            cancel.cancel();
        }
    });

    runtime::run(init, cancel).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
