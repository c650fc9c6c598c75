//! # Initialization
//!
//! Builds every component from the loaded configuration and runs the
//! background tasks until shutdown.
//!
//! Fatal at startup: mapping file errors, Vault client setup, the initial
//! Vault login and Kubernetes client construction.

use crate::config::ControllerConfig;
use crate::controller::{PollDriver, Reconciler, WatchDriver};
use crate::mapping::{KvLocation, SecretMapping};
use crate::notify::{Notifier, TelegramNotifier, TelegramSettings};
use crate::observability::{self, logging::LogFormat};
use crate::provider::vault::{VaultREST, VaultSource};
use crate::server::{start_server, ServerState};
use crate::store::{build_client, KubeSecretStore};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything `run` needs, built by `initialize`
pub struct InitializationResult {
    pub config: ControllerConfig,
    pub source: Arc<VaultSource>,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
    pub force_rx: mpsc::Receiver<()>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready.load(Ordering::Relaxed))
            .field("vault_healthy", &self.source.is_healthy())
            .finish_non_exhaustive()
    }
}

/// Initialize the syncer
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - Mapping load and validation
/// - Vault client, initial login and notifier bootstrap
/// - Kubernetes client creation
/// - Reconciler setup
pub async fn initialize(config: ControllerConfig) -> Result<InitializationResult> {
    // Must happen before any TLS client is built
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }

    observability::init_tracing(&config.log_level, LogFormat::parse(&config.log_format))?;

    info!("Starting vault-secret-syncer v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Build info: datetime={}, git_hash={}",
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    debug!(config = ?config, "Effective configuration");
    if config.dry_run {
        warn!("Dry run enabled, no cluster writes will be issued");
    }

    observability::metrics::register_metrics()?;

    let mapping = SecretMapping::load(&config.secret_map)
        .with_context(|| format!("Failed to load secret mapping {}", config.secret_map.display()))?;
    info!(entries = mapping.len(), "Secret mapping loaded");

    let telegram = TelegramNotifier::new(TelegramSettings::from_config(&config.telegram))
        .context("Failed to create Telegram notifier")?;
    let notifier: Arc<dyn Notifier> = Arc::new(telegram.clone());

    let backend = VaultREST::new(&config.vault, config.token_path.clone())
        .context("Failed to create Vault client")?;
    let source = Arc::new(
        VaultSource::connect(Arc::new(backend), mapping, Arc::clone(&notifier))
            .await
            .context("Initial Vault login failed")?,
    );

    if let Some(path) = &config.telegram.vault_path {
        bootstrap_notifier(&source, &telegram, path).await;
    }
    notifier.notify(&format!(
        "vault-secret-syncer v{} starting (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_DATETIME")
    ));

    let client = build_client(config.in_cluster, config.kubeconfig.as_deref())
        .await
        .context("Failed to create Kubernetes client")?;
    let store = Arc::new(KubeSecretStore::new(client));

    let reconciler = Arc::new(Reconciler::new(
        store,
        Arc::clone(&source),
        &config.secret_label,
        config.dry_run,
    ));

    let (force_tx, force_rx) = mpsc::channel(1);
    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(AtomicBool::new(false)),
        backend_healthy: source.health_flag(),
        force_tx,
    });

    Ok(InitializationResult {
        config,
        source,
        reconciler,
        server_state,
        force_rx,
    })
}

/// Replace the notifier settings with the `channel`/`token` fields of a Vault document
///
/// Failures are logged and the configured settings stay in place.
async fn bootstrap_notifier(source: &VaultSource, telegram: &TelegramNotifier, path: &str) {
    let Some((mount, path)) = path.split_once('/') else {
        warn!(path, "Telegram Vault path must be mount/path, skipping");
        return;
    };
    let location = KvLocation {
        mount: mount.to_string(),
        path: path.to_string(),
    };
    let settings = match source.read_document(&location).await {
        Ok(document) => TelegramSettings::from_document(&document),
        Err(e) => {
            warn!(location = %location, error = %e, "Failed to read Telegram settings from Vault");
            return;
        }
    };
    match settings {
        Ok(settings) => {
            telegram.reconfigure(settings).await;
            info!(location = %location, "Telegram notifier configured from Vault");
        }
        Err(e) => warn!(location = %location, error = %e, "Invalid Telegram settings in Vault"),
    }
}

/// Start the renewal loop, both drivers and the HTTP server; return after `cancel` fires
/// and every task has stopped
pub async fn run(init: InitializationResult, cancel: CancellationToken) -> Result<()> {
    let InitializationResult {
        config,
        source,
        reconciler,
        server_state,
        force_rx,
    } = init;

    let renewal = {
        let source = Arc::clone(&source);
        let cancel = cancel.clone();
        tokio::spawn(async move { source.run_renewal(cancel).await })
    };
    let poll = tokio::spawn(
        PollDriver::new(Arc::clone(&reconciler), config.interval(), force_rx).run(cancel.clone()),
    );
    let watch = tokio::spawn(
        WatchDriver::new(Arc::clone(&reconciler), config.watch_restart_delay()).run(cancel.clone()),
    );
    let mut server = tokio::spawn(start_server(
        config.http.addr.clone(),
        config.http.route_prefix(),
        Arc::clone(&server_state),
        cancel.clone(),
    ));

    server_state.is_ready.store(true, Ordering::Relaxed);
    info!("vault-secret-syncer started");

    let mut server_failure = None;
    tokio::select! {
        () = cancel.cancelled() => {}
        result = &mut server => {
            server_failure = Some(match result {
                Ok(Ok(())) => anyhow::anyhow!("HTTP server exited unexpectedly"),
                Ok(Err(e)) => e.context("HTTP server failed"),
                Err(e) => anyhow::Error::new(e).context("HTTP server task failed"),
            });
            cancel.cancel();
        }
    }

    server_state.is_ready.store(false, Ordering::Relaxed);
    info!("Shutting down, waiting for background tasks...");

    for (task, handle) in [("renewal", renewal), ("poll", poll), ("watch", watch)] {
        if let Err(e) = handle.await {
            error!(task, error = %e, "Background task failed");
        }
    }
    if server_failure.is_none() {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
            Err(e) => error!(error = %e, "HTTP server task failed"),
        }
    }

    info!("vault-secret-syncer stopped");
    server_failure.map_or(Ok(()), Err)
}
