//! # Vault Source
//!
//! Owns the live Vault session and turns mapping entries into secret data.
//!
//! The session sits behind a lock as an `Arc<BackendSession>`. Readers clone
//! the `Arc` and release the lock before any network call, so a renewal swap
//! never waits for in-flight reads and every read uses one whole session.

use super::{BackendSession, VaultError};
use crate::constants::{DEFAULT_BACKOFF_MAX_MS, DEFAULT_BACKOFF_START_MS};
use crate::controller::backoff::ExponentialBackoff;
use crate::mapping::{secret_key, DockerValue, EntryForm, KvLocation, MappingEntry, PlainValue, SecretMapping};
use crate::notify::Notifier;
use crate::observability::metrics;
use crate::provider::KvBackend;
use base64::{engine::general_purpose, Engine as _};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Secret data keyed by destination key
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// Some values of a secret could not be read
#[derive(Debug, Error)]
#[error("{} of {total} value(s) could not be read for {key}", .failures.len())]
pub struct ResolveError {
    pub key: String,
    pub total: usize,
    /// Values that were read successfully
    pub partial: SecretData,
    /// Destination key (or docker field) paired with its read error
    pub failures: Vec<(String, VaultError)>,
}

#[derive(Debug)]
pub enum Resolution {
    /// No mapping entry names this secret
    NotManaged,
    Resolved(SecretData),
    Failed(ResolveError),
}

/// Render a KV field as secret bytes: strings verbatim, anything else as JSON text
pub fn render_value(value: &Value) -> Vec<u8> {
    match value {
        Value::String(s) => s.as_bytes().to_vec(),
        other => other.to_string().into_bytes(),
    }
}

/// Build a `.dockerconfigjson` document: `{"auths":{"<host>":{"auth":"<base64(user:pass)>"}}}`
pub fn compose_docker_config(host: &[u8], username: &[u8], password: &[u8]) -> Vec<u8> {
    let mut credentials = Vec::with_capacity(username.len() + password.len() + 1);
    credentials.extend_from_slice(username);
    credentials.push(b':');
    credentials.extend_from_slice(password);

    let mut auth = Map::new();
    auth.insert(
        "auth".to_string(),
        Value::String(general_purpose::STANDARD.encode(&credentials)),
    );
    let mut auths = Map::new();
    auths.insert(String::from_utf8_lossy(host).into_owned(), Value::Object(auth));
    let mut root = Map::new();
    root.insert("auths".to_string(), Value::Object(auths));

    Value::Object(root).to_string().into_bytes()
}

pub struct VaultSource {
    backend: Arc<dyn KvBackend>,
    mapping: RwLock<SecretMapping>,
    session: RwLock<Arc<BackendSession>>,
    notifier: Arc<dyn Notifier>,
    healthy: Arc<AtomicBool>,
}

impl std::fmt::Debug for VaultSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultSource")
            .field("healthy", &self.is_healthy())
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

impl VaultSource {
    /// Perform the initial login
    ///
    /// # Errors
    /// Any login failure; callers treat it as fatal.
    pub async fn connect(
        backend: Arc<dyn KvBackend>,
        mapping: SecretMapping,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, VaultError> {
        metrics::increment_vault_logins();
        let session = backend
            .login()
            .await
            .inspect_err(|_| metrics::increment_vault_login_errors())?;
        info!(
            lease_secs = session.lease_duration().as_secs(),
            entries = mapping.len(),
            "Vault login succeeded"
        );
        metrics::set_vault_session_healthy(true);

        Ok(Self {
            backend,
            mapping: RwLock::new(mapping),
            session: RwLock::new(Arc::new(session)),
            notifier,
            healthy: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Shared flag, false while renewal is failing
    pub fn health_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.healthy)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// The session in use right now
    pub async fn session(&self) -> Arc<BackendSession> {
        Arc::clone(&*self.session.read().await)
    }

    /// Immutable copy of the full mapping
    pub async fn snapshot(&self) -> SecretMapping {
        self.mapping.read().await.clone()
    }

    pub async fn is_managed(&self, namespace: &str, name: &str) -> bool {
        self.mapping
            .read()
            .await
            .contains_key(&secret_key(namespace, name))
    }

    async fn entry(&self, namespace: &str, name: &str) -> Option<MappingEntry> {
        self.mapping.read().await.get(namespace, name).cloned()
    }

    /// Read a whole KV document with the current session
    pub async fn read_document(&self, location: &KvLocation) -> Result<Map<String, Value>, VaultError> {
        let session = self.session().await;
        self.backend
            .read_document(&session, &location.mount, &location.path)
            .await
    }

    /// Read one field of one KV document
    ///
    /// Failures are counted, logged and sent to the notifier before being returned.
    pub async fn read(&self, mount: &str, path: &str, key: &str) -> Result<Vec<u8>, VaultError> {
        metrics::increment_vault_reads();
        debug!(mount, path, key, "Reading Vault field");
        let result = self.read_field(mount, path, key).await;
        if let Err(e) = &result {
            metrics::increment_vault_read_errors();
            error!(mount, path, key, error = %e, "Unable to read secret from Vault");
            self.notifier
                .notify(&format!("unable to read secret {mount}/{path}:{key}: {e}"));
        }
        result
    }

    async fn read_field(&self, mount: &str, path: &str, key: &str) -> Result<Vec<u8>, VaultError> {
        let session = self.session().await;
        let document = self.backend.read_document(&session, mount, path).await?;
        document
            .get(key)
            .map(render_value)
            .ok_or_else(|| VaultError::MissingKey {
                mount: mount.to_string(),
                path: path.to_string(),
                key: key.to_string(),
            })
    }

    /// Desired data for a secret, in whichever form its mapping entry declares
    pub async fn resolve(&self, namespace: &str, name: &str) -> Resolution {
        let Some(entry) = self.entry(namespace, name).await else {
            return Resolution::NotManaged;
        };
        match &entry.form {
            EntryForm::Plain(values) => self.resolve_plain(&entry, values).await,
            EntryForm::DockerRegistry(docker) => self.resolve_registry(&entry, docker).await,
        }
    }

    /// Composed `.dockerconfigjson` data for a docker-registry entry
    ///
    /// Stops at the first failed read. Plain-form entries resolve as in [`Self::resolve`].
    pub async fn resolve_docker(&self, namespace: &str, name: &str) -> Resolution {
        let Some(entry) = self.entry(namespace, name).await else {
            return Resolution::NotManaged;
        };
        match &entry.form {
            EntryForm::DockerRegistry(docker) => self.resolve_registry(&entry, docker).await,
            EntryForm::Plain(values) => self.resolve_plain(&entry, values).await,
        }
    }

    async fn resolve_plain(&self, entry: &MappingEntry, values: &[PlainValue]) -> Resolution {
        let mut data = SecretData::new();
        let mut failures = Vec::new();
        for value in values {
            match self
                .read(&value.location.mount, &value.location.path, &value.field)
                .await
            {
                Ok(bytes) => {
                    data.insert(value.destination_key.clone(), bytes);
                }
                Err(e) => failures.push((value.destination_key.clone(), e)),
            }
        }
        if failures.is_empty() {
            Resolution::Resolved(data)
        } else {
            Resolution::Failed(ResolveError {
                key: entry.key(),
                total: values.len(),
                partial: data,
                failures,
            })
        }
    }

    async fn resolve_registry(&self, entry: &MappingEntry, docker: &DockerValue) -> Resolution {
        let location = &docker.location;
        let mut fields = Vec::with_capacity(3);
        for field in [docker.host_field(), docker.username_field(), docker.password_field()] {
            match self.read(&location.mount, &location.path, &field).await {
                Ok(bytes) => fields.push(bytes),
                Err(e) => {
                    return Resolution::Failed(ResolveError {
                        key: entry.key(),
                        total: 3,
                        partial: SecretData::new(),
                        failures: vec![(field, e)],
                    })
                }
            }
        }
        let mut data = SecretData::new();
        data.insert(
            crate::constants::DOCKER_CONFIG_JSON_KEY.to_string(),
            compose_docker_config(&fields[0], &fields[1], &fields[2]),
        );
        Resolution::Resolved(data)
    }

    /// Log in again and swap the new session in
    ///
    /// Returns when the next renewal is due, `None` for non-expiring tokens.
    pub async fn renew(&self) -> Result<Option<Instant>, VaultError> {
        metrics::increment_vault_logins();
        let session = self
            .backend
            .login()
            .await
            .inspect_err(|_| metrics::increment_vault_login_errors())?;
        let next = session.renew_at();
        info!(
            lease_secs = session.lease_duration().as_secs(),
            "Vault session renewed"
        );
        *self.session.write().await = Arc::new(session);

        if !self.healthy.swap(true, Ordering::SeqCst) {
            info!("Vault session healthy again");
        }
        metrics::set_vault_session_healthy(true);
        Ok(next)
    }

    /// Keep the session alive until `cancel` fires
    ///
    /// Relogins are scheduled from the lease issuance, so a renewal that is
    /// already overdue when this starts runs at once. A failed relogin keeps
    /// the previous session in place and retries with exponential backoff.
    pub async fn run_renewal(&self, cancel: CancellationToken) {
        let mut backoff = ExponentialBackoff::new(DEFAULT_BACKOFF_START_MS, DEFAULT_BACKOFF_MAX_MS);
        let mut due = self.session().await.renew_at();
        info!("Vault session renewal started");

        loop {
            let Some(deadline) = due else {
                info!("Vault token does not expire, renewal disabled");
                cancel.cancelled().await;
                break;
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep_until(deadline) => {}
            }

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = self.renew() => result,
            };

            match result {
                Ok(next) => {
                    backoff.reset();
                    due = next;
                }
                Err(e) => {
                    let retry_in = backoff.next_backoff();
                    let was_healthy = self.healthy.swap(false, Ordering::SeqCst);
                    metrics::set_vault_session_healthy(false);

                    if self.session().await.is_expired() {
                        error!(
                            error = %e,
                            retry_in_ms = retry_in.as_millis(),
                            "Vault relogin failed and the current lease has expired"
                        );
                    } else {
                        warn!(
                            error = %e,
                            retry_in_ms = retry_in.as_millis(),
                            "Vault relogin failed, keeping the current session"
                        );
                    }
                    if was_healthy {
                        self.notifier.notify(&format!("vault relogin failed: {e}"));
                    }
                    due = Some(Instant::now() + retry_in);
                }
            }
        }

        info!("Vault session renewal stopped");
    }
}
