//! # Reconciler
//!
//! Diff/apply logic shared by both drivers. Desired state comes from the
//! [`VaultSource`], actual state from the [`SecretStore`].
//!
//! - Managed secret with no mapping entry: deleted
//! - Vault read failed: left unchanged until the next pass
//! - Data differs from Vault: overwritten
//! - Mapping entry with no secret: created (empty placeholder, or composed
//!   `.dockerconfigjson` for docker-registry entries)
//!
//! Every step is idempotent. A failure on one secret never stops the others.

use crate::constants::{SECRET_TYPE_DOCKER_CONFIG_JSON, SECRET_TYPE_OPAQUE};
use crate::mapping::{secret_key, MappingEntry, SecretMapping};
use crate::observability::metrics;
use crate::provider::vault::{Resolution, SecretData, VaultSource};
use crate::store::{secret_identity, SecretStore, StoreError};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

/// What started a reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// First pass after startup
    Startup,
    /// Periodic interval
    Timer,
    /// External force-update signal
    Force,
    /// Watch event
    Watch,
}

impl TriggerSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Timer => "timer",
            Self::Force => "force",
            Self::Watch => "watch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("failed to list managed secrets: {0}")]
    List(#[source] StoreError),
    #[error("failed to {operation} secret {key}: {source}")]
    Write {
        operation: Operation,
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("secret object has no namespace or name")]
    Unidentified,
}

/// Result of reconciling one secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    Created,
    Updated,
    Deleted,
    /// Vault could not be read; the secret keeps its current data
    Skipped,
}

/// Tally of one pass
#[derive(Debug, Default)]
pub struct PassSummary {
    pub unchanged: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: Vec<ReconcilerError>,
}

impl PassSummary {
    pub fn record(&mut self, result: Result<Outcome, ReconcilerError>) {
        match result {
            Ok(Outcome::Unchanged) => self.unchanged += 1,
            Ok(Outcome::Created) => self.created += 1,
            Ok(Outcome::Updated) => self.updated += 1,
            Ok(Outcome::Deleted) => self.deleted += 1,
            Ok(Outcome::Skipped) => self.skipped += 1,
            Err(e) => self.errors.push(e),
        }
    }

    /// Fold another pass's results into this one
    pub fn merge(&mut self, other: PassSummary) {
        self.unchanged += other.unchanged;
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.skipped == 0
    }

    pub fn changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// True when `actual` holds exactly the keys and bytes of `desired`; absent data counts as empty
pub fn data_matches(actual: Option<&BTreeMap<String, ByteString>>, desired: &SecretData) -> bool {
    let Some(actual) = actual else {
        return desired.is_empty();
    };
    actual.len() == desired.len()
        && desired
            .iter()
            .all(|(key, value)| actual.get(key).is_some_and(|stored| stored.0 == *value))
}

fn to_secret_data(data: SecretData) -> BTreeMap<String, ByteString> {
    data.into_iter()
        .map(|(key, value)| (key, ByteString(value)))
        .collect()
}

pub struct Reconciler {
    store: Arc<dyn SecretStore>,
    source: Arc<VaultSource>,
    label_key: String,
    selector: String,
    dry_run: bool,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("selector", &self.selector)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// `secret_label` is the label prefix; managed secrets carry `{secret_label}/sync=true`
    pub fn new(
        store: Arc<dyn SecretStore>,
        source: Arc<VaultSource>,
        secret_label: &str,
        dry_run: bool,
    ) -> Self {
        let label_key = format!("{secret_label}/sync");
        let selector = format!("{label_key}=true");
        Self {
            store,
            source,
            label_key,
            selector,
            dry_run,
        }
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn source(&self) -> &Arc<VaultSource> {
        &self.source
    }

    pub fn store(&self) -> &Arc<dyn SecretStore> {
        &self.store
    }

    /// Current managed secrets in the cluster
    pub async fn list_managed(&self) -> Result<Vec<Secret>, ReconcilerError> {
        let secrets = self
            .store
            .list(&self.selector)
            .await
            .map_err(ReconcilerError::List)?;
        metrics::set_secrets_managed(i64::try_from(secrets.len()).unwrap_or(i64::MAX));
        Ok(secrets)
    }

    /// Bring every existing managed secret in line with Vault, deleting orphans
    pub async fn reconcile_existing(&self, actual: &[Secret]) -> PassSummary {
        let mut summary = PassSummary::default();
        for secret in actual {
            summary.record(self.reconcile_one(secret).await);
        }
        summary
    }

    /// Create a secret for every mapping entry that has none
    pub async fn reconcile_missing(&self, actual: &[Secret], snapshot: &SecretMapping) -> PassSummary {
        let mut missing = snapshot.clone();
        for secret in actual {
            let (namespace, name) = secret_identity(secret);
            missing.remove(&secret_key(&namespace, &name));
        }

        let mut summary = PassSummary::default();
        for entry in missing.entries() {
            let span = info_span!(
                "reconcile.create",
                secret.namespace = %entry.namespace,
                secret.name = %entry.name,
            );
            summary.record(self.create_missing(entry).instrument(span).await);
        }
        summary
    }

    /// Compare one managed secret with Vault and apply the difference
    pub async fn reconcile_one(&self, secret: &Secret) -> Result<Outcome, ReconcilerError> {
        let (namespace, name) = secret_identity(secret);
        if namespace.is_empty() || name.is_empty() {
            return Err(ReconcilerError::Unidentified);
        }
        let span = info_span!(
            "reconcile.compare",
            secret.namespace = %namespace,
            secret.name = %name,
        );
        self.compare(secret, &namespace, &name).instrument(span).await
    }

    async fn compare(
        &self,
        secret: &Secret,
        namespace: &str,
        name: &str,
    ) -> Result<Outcome, ReconcilerError> {
        match self.source.resolve(namespace, name).await {
            Resolution::NotManaged => {
                info!("Secret has no mapping entry, deleting");
                self.apply_delete(namespace, name).await
            }
            Resolution::Failed(e) => {
                metrics::increment_secrets_skipped();
                warn!(error = %e, "Vault read failed, leaving secret unchanged");
                Ok(Outcome::Skipped)
            }
            Resolution::Resolved(desired) => {
                if data_matches(secret.data.as_ref(), &desired) {
                    debug!("Secret is up to date");
                    return Ok(Outcome::Unchanged);
                }
                info!(keys = desired.len(), "Secret differs from Vault, updating");
                let mut updated = secret.clone();
                updated.data = Some(to_secret_data(desired));
                self.apply_update(&updated, namespace, name).await
            }
        }
    }

    async fn create_missing(&self, entry: &MappingEntry) -> Result<Outcome, ReconcilerError> {
        let secret = if entry.is_docker() {
            match self.source.resolve_docker(&entry.namespace, &entry.name).await {
                Resolution::Resolved(data) => {
                    info!("Creating docker registry secret");
                    self.build_secret(entry, SECRET_TYPE_DOCKER_CONFIG_JSON, Some(to_secret_data(data)))
                }
                Resolution::Failed(e) => {
                    metrics::increment_secrets_skipped();
                    warn!(error = %e, "Vault read failed, docker registry secret not created yet");
                    return Ok(Outcome::Skipped);
                }
                Resolution::NotManaged => return Ok(Outcome::Unchanged),
            }
        } else {
            info!("Creating placeholder secret");
            self.build_secret(entry, SECRET_TYPE_OPAQUE, Some(BTreeMap::new()))
        };
        self.apply_create(&secret, &entry.key()).await
    }

    fn build_secret(
        &self,
        entry: &MappingEntry,
        type_: &str,
        data: Option<BTreeMap<String, ByteString>>,
    ) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(entry.name.clone()),
                namespace: Some(entry.namespace.clone()),
                labels: Some(BTreeMap::from([(self.label_key.clone(), "true".to_string())])),
                ..ObjectMeta::default()
            },
            type_: Some(type_.to_string()),
            data,
            ..Secret::default()
        }
    }

    async fn apply_create(&self, secret: &Secret, key: &str) -> Result<Outcome, ReconcilerError> {
        if self.dry_run {
            info!(dry_run = true, "Would create secret");
            return Ok(Outcome::Created);
        }
        self.write(Operation::Create, key, self.store.create(secret))
            .await
            .map(|()| Outcome::Created)
    }

    async fn apply_update(
        &self,
        secret: &Secret,
        namespace: &str,
        name: &str,
    ) -> Result<Outcome, ReconcilerError> {
        if self.dry_run {
            info!(dry_run = true, "Would update secret");
            return Ok(Outcome::Updated);
        }
        self.write(
            Operation::Update,
            &secret_key(namespace, name),
            self.store.update(secret),
        )
        .await
        .map(|()| Outcome::Updated)
    }

    async fn apply_delete(&self, namespace: &str, name: &str) -> Result<Outcome, ReconcilerError> {
        if self.dry_run {
            info!(dry_run = true, "Would delete secret");
            return Ok(Outcome::Deleted);
        }
        match self.store.delete(namespace, name).await {
            // Removed by the other driver or by hand since it was observed
            Err(e) if e.is_not_found() => {
                debug!("Secret already deleted");
                Ok(Outcome::Deleted)
            }
            result => self
                .write(
                    Operation::Delete,
                    &secret_key(namespace, name),
                    std::future::ready(result),
                )
                .await
                .map(|()| Outcome::Deleted),
        }
    }

    async fn write(
        &self,
        operation: Operation,
        key: &str,
        call: impl std::future::Future<Output = Result<(), StoreError>>,
    ) -> Result<(), ReconcilerError> {
        match call.await {
            Ok(()) => {
                metrics::increment_secret_operations(operation.as_str());
                Ok(())
            }
            Err(source) => {
                metrics::increment_secret_operation_errors(operation.as_str());
                warn!(%operation, error = %source, "Secret write failed");
                Err(ReconcilerError::Write {
                    operation,
                    key: key.to_string(),
                    source,
                })
            }
        }
    }
}
