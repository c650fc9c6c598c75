//! Common test utilities
//!
//! In-memory fakes for the cluster store, the Vault backend and the notifier,
//! plus builders for secrets and reconcilers.

#![allow(dead_code, reason = "Each test binary uses a different subset of helpers")]

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vault_secret_syncer::controller::Reconciler;
use vault_secret_syncer::mapping::{secret_key, SecretMapping};
use vault_secret_syncer::notify::Notifier;
use vault_secret_syncer::provider::vault::VaultSource;
use vault_secret_syncer::provider::{BackendSession, KvBackend, VaultError};
use vault_secret_syncer::store::{SecretEvent, SecretEventStream, SecretStore, StoreError};

pub const LABEL: &str = "vault-injector";
pub const LABEL_KEY: &str = "vault-injector/sync";

// ============================================================================
// Cluster store
// ============================================================================

/// What the next `watch` call returns
pub enum WatchScript {
    /// Opening the watch fails
    Fail,
    /// Deliver these items, then close the stream
    Events(Vec<Result<SecretEvent, StoreError>>),
    /// Open a stream that never yields
    Hang,
}

#[derive(Default)]
pub struct FakeStore {
    secrets: Mutex<BTreeMap<String, Secret>>,
    failing_writes: Mutex<HashSet<String>>,
    fail_list: AtomicBool,
    panic_on_list: AtomicBool,
    scripts: Mutex<VecDeque<WatchScript>>,
    watch_opens: AtomicUsize,
    writes: Mutex<Vec<String>>,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, secret: Secret) {
        let key = key_of(&secret);
        self.secrets.lock().unwrap().insert(key, secret);
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .unwrap()
            .get(&secret_key(namespace, name))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.secrets.lock().unwrap().len()
    }

    /// Make create/update/delete of `namespace/name` fail
    pub fn fail_writes_for(&self, namespace: &str, name: &str) {
        self.failing_writes
            .lock()
            .unwrap()
            .insert(secret_key(namespace, name));
    }

    /// Undo `fail_writes_for`
    pub fn allow_writes_for(&self, namespace: &str, name: &str) {
        self.failing_writes
            .lock()
            .unwrap()
            .remove(&secret_key(namespace, name));
    }

    /// Make `list` panic, standing in for a bug inside a pass
    pub fn set_panic_on_list(&self, panic: bool) {
        self.panic_on_list.store(panic, Ordering::SeqCst);
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn push_watch(&self, script: WatchScript) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn watch_opens(&self) -> usize {
        self.watch_opens.load(Ordering::SeqCst)
    }

    /// Successful writes as `"{operation} {namespace}/{name}"`
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    fn check_write(&self, key: &str) -> Result<(), StoreError> {
        if self.failing_writes.lock().unwrap().contains(key) {
            return Err(StoreError::Unavailable(format!("write to {key} rejected")));
        }
        Ok(())
    }

    fn record(&self, operation: &str, key: &str) {
        self.writes.lock().unwrap().push(format!("{operation} {key}"));
    }
}

/// What the API server answers for an object that does not exist
fn not_found(key: &str) -> StoreError {
    StoreError::Kube(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("secret {key} not found"),
        reason: "NotFound".to_string(),
        code: 404,
    }))
}

fn key_of(secret: &Secret) -> String {
    secret_key(
        secret.metadata.namespace.as_deref().unwrap_or_default(),
        secret.metadata.name.as_deref().unwrap_or_default(),
    )
}

fn matches_selector(secret: &Secret, selector: &str) -> bool {
    let Some((key, value)) = selector.split_once('=') else {
        return false;
    };
    secret
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .is_some_and(|v| v == value)
}

#[async_trait]
impl SecretStore for FakeStore {
    async fn list(&self, selector: &str) -> Result<Vec<Secret>, StoreError> {
        assert!(!self.panic_on_list.load(Ordering::SeqCst), "list exploded");
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("list refused".to_string()));
        }
        Ok(self
            .secrets
            .lock()
            .unwrap()
            .values()
            .filter(|secret| matches_selector(secret, selector))
            .cloned()
            .collect())
    }

    async fn watch(&self, _selector: &str) -> Result<SecretEventStream, StoreError> {
        self.watch_opens.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(WatchScript::Hang);
        match script {
            WatchScript::Fail => Err(StoreError::Unavailable("watch refused".to_string())),
            WatchScript::Events(items) => Ok(futures::stream::iter(items).boxed()),
            WatchScript::Hang => Ok(futures::stream::pending().boxed()),
        }
    }

    async fn create(&self, secret: &Secret) -> Result<(), StoreError> {
        let key = key_of(secret);
        self.check_write(&key)?;
        let mut secrets = self.secrets.lock().unwrap();
        if secrets.contains_key(&key) {
            return Err(StoreError::Unavailable(format!("{key} already exists")));
        }
        secrets.insert(key.clone(), secret.clone());
        drop(secrets);
        self.record("create", &key);
        Ok(())
    }

    async fn update(&self, secret: &Secret) -> Result<(), StoreError> {
        let key = key_of(secret);
        self.check_write(&key)?;
        let mut secrets = self.secrets.lock().unwrap();
        if !secrets.contains_key(&key) {
            return Err(not_found(&key));
        }
        secrets.insert(key.clone(), secret.clone());
        drop(secrets);
        self.record("update", &key);
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = secret_key(namespace, name);
        self.check_write(&key)?;
        if self.secrets.lock().unwrap().remove(&key).is_none() {
            return Err(not_found(&key));
        }
        self.record("delete", &key);
        Ok(())
    }
}

// ============================================================================
// Vault backend
// ============================================================================

pub struct FakeBackend {
    documents: Mutex<BTreeMap<String, Map<String, Value>>>,
    unreadable: Mutex<HashSet<String>>,
    lease: Mutex<Duration>,
    failing_logins: AtomicBool,
    logins: AtomicUsize,
    read_tokens: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            documents: Mutex::new(BTreeMap::new()),
            unreadable: Mutex::new(HashSet::new()),
            lease: Mutex::new(Duration::from_secs(3600)),
            failing_logins: AtomicBool::new(false),
            logins: AtomicUsize::new(0),
            read_tokens: Mutex::new(Vec::new()),
        })
    }

    /// Set one field of the document at `location` (`mount/path`)
    pub fn set_field(&self, location: &str, key: &str, value: Value) {
        self.documents
            .lock()
            .unwrap()
            .entry(location.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn make_unreadable(&self, location: &str) {
        self.unreadable.lock().unwrap().insert(location.to_string());
    }

    pub fn set_lease(&self, lease: Duration) {
        *self.lease.lock().unwrap() = lease;
    }

    pub fn set_login_failing(&self, failing: bool) {
        self.failing_logins.store(failing, Ordering::SeqCst);
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    /// Session tokens presented by every read so far
    pub fn read_tokens(&self) -> Vec<String> {
        self.read_tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl KvBackend for FakeBackend {
    async fn login(&self) -> Result<BackendSession, VaultError> {
        let attempt = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_logins.load(Ordering::SeqCst) {
            return Err(VaultError::Api {
                status: 403,
                message: "permission denied".to_string(),
            });
        }
        let lease = *self.lease.lock().unwrap();
        Ok(BackendSession::new(format!("token-{attempt}"), lease))
    }

    async fn read_document(
        &self,
        session: &BackendSession,
        mount: &str,
        path: &str,
    ) -> Result<Map<String, Value>, VaultError> {
        self.read_tokens
            .lock()
            .unwrap()
            .push(session.token().to_string());
        let location = format!("{mount}/{path}");
        if self.unreadable.lock().unwrap().contains(&location) {
            return Err(VaultError::Api {
                status: 500,
                message: "internal error".to_string(),
            });
        }
        self.documents
            .lock()
            .unwrap()
            .get(&location)
            .cloned()
            .ok_or_else(|| VaultError::NotFound {
                mount: mount.to_string(),
                path: path.to_string(),
            })
    }
}

// ============================================================================
// Notifier
// ============================================================================

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

// ============================================================================
// Builders
// ============================================================================

/// A secret carrying the sync label
pub fn managed_secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    let mut secret = unlabelled_secret(namespace, name, data);
    secret.metadata.labels = Some(BTreeMap::from([(LABEL_KEY.to_string(), "true".to_string())]));
    secret
}

pub fn unlabelled_secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(
            data.iter()
                .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Secret::default()
    }
}

/// Value stored under `key`, as UTF-8
pub fn data_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()?
        .get(key)
        .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned())
}

pub struct Harness {
    pub store: Arc<FakeStore>,
    pub backend: Arc<FakeBackend>,
    pub notifier: Arc<RecordingNotifier>,
    pub source: Arc<VaultSource>,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    pub async fn new(mapping_yaml: &str) -> Self {
        Self::with_backend(mapping_yaml, FakeBackend::new(), false).await
    }

    pub async fn dry_run(mapping_yaml: &str) -> Self {
        Self::with_backend(mapping_yaml, FakeBackend::new(), true).await
    }

    pub async fn with_backend(mapping_yaml: &str, backend: Arc<FakeBackend>, dry_run: bool) -> Self {
        let store = FakeStore::new();
        let notifier = RecordingNotifier::new();
        let mapping = SecretMapping::parse(mapping_yaml).unwrap();
        let source = Arc::new(
            VaultSource::connect(
                Arc::clone(&backend) as Arc<dyn KvBackend>,
                mapping,
                Arc::clone(&notifier) as Arc<dyn Notifier>,
            )
            .await
            .unwrap(),
        );
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store) as Arc<dyn SecretStore>,
            Arc::clone(&source),
            LABEL,
            dry_run,
        ));
        Self {
            store,
            backend,
            notifier,
            source,
            reconciler,
        }
    }
}
