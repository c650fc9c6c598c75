//! Kubernetes-backed [`SecretStore`].
//!
//! Every call takes the store lock for the duration of the API request. The
//! lock also guards the resource version shared by `list` and `watch`.

use super::{SecretEvent, SecretEventStream, SecretStore, StoreError};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams, PostParams, WatchEvent, WatchParams};
use kube::config::{Config, KubeConfigOptions, Kubeconfig};
use kube::Client;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Resource version the first watch starts from when nothing was listed yet
const INITIAL_RESOURCE_VERSION: &str = "0";

/// HTTP status the API server reports in-band when a watch's resource version is too old
const GONE: u16 = 410;

/// Build a client from the pod's service account or a kubeconfig file
///
/// Without an explicit path the standard kubeconfig discovery applies
/// (`KUBECONFIG`, then `~/.kube/config`).
pub async fn build_client(in_cluster: bool, kubeconfig: Option<&Path>) -> Result<Client, StoreError> {
    let config = if in_cluster {
        info!("Using in-cluster Kubernetes configuration");
        Config::incluster().map_err(|e| StoreError::Config(e.to_string()))?
    } else if let Some(path) = kubeconfig {
        info!(path = %path.display(), "Using kubeconfig file");
        let kubeconfig = Kubeconfig::read_from(path).map_err(|e| StoreError::Config(e.to_string()))?;
        Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| StoreError::Config(e.to_string()))?
    } else {
        info!("Using default kubeconfig");
        Config::from_kubeconfig(&KubeConfigOptions::default())
            .await
            .map_err(|e| StoreError::Config(e.to_string()))?
    };
    Client::try_from(config).map_err(StoreError::from)
}

#[derive(Debug)]
struct StoreState {
    resource_version: String,
}

pub struct KubeSecretStore {
    client: Client,
    state: Arc<Mutex<StoreState>>,
}

impl std::fmt::Debug for KubeSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretStore").finish_non_exhaustive()
    }
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            state: Arc::new(Mutex::new(StoreState {
                resource_version: INITIAL_RESOURCE_VERSION.to_string(),
            })),
        }
    }

    fn namespaced(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn require_namespace(secret: &Secret) -> Result<&str, StoreError> {
    secret
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| StoreError::MissingNamespace(secret.metadata.name.clone().unwrap_or_default()))
}

async fn advance(state: &Mutex<StoreState>, version: Option<&String>) {
    if let Some(version) = version {
        state.lock().await.resource_version.clone_from(version);
    }
}

async fn track(state: Arc<Mutex<StoreState>>, event: WatchEvent<Secret>) -> SecretEvent {
    match event {
        WatchEvent::Added(secret) => {
            advance(&state, secret.metadata.resource_version.as_ref()).await;
            SecretEvent::Added(secret)
        }
        WatchEvent::Modified(secret) => {
            advance(&state, secret.metadata.resource_version.as_ref()).await;
            SecretEvent::Modified(secret)
        }
        WatchEvent::Deleted(secret) => {
            advance(&state, secret.metadata.resource_version.as_ref()).await;
            SecretEvent::Deleted(secret)
        }
        WatchEvent::Bookmark(bookmark) => {
            advance(&state, Some(&bookmark.metadata.resource_version)).await;
            SecretEvent::Bookmark
        }
        WatchEvent::Error(status) => {
            if status.code == GONE {
                warn!("Watch resource version expired, next watch starts from scratch");
                INITIAL_RESOURCE_VERSION.clone_into(&mut state.lock().await.resource_version);
            }
            SecretEvent::Error {
                code: status.code,
                message: status.message,
            }
        }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn list(&self, selector: &str) -> Result<Vec<Secret>, StoreError> {
        let mut state = self.state.lock().await;
        let api: Api<Secret> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default().labels(selector)).await?;
        if let Some(version) = list.metadata.resource_version {
            debug!(resource_version = %version, count = list.items.len(), "Listed managed secrets");
            state.resource_version = version;
        }
        Ok(list.items)
    }

    async fn watch(&self, selector: &str) -> Result<SecretEventStream, StoreError> {
        let stream = {
            let state = self.state.lock().await;
            let api: Api<Secret> = Api::all(self.client.clone());
            debug!(resource_version = %state.resource_version, "Opening secret watch");
            api.watch(&WatchParams::default().labels(selector), &state.resource_version)
                .await?
        };

        let state = Arc::clone(&self.state);
        Ok(stream
            .map_err(StoreError::from)
            .and_then(move |event| {
                let state = Arc::clone(&state);
                async move { Ok(track(state, event).await) }
            })
            .boxed())
    }

    async fn create(&self, secret: &Secret) -> Result<(), StoreError> {
        let namespace = require_namespace(secret)?;
        let _guard = self.state.lock().await;
        self.namespaced(namespace)
            .create(&PostParams::default(), secret)
            .await?;
        Ok(())
    }

    async fn update(&self, secret: &Secret) -> Result<(), StoreError> {
        let namespace = require_namespace(secret)?;
        let name = secret.metadata.name.as_deref().unwrap_or_default();
        let _guard = self.state.lock().await;
        self.namespaced(namespace)
            .replace(name, &PostParams::default(), secret)
            .await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let _guard = self.state.lock().await;
        self.namespaced(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}
