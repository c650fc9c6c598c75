//! # Cluster Secret Store
//!
//! The capability surface the reconciler needs from the cluster: list, watch,
//! create, update and delete `Secret` objects selected by label.

use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::Secret;
use thiserror::Error;

mod cluster;

pub use cluster::{build_client, KubeSecretStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("failed to build kubernetes client: {0}")]
    Config(String),
    #[error("secret {0} has no namespace")]
    MissingNamespace(String),
    #[error("kubernetes API unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// The object does not exist (API status 404)
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(response)) if response.code == 404)
    }
}

/// One change notification from a watch
#[derive(Debug, Clone)]
pub enum SecretEvent {
    Added(Secret),
    Modified(Secret),
    Deleted(Secret),
    Bookmark,
    /// Error reported in-band by the API server
    Error { code: u16, message: String },
}

impl SecretEvent {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Modified(_) => "modified",
            Self::Deleted(_) => "deleted",
            Self::Bookmark => "bookmark",
            Self::Error { .. } => "error",
        }
    }
}

pub type SecretEventStream = BoxStream<'static, Result<SecretEvent, StoreError>>;

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// List every secret matching `selector` across all namespaces
    async fn list(&self, selector: &str) -> Result<Vec<Secret>, StoreError>;

    /// Open a watch from the last observed resource version
    async fn watch(&self, selector: &str) -> Result<SecretEventStream, StoreError>;

    async fn create(&self, secret: &Secret) -> Result<(), StoreError>;

    /// Replace an existing secret
    async fn update(&self, secret: &Secret) -> Result<(), StoreError>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

/// `(namespace, name)` of a secret, empty strings when unset
pub fn secret_identity(secret: &Secret) -> (String, String) {
    (
        secret.metadata.namespace.clone().unwrap_or_default(),
        secret.metadata.name.clone().unwrap_or_default(),
    )
}
