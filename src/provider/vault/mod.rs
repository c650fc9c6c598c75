//! # Vault
//!
//! - `rest`: HTTP client for Kubernetes auth login and KV v2 reads
//! - `session`: client token plus lease
//! - `source`: session lifecycle and mapping-driven secret resolution

use std::path::PathBuf;
use thiserror::Error;

mod rest;
mod session;
mod source;

pub use rest::VaultREST;
pub use session::BackendSession;
pub use source::{compose_docker_config, render_value, Resolution, ResolveError, SecretData, VaultSource};

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("failed to read service account token {path}: {source}")]
    TokenRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to load Vault CA bundle {path}: {reason}")]
    CaCert { path: PathBuf, reason: String },
    #[error("failed to build Vault HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("request to Vault failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Vault returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("no secret at {mount}/{path}")]
    NotFound { mount: String, path: String },
    #[error("key {key:?} not found at {mount}/{path}")]
    MissingKey {
        mount: String,
        path: String,
        key: String,
    },
    #[error("malformed Vault response: {0}")]
    Malformed(String),
    #[error("{0} is not in the secret mapping")]
    NotManaged(String),
}
