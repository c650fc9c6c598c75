//! # Provider
//!
//! Secret backends. `KvBackend` is the seam between session management and the
//! wire protocol, so tests can substitute an in-memory backend.

use async_trait::async_trait;
use serde_json::{Map, Value};

pub mod vault;

pub use vault::{BackendSession, VaultError};

/// A key/value secret backend reached through a login session
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Authenticate and return a fresh session
    async fn login(&self) -> Result<BackendSession, VaultError>;

    /// Read the latest version of the document at `mount/path`
    async fn read_document(
        &self,
        session: &BackendSession,
        mount: &str,
        path: &str,
    ) -> Result<Map<String, Value>, VaultError>;
}
