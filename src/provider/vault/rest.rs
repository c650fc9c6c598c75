//! Vault REST Client
//!
//! Native REST implementation of the two Vault calls the syncer needs:
//! Kubernetes auth login and KV v2 reads. Uses reqwest with rustls.
//!
//! References:
//! - [Kubernetes auth method](https://developer.hashicorp.com/vault/api-docs/auth/kubernetes#login)
//! - [KV v2 read secret version](https://developer.hashicorp.com/vault/api-docs/secret/kv/kv-v2#read-secret-version)

use super::{BackendSession, VaultError};
use crate::config::VaultConfig;
use crate::constants::VAULT_REQUEST_TIMEOUT_SECS;
use crate::provider::KvBackend;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use zeroize::Zeroizing;

// ============================================================================
// Request/Response Structures
// ============================================================================

/// Body of `POST /v1/auth/{mount}/login`
#[derive(Serialize)]
struct LoginRequest<'a> {
    role: &'a str,
    jwt: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    auth: Option<AuthInfo>,
}

#[derive(Deserialize)]
struct AuthInfo {
    client_token: String,
    /// Lease in seconds; zero for non-expiring tokens
    #[serde(default)]
    lease_duration: u64,
}

impl std::fmt::Debug for AuthInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthInfo")
            .field("lease_duration", &self.lease_duration)
            .finish_non_exhaustive()
    }
}

/// Body of `GET /v1/{mount}/data/{path}`; the document lives at `data.data`
#[derive(Debug, Deserialize)]
struct KvReadResponse {
    data: Option<KvVersion>,
}

#[derive(Debug, Deserialize)]
struct KvVersion {
    data: Option<Map<String, Value>>,
}

/// Vault error body, e.g. `{"errors": ["permission denied"]}`
#[derive(Debug, Deserialize)]
struct VaultErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

/// Vault REST client
pub struct VaultREST {
    http_client: Client,
    base_url: String,
    role: String,
    auth_mount: String,
    token_path: PathBuf,
}

impl std::fmt::Debug for VaultREST {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultREST")
            .field("base_url", &self.base_url)
            .field("role", &self.role)
            .field("auth_mount", &self.auth_mount)
            .finish_non_exhaustive()
    }
}

impl VaultREST {
    /// Build the client; the service-account JWT is read from `token_path` on every login
    ///
    /// # Errors
    /// Returns an error if the CA bundle cannot be loaded or the HTTP client cannot be built
    pub fn new(config: &VaultConfig, token_path: PathBuf) -> Result<Self, VaultError> {
        let mut builder = Client::builder().timeout(Duration::from_secs(VAULT_REQUEST_TIMEOUT_SECS));

        if let Some(ca_path) = &config.ca_cert {
            let pem = std::fs::read(ca_path).map_err(|source| VaultError::CaCert {
                path: ca_path.clone(),
                reason: source.to_string(),
            })?;
            let certificate =
                reqwest::Certificate::from_pem(&pem).map_err(|e| VaultError::CaCert {
                    path: ca_path.clone(),
                    reason: e.to_string(),
                })?;
            builder = builder.add_root_certificate(certificate);
            info!(path = %ca_path.display(), "Trusting additional Vault CA bundle");
        }

        let http_client = builder.build().map_err(VaultError::Client)?;

        info!(addr = %config.addr, role = %config.role, "Initializing Vault REST client");

        Ok(Self {
            http_client,
            base_url: config.addr.trim_end_matches('/').to_string(),
            role: config.role.clone(),
            auth_mount: config.auth_mount.trim_matches('/').to_string(),
            token_path,
        })
    }

    fn login_url(&self) -> String {
        format!("{}/v1/auth/{}/login", self.base_url, self.auth_mount)
    }

    fn kv_url(&self, mount: &str, path: &str) -> String {
        format!(
            "{}/v1/{}/data/{}",
            self.base_url,
            mount.trim_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn read_jwt(&self) -> Result<Zeroizing<String>, VaultError> {
        let raw = tokio::fs::read_to_string(&self.token_path)
            .await
            .map_err(|source| VaultError::TokenRead {
                path: self.token_path.clone(),
                source,
            })?;
        Ok(Zeroizing::new(raw.trim().to_string()))
    }

    async fn error_from_response(response: reqwest::Response) -> VaultError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<VaultErrorResponse>(&body) {
            Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.join("; "),
            _ => body,
        };
        VaultError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl KvBackend for VaultREST {
    async fn login(&self) -> Result<BackendSession, VaultError> {
        let jwt = self.read_jwt().await?;
        debug!(url = %self.login_url(), role = %self.role, "Logging in to Vault");

        let response = self
            .http_client
            .post(self.login_url())
            .json(&LoginRequest {
                role: &self.role,
                jwt: jwt.as_str(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| VaultError::Malformed(format!("login response: {e}")))?;
        let auth = body
            .auth
            .ok_or_else(|| VaultError::Malformed("login response has no auth block".to_string()))?;

        Ok(BackendSession::new(
            auth.client_token,
            Duration::from_secs(auth.lease_duration),
        ))
    }

    async fn read_document(
        &self,
        session: &BackendSession,
        mount: &str,
        path: &str,
    ) -> Result<Map<String, Value>, VaultError> {
        let response = self
            .http_client
            .get(self.kv_url(mount, path))
            .header("X-Vault-Token", session.token())
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(VaultError::NotFound {
                mount: mount.to_string(),
                path: path.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: KvReadResponse = response
            .json()
            .await
            .map_err(|e| VaultError::Malformed(format!("{mount}/{path}: {e}")))?;
        body.data
            .and_then(|version| version.data)
            .ok_or_else(|| VaultError::Malformed(format!("{mount}/{path}: response has no data")))
    }
}
