//! # Controller Configuration
//!
//! Controller-level settings. Layered as: built-in defaults, then the optional
//! YAML config file, then environment variables.

use crate::constants::{
    DEFAULT_HTTP_ADDR, DEFAULT_INTERVAL_SECS, DEFAULT_SECRET_LABEL, DEFAULT_SECRET_MAP,
    DEFAULT_TELEGRAM_VAULT_PATH, DEFAULT_TOKEN_PATH, DEFAULT_VAULT_ADDR, DEFAULT_VAULT_AUTH_MOUNT,
    DEFAULT_VAULT_ROLE, DEFAULT_WATCH_RESTART_DELAY_SECS,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A string that never shows up in logs or serialized config dumps.
#[derive(Clone, Default, PartialEq, Eq, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Redacted(String);

impl Redacted {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn mask(&self) -> &'static str {
        if self.0.is_empty() {
            ""
        } else {
            "XXX"
        }
    }
}

impl std::fmt::Debug for Redacted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.mask())
    }
}

impl Serialize for Redacted {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.mask())
    }
}

/// Vault connection and authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VaultConfig {
    /// Vault API address, e.g. `https://vault.vault.svc:8200`
    pub addr: String,
    /// Kubernetes auth role the service account logs in as
    pub role: String,
    /// Mount path of the Kubernetes auth method
    pub auth_mount: String,
    /// Optional PEM bundle trusted in addition to the webpki roots
    pub ca_cert: Option<PathBuf>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_VAULT_ADDR.to_string(),
            role: DEFAULT_VAULT_ROLE.to_string(),
            auth_mount: DEFAULT_VAULT_AUTH_MOUNT.to_string(),
            ca_cert: None,
        }
    }
}

/// Telegram alert sink settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TelegramConfig {
    pub channel: i64,
    pub token: Redacted,
    /// KV v2 document (`mount/path`) whose `channel`/`token` fields override the above
    pub vault_path: Option<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            token: Redacted::default(),
            vault_path: Some(DEFAULT_TELEGRAM_VAULT_PATH.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpConfig {
    pub addr: String,
    /// Path every endpoint is served under, e.g. `/syncer`; empty serves at the root
    pub route_prefix: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_HTTP_ADDR.to_string(),
            route_prefix: String::new(),
        }
    }
}

impl HttpConfig {
    /// Normalized prefix (`/a/b`, no trailing slash), `None` when endpoints sit at the root
    pub fn route_prefix(&self) -> Option<String> {
        let trimmed = self.route_prefix.trim().trim_matches('/');
        if trimmed.is_empty() {
            return None;
        }
        Some(format!("/{trimmed}"))
    }
}

/// Controller-level configuration
///
/// Built once at startup and handed to each component's constructor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Global log level (error, warn, info, debug, trace)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
    /// Log intended cluster writes instead of issuing them
    pub dry_run: bool,
    /// Use the pod's service account instead of a kubeconfig
    pub in_cluster: bool,
    pub kubeconfig: Option<PathBuf>,
    /// Service account token presented to Vault's Kubernetes auth method
    pub token_path: PathBuf,
    pub vault: VaultConfig,
    /// Managed secrets carry the label `{secret_label}/sync=true`
    pub secret_label: String,
    /// Path of the mapping file
    pub secret_map: PathBuf,
    /// Full reconciliation interval (seconds)
    #[serde(rename = "interval")]
    pub interval_secs: u64,
    /// Delay before re-opening a dropped watch (seconds)
    pub watch_restart_delay_secs: u64,
    pub telegram: TelegramConfig,
    pub http: HttpConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            dry_run: false,
            in_cluster: true,
            kubeconfig: None,
            token_path: PathBuf::from(DEFAULT_TOKEN_PATH),
            vault: VaultConfig::default(),
            secret_label: DEFAULT_SECRET_LABEL.to_string(),
            secret_map: PathBuf::from(DEFAULT_SECRET_MAP),
            interval_secs: DEFAULT_INTERVAL_SECS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            telegram: TelegramConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from `path` (if present) and the process environment
    ///
    /// A missing config file is not an error; defaults and environment apply.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides; `lookup` returns the value of a variable if set
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_string(&mut self.log_level, lookup("LOG_LEVEL"));
        override_string(&mut self.log_format, lookup("LOG_FORMAT"));
        override_bool(&mut self.dry_run, "DRY_RUN", lookup("DRY_RUN"))?;
        override_bool(&mut self.in_cluster, "IN_CLUSTER", lookup("IN_CLUSTER"))?;
        if let Some(path) = lookup("KUBECONFIG").filter(|v| !v.is_empty()) {
            self.kubeconfig = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("TOKEN_PATH").filter(|v| !v.is_empty()) {
            self.token_path = PathBuf::from(path);
        }
        override_string(&mut self.vault.addr, lookup("VAULT_ADDR"));
        override_string(&mut self.vault.role, lookup("VAULT_ROLE"));
        override_string(&mut self.vault.auth_mount, lookup("VAULT_AUTH_MOUNT"));
        if let Some(path) = lookup("VAULT_CACERT").filter(|v| !v.is_empty()) {
            self.vault.ca_cert = Some(PathBuf::from(path));
        }
        override_string(&mut self.secret_label, lookup("SECRET_LABEL"));
        if let Some(path) = lookup("SECRET_MAP").filter(|v| !v.is_empty()) {
            self.secret_map = PathBuf::from(path);
        }
        override_parsed(&mut self.interval_secs, "INTERVAL", lookup("INTERVAL"))?;
        override_parsed(
            &mut self.watch_restart_delay_secs,
            "WATCH_RESTART_DELAY_SECS",
            lookup("WATCH_RESTART_DELAY_SECS"),
        )?;
        override_parsed(
            &mut self.telegram.channel,
            "TELEGRAM_ALERT_CHANNEL",
            lookup("TELEGRAM_ALERT_CHANNEL"),
        )?;
        if let Some(token) = lookup("TELEGRAM_TOKEN").filter(|v| !v.is_empty()) {
            self.telegram.token = Redacted::new(token);
        }
        if let Some(path) = lookup("TELEGRAM_VAULT_PATH") {
            // An explicitly empty value disables the Vault lookup
            self.telegram.vault_path = Some(path).filter(|p| !p.is_empty());
        }
        override_string(&mut self.http.addr, lookup("HTTP_ADDR"));
        override_string(&mut self.http.route_prefix, lookup("HTTP_ROUTE_PREFIX"));
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "interval must be at least 1 second".to_string(),
            ));
        }
        if self.secret_label.trim().is_empty() {
            return Err(ConfigError::Invalid("secretLabel must not be empty".to_string()));
        }
        if self.vault.addr.trim().is_empty() {
            return Err(ConfigError::Invalid("vault.addr must not be empty".to_string()));
        }
        if self
            .http
            .route_prefix
            .trim()
            .contains(|c: char| matches!(c, '{' | '}' | '*' | '?' | '#') || c.is_whitespace())
        {
            return Err(ConfigError::Invalid(format!(
                "http.routePrefix {:?} must be a plain path",
                self.http.route_prefix
            )));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Label key placed on every managed secret
    pub fn sync_label_key(&self) -> String {
        format!("{}/sync", self.secret_label)
    }

    /// Label selector matching every managed secret
    pub fn label_selector(&self) -> String {
        format!("{}=true", self.sync_label_key())
    }
}

fn override_string(target: &mut String, value: Option<String>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        *target = value;
    }
}

fn override_bool(
    target: &mut bool,
    key: &'static str,
    value: Option<String>,
) -> Result<(), ConfigError> {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return Ok(());
    };
    *target = match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => return Err(ConfigError::InvalidEnv { key, value }),
    };
    Ok(())
}

fn override_parsed<T: std::str::FromStr>(
    target: &mut T,
    key: &'static str,
    value: Option<String>,
) -> Result<(), ConfigError> {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return Ok(());
    };
    let Ok(parsed) = value.trim().parse() else {
        return Err(ConfigError::InvalidEnv { key, value });
    };
    *target = parsed;
    Ok(())
}
