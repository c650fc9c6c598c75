//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! the config file or environment variables where applicable.

/// Default HTTP bind address for metrics and health checks
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";

/// Default full reconciliation interval (seconds)
pub const DEFAULT_INTERVAL_SECS: u64 = 900;

/// Default delay before re-opening a watch that ended or failed to open (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 1;

/// Time subtracted from the Vault lease duration when scheduling a relogin
pub const LEASE_RENEWAL_MARGIN_SECS: u64 = 10;

/// Lower bound for the relogin delay, so a tiny lease cannot spin the renewal loop
pub const MIN_RENEWAL_DELAY_SECS: u64 = 1;

/// Relogin retry backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Relogin retry backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Timeout for a single Vault HTTP request (seconds)
pub const VAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_VAULT_ADDR: &str = "https://vault-active.vault.svc.cluster.local:8200";
pub const DEFAULT_VAULT_ROLE: &str = "vault-secret-syncer";
pub const DEFAULT_VAULT_AUTH_MOUNT: &str = "kubernetes";
pub const DEFAULT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Label prefix; managed secrets carry `{label}/sync=true`
pub const DEFAULT_SECRET_LABEL: &str = "vault-injector";
pub const DEFAULT_SECRET_MAP: &str = "map.yaml";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// KV v2 document holding the notifier's `channel` and `token`
pub const DEFAULT_TELEGRAM_VAULT_PATH: &str = "projects/share/telegram";
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Substring of a mapping entry name that selects the docker-registry form
pub const DOCKER_CONFIG_MARKER: &str = "dockerconfigjson";

/// Data key of a `kubernetes.io/dockerconfigjson` secret
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

pub const SECRET_TYPE_OPAQUE: &str = "Opaque";
pub const SECRET_TYPE_DOCKER_CONFIG_JSON: &str = "kubernetes.io/dockerconfigjson";
