//! # Secret Mapping
//!
//! Parses the mapping file that declares every desired secret and the Vault
//! fields supplying its keys.
//!
//! ```yaml
//! team-a/db-cred:
//!   - "password:secretv2/team-a/db:password"
//!   - "username:secretv2/team-a/db:username"
//! team-a/registry-dockerconfigjson:
//!   - "secretv2/shared/registry:gitlab"
//! ```
//!
//! Plain entries use `{destinationKey}:{mount}/{path}:{field}`. Entries whose
//! name contains `dockerconfigjson` use `{mount}/{path}:{prefix}` and are
//! composed from the `{prefix}/host`, `{prefix}/username` and
//! `{prefix}/password` fields.

use crate::constants::DOCKER_CONFIG_MARKER;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, warn};

static DNS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$")
        .expect("Failed to compile DNS label regex - this should never happen")
});

static DNS_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("Failed to compile DNS subdomain regex - this should never happen")
});

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("failed to read mapping file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse mapping file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid mapping key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },
    #[error("invalid value specification {spec:?} for {key}: {reason}")]
    InvalidSpec {
        key: String,
        spec: String,
        reason: &'static str,
    },
    #[error("mapping entry {0} has no value specifications")]
    Empty(String),
}

/// Build the `namespace/name` key used to address secrets and mapping entries
pub fn secret_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// A KV v2 document address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvLocation {
    pub mount: String,
    pub path: String,
}

impl KvLocation {
    fn parse(raw: &str) -> Option<Self> {
        let (mount, path) = raw.split_once('/')?;
        if mount.is_empty() || path.is_empty() {
            return None;
        }
        Some(Self {
            mount: mount.to_string(),
            path: path.to_string(),
        })
    }
}

impl std::fmt::Display for KvLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.mount, self.path)
    }
}

/// One field copied verbatim into the secret under `destination_key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainValue {
    pub destination_key: String,
    pub location: KvLocation,
    pub field: String,
}

impl PlainValue {
    fn parse(key: &str, spec: &str) -> Result<Self, MappingError> {
        let invalid = |reason| MappingError::InvalidSpec {
            key: key.to_string(),
            spec: spec.to_string(),
            reason,
        };
        let mut parts = spec.splitn(3, ':');
        let (Some(destination_key), Some(location), Some(field)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("expected destinationKey:mount/path:field"));
        };
        if destination_key.is_empty() || field.is_empty() {
            return Err(invalid("destination key and field must not be empty"));
        }
        let location = KvLocation::parse(location).ok_or_else(|| invalid("expected mount/path"))?;
        Ok(Self {
            destination_key: destination_key.to_string(),
            location,
            field: field.to_string(),
        })
    }
}

/// Registry credentials composed from `{prefix}/host`, `/username` and `/password`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerValue {
    pub location: KvLocation,
    pub prefix: String,
}

impl DockerValue {
    fn parse(key: &str, spec: &str) -> Result<Self, MappingError> {
        let invalid = |reason| MappingError::InvalidSpec {
            key: key.to_string(),
            spec: spec.to_string(),
            reason,
        };
        let (location, prefix) = spec
            .split_once(':')
            .ok_or_else(|| invalid("expected mount/path:prefix"))?;
        if prefix.is_empty() {
            return Err(invalid("prefix must not be empty"));
        }
        let location = KvLocation::parse(location).ok_or_else(|| invalid("expected mount/path"))?;
        Ok(Self {
            location,
            prefix: prefix.to_string(),
        })
    }

    pub fn host_field(&self) -> String {
        format!("{}/host", self.prefix)
    }

    pub fn username_field(&self) -> String {
        format!("{}/username", self.prefix)
    }

    pub fn password_field(&self) -> String {
        format!("{}/password", self.prefix)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryForm {
    Plain(Vec<PlainValue>),
    DockerRegistry(DockerValue),
}

/// One desired secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub namespace: String,
    pub name: String,
    pub form: EntryForm,
}

impl MappingEntry {
    pub fn key(&self) -> String {
        secret_key(&self.namespace, &self.name)
    }

    pub fn is_docker(&self) -> bool {
        matches!(self.form, EntryForm::DockerRegistry(_))
    }
}

/// Whether a secret with this name is composed in the docker-registry form
pub fn is_docker_name(name: &str) -> bool {
    name.contains(DOCKER_CONFIG_MARKER)
}

/// The full desired state, keyed by `namespace/name`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretMapping {
    entries: BTreeMap<String, MappingEntry>,
}

impl SecretMapping {
    /// Read and validate the mapping file
    pub fn load(path: &Path) -> Result<Self, MappingError> {
        debug!(path = %path.display(), "Loading secret mapping");
        let raw = std::fs::read_to_string(path).map_err(|source| MappingError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, MappingError> {
        if raw.trim().is_empty() {
            warn!("Secret mapping is empty, every managed secret will be deleted");
            return Ok(Self::default());
        }
        let declared: BTreeMap<String, Vec<String>> = serde_yaml::from_str(raw)?;
        Self::from_declared(declared)
    }

    /// Build from already-deserialized `namespace/name -> [spec]` pairs
    pub fn from_declared(declared: BTreeMap<String, Vec<String>>) -> Result<Self, MappingError> {
        let mut entries = BTreeMap::new();
        for (key, specs) in declared {
            let entry = parse_entry(&key, &specs)?;
            entries.insert(key, entry);
        }
        Ok(Self { entries })
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<&MappingEntry> {
        self.entries.get(&secret_key(namespace, name))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<MappingEntry> {
        self.entries.remove(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = &MappingEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_entry(key: &str, specs: &[String]) -> Result<MappingEntry, MappingError> {
    let invalid_key = |reason: &str| MappingError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    let (namespace, name) = key
        .split_once('/')
        .ok_or_else(|| invalid_key("expected namespace/name"))?;
    if name.contains('/') {
        return Err(invalid_key("expected exactly one '/'"));
    }
    if namespace.len() > 63 || !DNS_LABEL.is_match(namespace) {
        return Err(invalid_key("namespace is not a valid DNS-1123 label"));
    }
    if name.len() > 253 || !DNS_SUBDOMAIN.is_match(name) {
        return Err(invalid_key("name is not a valid DNS-1123 subdomain"));
    }
    if specs.is_empty() {
        return Err(MappingError::Empty(key.to_string()));
    }

    let form = if is_docker_name(name) {
        if specs.len() > 1 {
            warn!(
                secret.key = key,
                ignored = specs.len() - 1,
                "Docker registry entry uses only its first value specification"
            );
        }
        EntryForm::DockerRegistry(DockerValue::parse(key, &specs[0])?)
    } else {
        let values = specs
            .iter()
            .map(|spec| PlainValue::parse(key, spec))
            .collect::<Result<Vec<_>, _>>()?;
        EntryForm::Plain(values)
    };

    Ok(MappingEntry {
        namespace: namespace.to_string(),
        name: name.to_string(),
        form,
    })
}
