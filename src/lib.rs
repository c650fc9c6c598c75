//! Vault Secret Syncer Library
//!
//! Keeps Kubernetes `Secret` objects in sync with HashiCorp Vault KV v2 data,
//! driven by a static mapping file. Tests are included in the module files
//! and in `tests/`.

pub mod config;
pub mod constants;
pub mod controller;
pub mod mapping;
pub mod notify;
pub mod observability;
pub mod provider;
pub mod runtime;
pub mod server;
pub mod store;
