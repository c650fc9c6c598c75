//! # Configuration
//!
//! Controller configuration, loaded once at startup and passed explicitly to
//! each component.

pub mod controller;

pub use controller::{ConfigError, ControllerConfig, HttpConfig, Redacted, TelegramConfig, VaultConfig};
