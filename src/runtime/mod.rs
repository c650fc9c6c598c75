//! # Runtime
//!
//! Startup composition and the background task lifecycle.

pub mod initialization;

pub use initialization::{initialize, run, InitializationResult};
