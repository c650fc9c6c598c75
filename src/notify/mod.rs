//! # Notifications
//!
//! Fire-and-forget alerts for operators. Delivery runs in the background and
//! never blocks or fails reconciliation.

use thiserror::Error;

mod telegram;

pub use telegram::{TelegramNotifier, TelegramSettings};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request to notification sink failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notification sink returned {0}")]
    Status(u16),
    #[error("invalid notifier settings: {0}")]
    InvalidSettings(String),
}

/// An alert sink
pub trait Notifier: Send + Sync + std::fmt::Debug {
    /// Queue `message` for delivery; must return without waiting on the network
    fn notify(&self, message: &str);
}

/// Drops every message
#[derive(Debug, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, message: &str) {
        tracing::trace!(message, "Notification dropped");
    }
}
