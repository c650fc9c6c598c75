//! # Controller
//!
//! - `backoff`: exponential backoff for relogin retries
//! - `reconciler`: diff/apply logic shared by both drivers
//! - `poll`: interval and force-update driver
//! - `watch`: watch-event driver with restart supervision

pub mod backoff;
pub mod poll;
pub mod reconciler;
pub mod watch;

pub use poll::PollDriver;
pub use reconciler::{Outcome, PassSummary, Reconciler, ReconcilerError, TriggerSource};
pub use watch::{WatchDriver, WatchExit};
