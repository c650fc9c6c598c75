//! # Exponential Backoff
//!
//! Retry delays for Vault relogin after a failed lease renewal.
//!
//! Each failure doubles the delay up to a cap; a successful login resets it.
//!
//! ## Usage
//!
//! ```rust
//! use vault_secret_syncer::controller::backoff::ExponentialBackoff;
//!
//! let mut backoff = ExponentialBackoff::new(1000, 30_000); // 1s start, 30s max
//! assert_eq!(backoff.next_backoff_millis(), 1000);
//! assert_eq!(backoff.next_backoff_millis(), 2000);
//! assert_eq!(backoff.next_backoff_millis(), 4000);
//! ```

use std::time::Duration;

/// Exponential backoff calculator
///
/// Values are tracked in milliseconds so sub-second starting delays stay exact.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Starting value in milliseconds (for reset)
    start_millis: u64,
    /// Value returned by the next call
    current_millis: u64,
    /// Maximum value in milliseconds
    max_millis: u64,
}

impl ExponentialBackoff {
    /// Create a backoff starting at `start_millis`, doubling up to `max_millis`
    #[must_use]
    pub fn new(start_millis: u64, max_millis: u64) -> Self {
        let start_millis = start_millis.max(1);
        Self {
            start_millis,
            current_millis: start_millis.min(max_millis.max(1)),
            max_millis: max_millis.max(1),
        }
    }

    /// Get the next backoff duration in milliseconds and advance the sequence
    pub fn next_backoff_millis(&mut self) -> u64 {
        let result = self.current_millis;
        self.current_millis = self.current_millis.saturating_mul(2).min(self.max_millis);
        result
    }

    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_millis(self.next_backoff_millis())
    }

    /// Reset to the starting value after a success
    pub fn reset(&mut self) {
        self.current_millis = self.start_millis.min(self.max_millis);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_sequence() {
        let mut backoff = ExponentialBackoff::new(1000, 30_000);

        assert_eq!(backoff.next_backoff_millis(), 1000);
        assert_eq!(backoff.next_backoff_millis(), 2000);
        assert_eq!(backoff.next_backoff_millis(), 4000);
        assert_eq!(backoff.next_backoff_millis(), 8000);
        assert_eq!(backoff.next_backoff_millis(), 16_000);
        // 32s would exceed the cap
        assert_eq!(backoff.next_backoff_millis(), 30_000);
        assert_eq!(backoff.next_backoff_millis(), 30_000);
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff = ExponentialBackoff::new(1000, 30_000);
        backoff.next_backoff_millis();
        backoff.next_backoff_millis();
        backoff.next_backoff_millis();

        backoff.reset();

        assert_eq!(backoff.next_backoff_millis(), 1000);
        assert_eq!(backoff.next_backoff_millis(), 2000);
    }

    #[test]
    fn test_exponential_backoff_as_duration() {
        let mut backoff = ExponentialBackoff::new(500, 1000);
        assert_eq!(backoff.next_backoff(), Duration::from_millis(500));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(1000));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(1000));
    }

    #[test]
    fn test_exponential_backoff_start_above_max_is_capped() {
        let mut backoff = ExponentialBackoff::new(5000, 2000);
        assert_eq!(backoff.next_backoff_millis(), 2000);
        assert_eq!(backoff.next_backoff_millis(), 2000);
    }

    #[test]
    fn test_exponential_backoff_independent_state() {
        let mut first = ExponentialBackoff::new(1000, 30_000);
        let mut second = first.clone();

        assert_eq!(first.next_backoff_millis(), 1000);
        assert_eq!(first.next_backoff_millis(), 2000);
        assert_eq!(second.next_backoff_millis(), 1000);
    }
}
