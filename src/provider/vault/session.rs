//! # Backend Session
//!
//! A Vault client token and its lease. Sessions are immutable: renewal builds a
//! new one and swaps it in whole.

use crate::constants::{LEASE_RENEWAL_MARGIN_SECS, MIN_RENEWAL_DELAY_SECS};
use std::time::Duration;
use tokio::time::Instant;
use zeroize::Zeroizing;

pub struct BackendSession {
    token: Zeroizing<String>,
    lease_duration: Duration,
    issued_at: Instant,
}

impl std::fmt::Debug for BackendSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSession")
            .field("lease_duration", &self.lease_duration)
            .field("issued_at", &self.issued_at)
            .finish_non_exhaustive()
    }
}

impl BackendSession {
    /// Record a freshly issued token; the issuance instant is taken now
    pub fn new(token: impl Into<String>, lease_duration: Duration) -> Self {
        Self {
            token: Zeroizing::new(token.into()),
            lease_duration,
            issued_at: Instant::now(),
        }
    }

    pub fn token(&self) -> &str {
        self.token.as_str()
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    /// Vault reports a zero lease for tokens that never expire
    pub fn is_non_expiring(&self) -> bool {
        self.lease_duration.is_zero()
    }

    pub fn is_expired(&self) -> bool {
        !self.is_non_expiring() && Instant::now() >= self.issued_at + self.lease_duration
    }

    /// Delay from issuance after which a relogin should happen
    ///
    /// `None` for non-expiring tokens.
    pub fn renew_after(&self) -> Option<Duration> {
        if self.is_non_expiring() {
            return None;
        }
        Some(
            self.lease_duration
                .saturating_sub(Duration::from_secs(LEASE_RENEWAL_MARGIN_SECS))
                .max(Duration::from_secs(MIN_RENEWAL_DELAY_SECS)),
        )
    }

    /// Instant the relogin is due; may already be in the past
    pub fn renew_at(&self) -> Option<Instant> {
        self.renew_after().map(|delay| self.issued_at + delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renew_after_subtracts_margin() {
        let session = BackendSession::new("s.token", Duration::from_secs(3600));
        assert_eq!(session.renew_after(), Some(Duration::from_secs(3590)));
    }

    #[test]
    fn test_renew_after_has_floor() {
        let session = BackendSession::new("s.token", Duration::from_secs(5));
        assert_eq!(session.renew_after(), Some(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_at_is_anchored_to_issuance() {
        let session = BackendSession::new("s.token", Duration::from_secs(20));
        let due = session.issued_at() + Duration::from_secs(10);
        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(session.renew_at(), Some(due));
        assert!(session.renew_at().is_some_and(|at| at <= Instant::now()));
    }

    #[test]
    fn test_zero_lease_never_renews() {
        let session = BackendSession::new("root", Duration::ZERO);
        assert!(session.is_non_expiring());
        assert!(!session.is_expired());
        assert_eq!(session.renew_after(), None);
        assert_eq!(session.renew_at(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_expires_after_lease() {
        let session = BackendSession::new("s.token", Duration::from_secs(30));
        assert!(!session.is_expired());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(session.is_expired());
    }

    #[test]
    fn test_debug_hides_token() {
        let session = BackendSession::new("s.very-secret", Duration::from_secs(60));
        assert!(!format!("{session:?}").contains("very-secret"));
    }
}
