//! # Metrics
//!
//! Prometheus metrics for monitoring the syncer.
//!
//! ## Metrics Exposed
//!
//! - `vault_syncer_reconciliations_total` - Reconciliation passes, labelled by driver
//! - `vault_syncer_reconciliation_errors_total` - Failed passes, labelled by driver
//! - `vault_syncer_reconciliation_duration_seconds` - Duration of reconciliation passes
//! - `vault_syncer_secret_operations_total` - Cluster writes, labelled by operation
//! - `vault_syncer_secret_operation_errors_total` - Failed cluster writes, labelled by operation
//! - `vault_syncer_secrets_skipped_total` - Secrets left stale after a backend read error
//! - `vault_syncer_secrets_managed` - Managed secrets seen in the last full pass
//! - `vault_syncer_vault_reads_total` / `vault_syncer_vault_read_errors_total`
//! - `vault_syncer_vault_logins_total` / `vault_syncer_vault_login_errors_total`
//! - `vault_syncer_vault_session_healthy` - 1 while the current session is usable
//! - `vault_syncer_watch_restarts_total` - Watch connections re-opened
//! - `vault_syncer_watch_events_total` - Watch events received, labelled by kind

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "vault_syncer_reconciliations_total",
            "Total number of reconciliation passes",
        ),
        &["driver"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "vault_syncer_reconciliation_errors_total",
            "Total number of reconciliation passes that failed",
        ),
        &["driver"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "vault_syncer_reconciliation_duration_seconds",
            "Duration of reconciliation passes in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static SECRET_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "vault_syncer_secret_operations_total",
            "Total number of cluster secret writes",
        ),
        &["operation"],
    )
    .expect("Failed to create SECRET_OPERATIONS_TOTAL metric - this should never happen")
});

static SECRET_OPERATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "vault_syncer_secret_operation_errors_total",
            "Total number of failed cluster secret writes",
        ),
        &["operation"],
    )
    .expect("Failed to create SECRET_OPERATION_ERRORS_TOTAL metric - this should never happen")
});

static SECRETS_SKIPPED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_syncer_secrets_skipped_total",
        "Total number of secrets left unchanged because Vault could not be read",
    )
    .expect("Failed to create SECRETS_SKIPPED_TOTAL metric - this should never happen")
});

static SECRETS_MANAGED: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "vault_syncer_secrets_managed",
        "Number of managed secrets seen in the last full pass",
    )
    .expect("Failed to create SECRETS_MANAGED metric - this should never happen")
});

static VAULT_READS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("vault_syncer_vault_reads_total", "Total number of Vault reads")
        .expect("Failed to create VAULT_READS_TOTAL metric - this should never happen")
});

static VAULT_READ_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_syncer_vault_read_errors_total",
        "Total number of failed Vault reads",
    )
    .expect("Failed to create VAULT_READ_ERRORS_TOTAL metric - this should never happen")
});

static VAULT_LOGINS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("vault_syncer_vault_logins_total", "Total number of Vault logins")
        .expect("Failed to create VAULT_LOGINS_TOTAL metric - this should never happen")
});

static VAULT_LOGIN_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_syncer_vault_login_errors_total",
        "Total number of failed Vault logins",
    )
    .expect("Failed to create VAULT_LOGIN_ERRORS_TOTAL metric - this should never happen")
});

static VAULT_SESSION_HEALTHY: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "vault_syncer_vault_session_healthy",
        "1 while the Vault session is usable, 0 while renewal is failing",
    )
    .expect("Failed to create VAULT_SESSION_HEALTHY metric - this should never happen")
});

static WATCH_RESTARTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_syncer_watch_restarts_total",
        "Total number of watch connections re-opened",
    )
    .expect("Failed to create WATCH_RESTARTS_TOTAL metric - this should never happen")
});

static WATCH_EVENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "vault_syncer_watch_events_total",
            "Total number of watch events received",
        ),
        &["kind"],
    )
    .expect("Failed to create WATCH_EVENTS_TOTAL metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(SECRET_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRET_OPERATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRETS_SKIPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRETS_MANAGED.clone()))?;
    REGISTRY.register(Box::new(VAULT_READS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(VAULT_READ_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(VAULT_LOGINS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(VAULT_LOGIN_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(VAULT_SESSION_HEALTHY.clone()))?;
    REGISTRY.register(Box::new(WATCH_RESTARTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WATCH_EVENTS_TOTAL.clone()))?;
    Ok(())
}

pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

pub fn increment_reconciliations(driver: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[driver]).inc();
}

pub fn increment_reconciliation_errors(driver: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[driver]).inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_secret_operations(operation: &str) {
    SECRET_OPERATIONS_TOTAL.with_label_values(&[operation]).inc();
}

pub fn increment_secret_operation_errors(operation: &str) {
    SECRET_OPERATION_ERRORS_TOTAL
        .with_label_values(&[operation])
        .inc();
}

pub fn increment_secrets_skipped() {
    SECRETS_SKIPPED_TOTAL.inc();
}

pub fn set_secrets_managed(count: i64) {
    SECRETS_MANAGED.set(count);
}

pub fn increment_vault_reads() {
    VAULT_READS_TOTAL.inc();
}

pub fn increment_vault_read_errors() {
    VAULT_READ_ERRORS_TOTAL.inc();
}

pub fn increment_vault_logins() {
    VAULT_LOGINS_TOTAL.inc();
}

pub fn increment_vault_login_errors() {
    VAULT_LOGIN_ERRORS_TOTAL.inc();
}

pub fn set_vault_session_healthy(healthy: bool) {
    VAULT_SESSION_HEALTHY.set(i64::from(healthy));
}

pub fn increment_watch_restarts() {
    WATCH_RESTARTS_TOTAL.inc();
}

pub fn increment_watch_events(kind: &str) {
    WATCH_EVENTS_TOTAL.with_label_values(&[kind]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        assert!(register_metrics().is_ok());
    }

    #[test]
    fn test_increment_reconciliations() {
        let before = RECONCILIATIONS_TOTAL.with_label_values(&["poll"]).get();
        increment_reconciliations("poll");
        let after = RECONCILIATIONS_TOTAL.with_label_values(&["poll"]).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_reconciliation_errors() {
        let before = RECONCILIATION_ERRORS_TOTAL
            .with_label_values(&["watch"])
            .get();
        increment_reconciliation_errors("watch");
        let after = RECONCILIATION_ERRORS_TOTAL
            .with_label_values(&["watch"])
            .get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_observe_reconciliation_duration() {
        observe_reconciliation_duration(0.5);
        // Just verify it doesn't panic
    }

    #[test]
    fn test_increment_secret_operations() {
        let before = SECRET_OPERATIONS_TOTAL
            .with_label_values(&["delete"])
            .get();
        increment_secret_operations("delete");
        let after = SECRET_OPERATIONS_TOTAL
            .with_label_values(&["delete"])
            .get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_set_vault_session_healthy() {
        set_vault_session_healthy(false);
        assert_eq!(VAULT_SESSION_HEALTHY.get(), 0);
        set_vault_session_healthy(true);
        assert_eq!(VAULT_SESSION_HEALTHY.get(), 1);
    }

    #[test]
    fn test_increment_watch_events() {
        let before = WATCH_EVENTS_TOTAL.with_label_values(&["added"]).get();
        increment_watch_events("added");
        let after = WATCH_EVENTS_TOTAL.with_label_values(&["added"]).get();
        assert_eq!(after, before + 1u64);
    }
}
