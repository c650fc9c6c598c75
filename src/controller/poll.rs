//! # Poll Driver
//!
//! Full reconciliation on a fixed interval and on demand.
//!
//! On start only missing secrets are created; every later pass (timer tick or
//! force signal) first reconciles existing secrets, then creates missing ones.
//!
//! Each pass runs in its own task. A pass that panics is logged and counted,
//! and the next trigger runs normally.

use crate::controller::reconciler::{PassSummary, Reconciler, ReconcilerError, TriggerSource};
use crate::observability::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{error, info, warn};

#[derive(Debug)]
pub struct PollDriver {
    reconciler: Arc<Reconciler>,
    interval: Duration,
    force_rx: mpsc::Receiver<()>,
}

impl PollDriver {
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration, force_rx: mpsc::Receiver<()>) -> Self {
        Self {
            reconciler,
            interval,
            force_rx,
        }
    }

    /// Run until `cancel` fires. Ticks queued at cancellation are dropped.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Poll driver started");

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("Poll driver stopped");
                return;
            }
            () = self.pass(TriggerSource::Startup) => {}
        }

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let trigger = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(()) = self.force_rx.recv() => TriggerSource::Force,
                _ = ticker.tick() => TriggerSource::Timer,
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = self.pass(trigger) => {}
            }
        }

        info!("Poll driver stopped");
    }

    async fn pass(&self, trigger: TriggerSource) {
        info!(trigger = trigger.as_str(), "Reconciliation pass started");
        metrics::increment_reconciliations(trigger.as_str());
        let start = Instant::now();

        // Aborted if the driver is cancelled mid-pass
        let task = AbortOnDropHandle::new(tokio::spawn(run_pass(Arc::clone(&self.reconciler), trigger)));
        let result = match task.await {
            Ok(result) => result,
            Err(e) => {
                metrics::increment_reconciliation_errors(trigger.as_str());
                if e.is_panic() {
                    error!(trigger = trigger.as_str(), "Reconciliation pass panicked");
                } else {
                    warn!(trigger = trigger.as_str(), error = %e, "Reconciliation pass ended abnormally");
                }
                return;
            }
        };

        let elapsed = start.elapsed();
        metrics::observe_reconciliation_duration(elapsed.as_secs_f64());
        report(trigger, &result, elapsed);
    }

    /// `reconcile_existing` followed by `reconcile_missing`
    pub async fn full_pass(&self) -> Result<PassSummary, ReconcilerError> {
        full_pass(&self.reconciler).await
    }

    /// Create secrets for mapping entries the cluster does not have
    pub async fn missing_pass(&self) -> Result<PassSummary, ReconcilerError> {
        missing_pass(&self.reconciler).await
    }
}

async fn run_pass(
    reconciler: Arc<Reconciler>,
    trigger: TriggerSource,
) -> Result<PassSummary, ReconcilerError> {
    match trigger {
        TriggerSource::Startup => missing_pass(&reconciler).await,
        _ => full_pass(&reconciler).await,
    }
}

async fn full_pass(reconciler: &Reconciler) -> Result<PassSummary, ReconcilerError> {
    let actual = reconciler.list_managed().await?;
    let mut summary = reconciler.reconcile_existing(&actual).await;
    summary.merge(missing_pass(reconciler).await?);
    Ok(summary)
}

async fn missing_pass(reconciler: &Reconciler) -> Result<PassSummary, ReconcilerError> {
    // Listed again so deletions and watch-driven creates since the last list are seen
    let actual = reconciler.list_managed().await?;
    let snapshot = reconciler.source().snapshot().await;
    Ok(reconciler.reconcile_missing(&actual, &snapshot).await)
}

fn report(trigger: TriggerSource, result: &Result<PassSummary, ReconcilerError>, elapsed: Duration) {
    match result {
        Ok(summary) => {
            for e in &summary.errors {
                warn!(trigger = trigger.as_str(), error = %e, "Secret could not be reconciled");
            }
            if !summary.errors.is_empty() {
                metrics::increment_reconciliation_errors(trigger.as_str());
            }
            info!(
                trigger = trigger.as_str(),
                created = summary.created,
                updated = summary.updated,
                deleted = summary.deleted,
                unchanged = summary.unchanged,
                skipped = summary.skipped,
                errors = summary.errors.len(),
                elapsed_ms = elapsed.as_millis(),
                "Reconciliation pass finished"
            );
        }
        Err(e) => {
            metrics::increment_reconciliation_errors(trigger.as_str());
            error!(trigger = trigger.as_str(), error = %e, "Reconciliation pass failed");
        }
    }
}
