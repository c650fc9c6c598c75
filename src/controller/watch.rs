//! # Watch Driver
//!
//! Live reconciliation from a watch on managed secrets.
//!
//! A supervisor spawns one task per connection attempt. When the task ends
//! for any reason other than cancellation (stream closed, watch failed to
//! open, panic) the supervisor waits the restart delay and tries again.

use crate::controller::reconciler::{Reconciler, TriggerSource};
use crate::observability::metrics;
use crate::store::SecretEvent;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why one watch connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchExit {
    /// The API server closed the stream
    Closed,
    /// Shutdown was requested
    Cancelled,
    /// The watch could not be opened
    OpenFailed,
}

#[derive(Debug)]
pub struct WatchDriver {
    reconciler: Arc<Reconciler>,
    restart_delay: Duration,
}

impl WatchDriver {
    pub fn new(reconciler: Arc<Reconciler>, restart_delay: Duration) -> Self {
        Self {
            reconciler,
            restart_delay,
        }
    }

    /// Supervise watch connections until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        info!("Watch driver started");
        let mut first = true;

        while !cancel.is_cancelled() {
            if !first {
                metrics::increment_watch_restarts();
            }
            first = false;

            let task = tokio::spawn(watch_once(Arc::clone(&self.reconciler), cancel.clone()));
            let exit = match task.await {
                Ok(exit) => exit,
                Err(e) if e.is_panic() => {
                    error!("Watch task panicked");
                    WatchExit::Closed
                }
                Err(e) => {
                    warn!(error = %e, "Watch task ended abnormally");
                    WatchExit::Closed
                }
            };

            if exit == WatchExit::Cancelled {
                break;
            }

            warn!(
                reason = ?exit,
                "Secret watch disconnected, restarting in {} ms...",
                self.restart_delay.as_millis()
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.restart_delay) => {}
            }
        }

        info!("Watch driver stopped");
    }
}

/// One watch connection: open, feed events to the reconciler, report how it ended
pub async fn watch_once(reconciler: Arc<Reconciler>, cancel: CancellationToken) -> WatchExit {
    let opened = tokio::select! {
        biased;
        () = cancel.cancelled() => return WatchExit::Cancelled,
        opened = reconciler.store().watch(reconciler.selector()) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Failed to open secret watch");
            return WatchExit::OpenFailed;
        }
    };
    info!("Watching managed secrets");

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return WatchExit::Cancelled,
            next = stream.next() => next,
        };

        match next {
            None => return WatchExit::Closed,
            Some(Err(e)) => {
                warn!(error = %e, "Skipping undecodable watch event");
            }
            Some(Ok(event)) => {
                metrics::increment_watch_events(event.kind());
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return WatchExit::Cancelled,
                    () = handle_event(&reconciler, event) => {}
                }
            }
        }
    }
}

async fn handle_event(reconciler: &Reconciler, event: SecretEvent) {
    match event {
        SecretEvent::Added(secret) | SecretEvent::Modified(secret) => {
            match reconciler.reconcile_one(&secret).await {
                Ok(outcome) => debug!(?outcome, "Watch event reconciled"),
                Err(e) => {
                    metrics::increment_reconciliation_errors(TriggerSource::Watch.as_str());
                    warn!(error = %e, "Watch event could not be reconciled");
                }
            }
        }
        SecretEvent::Error { code, message } => {
            warn!(code, message = %message, "Watch reported an error");
        }
        SecretEvent::Deleted(_) | SecretEvent::Bookmark => {
            debug!("Ignoring watch event");
        }
    }
}
