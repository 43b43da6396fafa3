//! Periodic repair of succeeded payments whose order was never confirmed.

use std::sync::Arc;
use std::time::Duration;

use store::PaymentStore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::reconciler::PaymentReconciler;

const DEFAULT_BATCH: i64 = 100;

/// Background task driving [`PaymentReconciler::resync_unsynced`].
pub struct ReconciliationSweep<S> {
    reconciler: Arc<PaymentReconciler<S>>,
    interval: Duration,
    batch: i64,
}

impl<S: PaymentStore + 'static> ReconciliationSweep<S> {
    pub fn new(reconciler: Arc<PaymentReconciler<S>>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
            batch: DEFAULT_BATCH,
        }
    }

    pub fn with_batch(mut self, batch: i64) -> Self {
        self.batch = batch;
        self
    }

    /// One pass over the unsynced payments.
    pub async fn run_once(&self) -> Result<usize> {
        self.reconciler.resync_unsynced(self.batch).await
    }

    /// Runs a pass every interval until the handle is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(0) => tracing::debug!("reconciliation sweep found nothing to repair"),
                    Ok(repaired) => tracing::info!(repaired, "reconciliation sweep repaired orders"),
                    Err(e) => tracing::error!(error = %e, "reconciliation sweep failed"),
                }
            }
        })
    }
}
