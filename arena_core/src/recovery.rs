//! Reconciles the queue and the database after failures.
//!
//! Guarantees at-least-once execution: a match row left `running` by a
//! crashed worker is flipped back to `pending` and re-admitted. The pass is
//! idempotent; a match completing between the flip and the enqueue merely
//! produces a stale descriptor that the processor discards.

use crate::{
    CoreResult, DatabasePort, Match, MatchDescriptor, QueuePort, RecoveryConfig,
};
use metrics::counter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub reclaimed: usize,
    pub enqueued: usize,
}

pub struct RecoveryService {
    database: Arc<dyn DatabasePort>,
    queue: Arc<dyn QueuePort>,
    config: RecoveryConfig,
}

impl RecoveryService {
    pub fn new(
        database: Arc<dyn DatabasePort>,
        queue: Arc<dyn QueuePort>,
        config: RecoveryConfig,
    ) -> Self {
        RecoveryService {
            database,
            queue,
            config,
        }
    }

    /// Startup pass: reclaim stuck matches, then re-admit every pending row
    /// (the queue may have lost descriptors while the process was down).
    /// Reclaimed rows become pending and are picked up by the sweep, so they
    /// are admitted exactly once per pass.
    #[instrument(name = "recovery.startup", skip(self))]
    pub async fn recover_on_startup(&self) -> CoreResult<RecoveryReport> {
        let mut report = self.reclaim_stuck(false).await?;

        let mut cursor = None;
        loop {
            let page = self
                .database
                .list_pending(self.config.batch_size, cursor)
                .await?;
            let Some(last) = page.last() else { break };
            cursor = Some((last.created_at, last.id));
            let full_page = page.len() as i64 == self.config.batch_size;
            report.enqueued += self.enqueue_all(&page).await;
            if !full_page {
                break;
            }
        }
        info!(
            reclaimed = report.reclaimed,
            enqueued = report.enqueued,
            "startup_recovery_done"
        );
        Ok(report)
    }

    /// Periodic pass, one per process.
    pub async fn run_periodic(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.periodic_interval);
        interval.tick().await; // first tick completes immediately, skip it
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            match self.reclaim_stuck(true).await {
                Ok(report) if report.reclaimed > 0 => {
                    info!(
                        reclaimed = report.reclaimed,
                        enqueued = report.enqueued,
                        "periodic_recovery_reclaimed"
                    );
                }
                Ok(_) => debug!("periodic_recovery_clean"),
                Err(e) => warn!(error = %e, "periodic_recovery_failed"),
            }
        }
        debug!("periodic_recovery_stopped");
    }

    /// Flip stuck `running` rows back to `pending` in batches; the periodic
    /// pass re-admits them at their original priority right away.
    async fn reclaim_stuck(&self, enqueue: bool) -> CoreResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        loop {
            let batch = self
                .database
                .reclaim_stuck(self.config.stuck_duration, self.config.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }
            report.reclaimed += batch.len();
            counter!("matches_reclaimed_total").increment(batch.len() as u64);
            if enqueue {
                report.enqueued += self.enqueue_all(&batch).await;
            }
            if (batch.len() as i64) < self.config.batch_size {
                break;
            }
        }
        Ok(report)
    }

    async fn enqueue_all(&self, matches: &[Match]) -> usize {
        let mut enqueued = 0;
        for m in matches {
            match self.queue.enqueue(&MatchDescriptor::from(m)).await {
                Ok(()) => enqueued += 1,
                Err(e) => {
                    // the row stays pending; the next pass picks it up
                    warn!(match_id = %m.id, error = %e, "recovery_enqueue_failed");
                }
            }
        }
        enqueued
    }
}
