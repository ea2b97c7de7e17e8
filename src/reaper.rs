//! The Orphan Reaper (C9): periodically reconciles `running` rows with live worker state.
//!
//! Grounded in the three-way diagnosis a cleanup job for this kind of queue always ends up
//! needing: no worker handle was ever recorded, the handle doesn't match any worker this
//! process currently knows about, or the row simply hasn't heartbeat recently enough. All three
//! produce the same terminal transition; only the `error_message` text differs, which is the
//! one piece of this component SPEC_FULL §4.9 left to this repo's judgment.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::job_store::JobStore;
use crate::monitoring::MetricsCollector;
use crate::types::JobStatus;

pub struct Reaper {
    store: Arc<dyn JobStore>,
    metrics: Arc<MetricsCollector>,
    stale_threshold: chrono::Duration,
}

impl Reaper {
    pub fn new(store: Arc<dyn JobStore>, metrics: Arc<MetricsCollector>, stale_threshold: Duration) -> Self {
        Self {
            store,
            metrics,
            stale_threshold: chrono::Duration::from_std(stale_threshold).unwrap_or(chrono::Duration::seconds(30)),
        }
    }

    /// One sweep. `live_worker_handles` is the set of worker handles this deployment currently
    /// believes are alive; a `running` row whose `worker_handle` isn't in that set is orphaned
    /// even if its last write was recent, since the recording worker is provably gone.
    pub async fn sweep(&self, live_worker_handles: &HashSet<String>) -> anyhow::Result<usize> {
        let running = self.store.list_by_status(&[JobStatus::Running]).await?;
        let mut reaped = 0;

        for job in running {
            let reason = match &job.worker_handle {
                None => Some("orphaned: no worker handle recorded".to_string()),
                Some(handle) if !live_worker_handles.contains(handle) => {
                    Some(format!("orphaned: worker '{handle}' is no longer registered"))
                }
                Some(_) => {
                    let stale = Utc::now() - job.updated_at >= self.stale_threshold;
                    stale.then(|| "orphaned: worker disappeared".to_string())
                }
            };

            if let Some(message) = reason {
                self.store.fail(job.id, &message).await?;
                self.metrics.record_orphan_reaped();
                reaped += 1;
            }
        }

        Ok(reaped)
    }

    /// Runs `sweep` on a fixed interval until the process shuts down. `reaper_interval`
    /// recommended 60s per SPEC_FULL §4.9.
    pub async fn run(
        self: Arc<Self>,
        reaper_interval: Duration,
        live_worker_handles: impl Fn() -> HashSet<String> + Send + Sync + 'static,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(reaper_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.sweep(&live_worker_handles()).await {
                        Ok(reaped) if reaped > 0 => tracing::info!(reaped, "orphan reaper transitioned stale jobs to failed"),
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "orphan reaper sweep failed"),
                    }
                }
            }
        }
    }
}
