//! Cron-driven daemon mode.
//!
//! Requires the `scheduler` feature. Without it the binary runs the batch once
//! per invocation and relies on an external scheduler.
//!
//! Cron expressions have six fields (seconds first) and are evaluated in UTC.
//! The historical cadence of Sunday 02:00 Beijing time is `0 0 18 * * Sat`.

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler as TokioJobScheduler};
use tracing::{info, warn};

use crate::errors::{SyncError, SyncResult};

use super::ExpirySync;

/// Runs [`ExpirySync::run_once`] on a cron schedule.
pub struct SyncScheduler {
    scheduler: TokioJobScheduler,
    sync: Arc<ExpirySync>,
    schedule: String,
}

impl SyncScheduler {
    pub async fn new(sync: Arc<ExpirySync>, schedule: impl Into<String>) -> SyncResult<Self> {
        let scheduler = TokioJobScheduler::new()
            .await
            .map_err(|e| SyncError::Scheduler(e.to_string()))?;

        Ok(Self {
            scheduler,
            sync,
            schedule: schedule.into(),
        })
    }

    /// Register the sync job and start ticking.
    pub async fn start(&self) -> SyncResult<()> {
        info!("Starting expiry sync scheduler");

        let sync = Arc::clone(&self.sync);
        let job = Job::new_async(self.schedule.as_str(), move |_uuid, _l| {
            let sync = Arc::clone(&sync);
            Box::pin(async move {
                let report = sync.run_once().await;
                if !report.is_clean() {
                    warn!(
                        "Scheduled run {} finished with {} failed passes",
                        report.run_id,
                        report.failures().len()
                    );
                }
            })
        })
        .map_err(|e| SyncError::Scheduler(e.to_string()))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| SyncError::Scheduler(e.to_string()))?;

        self.scheduler
            .start()
            .await
            .map_err(|e| SyncError::Scheduler(e.to_string()))?;

        info!("Added expiry sync job (schedule: {})", self.schedule);
        Ok(())
    }

    /// Stop the scheduler.
    pub async fn shutdown(&mut self) -> SyncResult<()> {
        info!("Shutting down expiry sync scheduler");
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| SyncError::Scheduler(e.to_string()))
    }
}
