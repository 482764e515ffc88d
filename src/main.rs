use expiry_sync::config::{LoggingConfig, SyncConfig};
use expiry_sync::jobs::ExpirySync;
use expiry_sync::logging;
use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Failures are logged, never turned into a non-zero exit code; the next
    // scheduled invocation is the retry.
    let config = match SyncConfig::init() {
        Ok(config) => config,
        Err(e) => {
            logging::init(&LoggingConfig::default());
            error!("Failed to load configuration: {}", e);
            return;
        }
    };
    logging::init(&config.logging);

    #[cfg(feature = "scheduler")]
    let schedule = config.job.schedule.clone();

    let sync = match ExpirySync::from_config(config) {
        Ok(sync) => sync,
        Err(e) => {
            error!("Failed to initialise expiry sync: {}", e);
            return;
        }
    };

    #[cfg(feature = "scheduler")]
    let sync = match schedule {
        Some(schedule) => {
            run_daemon(sync, schedule).await;
            return;
        }
        None => sync,
    };

    sync.run_once().await;
}

#[cfg(feature = "scheduler")]
async fn run_daemon(sync: ExpirySync, schedule: String) {
    use expiry_sync::jobs::SyncScheduler;
    use std::sync::Arc;

    let mut scheduler = match SyncScheduler::new(Arc::new(sync), schedule).await {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!("Failed to create scheduler: {}", e);
            return;
        }
    };
    if let Err(e) = scheduler.start().await {
        error!("Failed to start scheduler: {}", e);
        return;
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    if let Err(e) = scheduler.shutdown().await {
        error!("{}", e);
    }
}
