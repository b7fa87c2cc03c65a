//! Periodic retention sweep.
//!
//! Spawns a loop that runs every retention policy whose cleanup cadence has
//! elapsed. Runs on a fixed interval using `tokio::time::interval`.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use verso_core::transaction::AccessContext;
use verso_db::retention::RetentionManager;

/// Run the retention loop until `cancel` is triggered.
///
/// The first sweep happens immediately. A failed sweep is logged and the
/// loop waits for the next tick.
pub async fn run(manager: RetentionManager, every: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = every.as_secs(), "Retention job started");

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Retention job stopping");
                break;
            }
            _ = interval.tick() => {
                match manager.run_due_cleanups(Utc::now(), &AccessContext::system()).await {
                    Ok(reports) if reports.is_empty() => {
                        tracing::debug!("Retention: no policies due");
                    }
                    Ok(reports) => {
                        let deleted: u64 = reports.iter().map(|r| r.deleted).sum();
                        tracing::info!(
                            policies = reports.len(),
                            deleted,
                            "Retention: sweep finished"
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Retention: sweep failed");
                    }
                }
            }
        }
    }
}
