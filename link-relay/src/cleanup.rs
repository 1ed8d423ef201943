//! Background cleanup task for expired hub state.
//!
//! Runs periodically to drop registrations that never connected, files
//! nobody downloaded, and idle rate limiter keys.

use crate::config::CleanupConfig;
use crate::hub::Hub;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Spawn a background cleanup task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_task(hub: Arc<Hub>, config: CleanupConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Cleanup task disabled");
            return;
        }

        let interval_secs = config.interval_secs.max(1);
        tracing::info!("Cleanup task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;

            let report = hub.sweep();
            if report.registrations > 0 || report.files > 0 {
                tracing::info!(
                    "Cleanup: expired {} pending registrations, {} files",
                    report.registrations,
                    report.files
                );
            } else {
                tracing::debug!("Cleanup: nothing expired");
            }
        }
    })
}
