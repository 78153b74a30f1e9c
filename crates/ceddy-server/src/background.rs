//! Background tasks for the Ceddy server.
//!
//! Includes:
//! - Closing idle sessions and evicting long-closed ones.

use ceddy_session::SessionRegistry;
use std::sync::Arc;
use tokio::time::sleep;

/// Starts the idle session reaper.
///
/// Runs indefinitely. Each pass closes sessions idle past the configured
/// timeout with reason `idle_timeout` and drops sessions that have been
/// closed longer than the retention period.
pub async fn start_idle_reaper(sessions: Arc<SessionRegistry>) {
    let config = sessions.config();
    if config.idle_timeout_secs == 0 {
        tracing::warn!("idle reaper disabled (idle_timeout_secs=0)");
        return;
    }
    let interval = config.reap_interval();

    tracing::info!(
        idle_timeout_secs = config.idle_timeout_secs,
        interval_secs = interval.as_secs(),
        "starting idle session reaper"
    );

    loop {
        sleep(interval).await;

        let closed = sessions.reap_idle().await;
        if closed > 0 {
            tracing::info!(count = closed, "closed idle sessions");
        }
    }
}
