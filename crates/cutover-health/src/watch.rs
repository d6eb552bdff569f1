//! HealthWatch: background probing of the active color after a switch.
//!
//! Spawns one task that probes the configured check every interval and
//! pushes a [`HealthReport`] per probe into a channel. The task exits on
//! shutdown or when the receiving side goes away.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use cutover_core::CheckSpec;

use crate::checker::{HealthStatus, HealthTracker, ProbeResult};
use crate::probe::Probe;

/// One probe's worth of news for the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub last_reason: Option<String>,
}

/// Settings for a watch loop.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub interval: Duration,
    pub timeout: Duration,
    pub unhealthy_threshold: u32,
}

/// Handle to a running watch loop.
pub struct HealthWatch {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl HealthWatch {
    /// Start probing `endpoint` with `check`.
    pub fn spawn(
        probe: Arc<dyn Probe>,
        endpoint: &str,
        check: &CheckSpec,
        settings: WatchSettings,
        reports: mpsc::Sender<HealthReport>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let endpoint = endpoint.to_string();
        let check = check.clone();

        info!(%endpoint, check = %check.id, interval = ?settings.interval, "health watch started");
        let handle = tokio::spawn(async move {
            run_watch_loop(probe, &endpoint, &check, settings, reports, shutdown_rx).await;
        });

        Self {
            handle,
            shutdown_tx,
        }
    }

    /// Stop the loop and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
        debug!("health watch stopped");
    }
}

async fn run_watch_loop(
    probe: Arc<dyn Probe>,
    endpoint: &str,
    check: &CheckSpec,
    settings: WatchSettings,
    reports: mpsc::Sender<HealthReport>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tracker = HealthTracker::new(settings.unhealthy_threshold);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(settings.interval) => {
                let result = match tokio::time::timeout(
                    settings.timeout,
                    probe.run(endpoint, check, settings.timeout),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => ProbeResult::failed(format!("timed out after {:?}", settings.timeout)),
                };
                let status = tracker.record(&result);
                let report = HealthReport {
                    status,
                    consecutive_failures: tracker.consecutive_failures(),
                    last_reason: result.reason().map(str::to_string),
                };
                if reports.send(report).await.is_err() {
                    debug!(%endpoint, "health report receiver gone; stopping watch");
                    break;
                }
            }
            _ = shutdown.changed() => {
                debug!(%endpoint, "health watch shutting down");
                break;
            }
        }
    }
}
