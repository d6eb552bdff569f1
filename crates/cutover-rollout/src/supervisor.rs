//! RollbackSupervisor: watches a freshly switched service through its
//! cool-down window and reverts the switch when it misbehaves.
//!
//! # State machine
//!
//! ```text
//!            window elapses
//! Monitoring ──────────────────► Stable
//!     │
//!     │ critical alert / health failures / alert source down / abort
//!     ▼
//! RollingBack ── revert ok ────► Reverted
//!     │
//!     └── revert attempts spent ─► IrrecoverableSwitch error
//! ```
//!
//! Two workers feed the supervisor loop: an alert poller and a
//! [`HealthWatch`] on the new active color. Only the loop itself calls the
//! [`TrafficSwitch`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use cutover_alerts::{AlertError, AlertSource};
use cutover_core::{AlertSignal, CheckSpec, Color, ServiceRef, SwitchRecord};
use cutover_health::{HealthReport, HealthStatus, HealthWatch, Probe, WatchSettings};

use crate::error::{RolloutError, RolloutResult};
use crate::retry::Backoff;
use crate::switch::{SwitchOutcome, TrafficSwitch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Monitoring,
    Stable,
    RollingBack,
    Reverted,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SupervisorState::Monitoring => "monitoring",
            SupervisorState::Stable => "stable",
            SupervisorState::RollingBack => "rolling_back",
            SupervisorState::Reverted => "reverted",
        };
        f.write_str(s)
    }
}

/// Why the supervisor decided to roll back.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    Alert(AlertSignal),
    Unhealthy {
        consecutive_failures: u32,
        reason: Option<String>,
    },
    AlertSourceDown {
        consecutive_failures: u32,
        last_error: String,
    },
    Aborted,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Alert(a) => write!(
                f,
                "{} alert on {} (value {} > threshold {})",
                a.severity, a.metric, a.value, a.threshold
            ),
            Trigger::Unhealthy {
                consecutive_failures,
                reason,
            } => {
                write!(f, "{consecutive_failures} consecutive health failures")?;
                if let Some(r) = reason {
                    write!(f, " (last: {r})")?;
                }
                Ok(())
            }
            Trigger::AlertSourceDown {
                consecutive_failures,
                last_error,
            } => write!(
                f,
                "alert source failed {consecutive_failures} consecutive polls: {last_error}"
            ),
            Trigger::Aborted => f.write_str("aborted by operator"),
        }
    }
}

/// How supervision ended when it did not error.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisionOutcome {
    Stable,
    Reverted {
        trigger: Trigger,
        /// `None` if the selector was already back on the old color.
        record: Option<SwitchRecord>,
    },
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub cool_down: Duration,
    pub alert_poll_interval: Duration,
    /// Consecutive alert-source failures tolerated before failing closed.
    pub max_alert_source_failures: u32,
    pub health: WatchSettings,
    pub revert_attempts: u32,
}

/// One alert poll's result, as seen by the supervisor loop.
#[derive(Debug)]
enum AlertPoll {
    Firing(Vec<AlertSignal>),
    SourceError { consecutive: u32, error: AlertError },
}

pub struct RollbackSupervisor {
    switch: TrafficSwitch,
    alerts: Arc<dyn AlertSource>,
    probe: Arc<dyn Probe>,
    settings: SupervisorSettings,
    backoff: Backoff,
}

impl RollbackSupervisor {
    pub fn new(
        switch: TrafficSwitch,
        alerts: Arc<dyn AlertSource>,
        probe: Arc<dyn Probe>,
        settings: SupervisorSettings,
        backoff: Backoff,
    ) -> Self {
        Self {
            switch,
            alerts,
            probe,
            settings,
            backoff,
        }
    }

    /// Supervise `service` after `switched` moved traffic to the
    /// environment at `endpoint`. Returns once the window closes or the
    /// switch has been reverted.
    pub async fn supervise(
        &self,
        service: &ServiceRef,
        switched: &SwitchRecord,
        endpoint: &str,
        check: &CheckSpec,
        mut cancel: watch::Receiver<bool>,
    ) -> RolloutResult<SupervisionOutcome> {
        let mut state = SupervisorState::Monitoring;
        info!(
            service = %service,
            active = %switched.to,
            cool_down = ?self.settings.cool_down,
            %state,
            "supervising switch"
        );

        let window_start_ms = switched.timestamp_ms;
        let deadline = Instant::now() + self.settings.cool_down;

        let (alert_tx, mut alert_rx) = mpsc::channel(16);
        let (health_tx, mut health_rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        let poller = spawn_alert_poller(
            self.alerts.clone(),
            service.clone(),
            self.settings.alert_poll_interval,
            alert_tx,
            stop_rx,
        );
        let health = HealthWatch::spawn(
            self.probe.clone(),
            endpoint,
            check,
            self.settings.health.clone(),
            health_tx,
        );

        let trigger = loop {
            tokio::select! {
                biased;
                Some(poll) = alert_rx.recv() => match poll {
                    AlertPoll::Firing(signals) => {
                        if let Some(signal) = signals
                            .into_iter()
                            .find(|s| s.severity.is_critical() && s.fired_at_ms >= window_start_ms)
                        {
                            break Some(Trigger::Alert(signal));
                        }
                    }
                    AlertPoll::SourceError { consecutive, error } => {
                        warn!(service = %service, consecutive, %error, "alert poll failed");
                        if consecutive > self.settings.max_alert_source_failures {
                            break Some(Trigger::AlertSourceDown {
                                consecutive_failures: consecutive,
                                last_error: error.to_string(),
                            });
                        }
                    }
                },
                Some(report) = health_rx.recv() => {
                    if report.status == HealthStatus::Unhealthy {
                        break Some(unhealthy(report));
                    }
                    debug!(service = %service, failures = report.consecutive_failures, "health report");
                }
                _ = cancelled(&mut cancel) => break Some(Trigger::Aborted),
                _ = tokio::time::sleep_until(deadline) => break None,
            }
        };

        let _ = stop_tx.send(true);
        drop(alert_rx);
        drop(health_rx);
        health.stop().await;
        let _ = poller.await;

        let Some(trigger) = trigger else {
            transition(service, &mut state, SupervisorState::Stable);
            return Ok(SupervisionOutcome::Stable);
        };

        warn!(service = %service, %trigger, "rolling back");
        transition(service, &mut state, SupervisorState::RollingBack);
        let record = self.revert(service, switched.to, switched.from).await?;
        transition(service, &mut state, SupervisorState::Reverted);
        Ok(SupervisionOutcome::Reverted { trigger, record })
    }

    /// Put traffic back on `to`, retrying up to the revert budget.
    async fn revert(
        &self,
        service: &ServiceRef,
        from: Color,
        to: Color,
    ) -> RolloutResult<Option<SwitchRecord>> {
        let backoff = self.backoff.with_attempts(self.settings.revert_attempts);
        match self
            .switch
            .switch_with_retry(service, from, to, "rollback-supervisor", &backoff)
            .await
        {
            Ok(SwitchOutcome::Switched(record)) => Ok(Some(record)),
            Ok(SwitchOutcome::Unchanged { .. }) => {
                info!(service = %service, active = %to, "selector already reverted");
                Ok(None)
            }
            Err(e) => {
                let active = self.switch.active_color(service).await.ok().flatten().or(Some(from));
                error!(service = %service, error = %e, ?active, "revert failed; operator intervention required");
                Err(RolloutError::IrrecoverableSwitch {
                    service: service.key(),
                    active,
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn unhealthy(report: HealthReport) -> Trigger {
    Trigger::Unhealthy {
        consecutive_failures: report.consecutive_failures,
        reason: report.last_reason,
    }
}

fn transition(service: &ServiceRef, state: &mut SupervisorState, next: SupervisorState) {
    info!(service = %service, from = %state, to = %next, "supervisor state change");
    *state = next;
}

/// Resolves once the cancel flag is raised. Never resolves if the sender
/// is gone.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn spawn_alert_poller(
    alerts: Arc<dyn AlertSource>,
    service: ServiceRef,
    interval: Duration,
    tx: mpsc::Sender<AlertPoll>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut consecutive = 0u32;
        loop {
            let poll = match alerts.firing(&service).await {
                Ok(signals) => {
                    consecutive = 0;
                    AlertPoll::Firing(signals)
                }
                Err(error) => {
                    consecutive += 1;
                    AlertPoll::SourceError { consecutive, error }
                }
            };
            if tx.send(poll).await.is_err() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop.changed() => break,
            }
        }
        debug!(service = %service, "alert poller stopped");
    })
}
