//! Probe results and consecutive-failure tracking.

use tracing::{debug, warn};

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    /// The check passed.
    Healthy,
    /// The endpoint answered, but not the way the check requires.
    Unhealthy { reason: String },
    /// The probe could not be executed (connection error, timeout).
    Failed { reason: String },
}

impl ProbeResult {
    pub fn unhealthy(reason: impl Into<String>) -> Self {
        ProbeResult::Unhealthy {
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        ProbeResult::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeResult::Healthy)
    }

    /// Why the probe did not pass, if it didn't.
    pub fn reason(&self) -> Option<&str> {
        match self {
            ProbeResult::Healthy => None,
            ProbeResult::Unhealthy { reason } | ProbeResult::Failed { reason } => Some(reason),
        }
    }
}

/// Health as judged over a run of probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Tracks consecutive probe results for one environment.
#[derive(Debug)]
pub struct HealthTracker {
    status: HealthStatus,
    consecutive_failures: u32,
    /// Consecutive failures before marking unhealthy.
    unhealthy_threshold: u32,
}

impl HealthTracker {
    pub fn new(unhealthy_threshold: u32) -> Self {
        Self {
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            unhealthy_threshold: unhealthy_threshold.max(1),
        }
    }

    /// Record a probe result and return the new health status.
    pub fn record(&mut self, result: &ProbeResult) -> HealthStatus {
        if result.is_healthy() {
            if self.status == HealthStatus::Unhealthy {
                debug!(
                    after_failures = self.consecutive_failures,
                    "environment recovered to healthy"
                );
            }
            self.consecutive_failures = 0;
            self.status = HealthStatus::Healthy;
        } else {
            self.consecutive_failures += 1;
            if self.consecutive_failures >= self.unhealthy_threshold {
                if self.status != HealthStatus::Unhealthy {
                    warn!(
                        failures = self.consecutive_failures,
                        threshold = self.unhealthy_threshold,
                        reason = result.reason().unwrap_or_default(),
                        "environment marked unhealthy"
                    );
                }
                self.status = HealthStatus::Unhealthy;
            }
        }
        self.status
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
