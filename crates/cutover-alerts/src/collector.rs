//! Rollout metrics: per-service figures derived from the audit store.

use std::collections::BTreeMap;

use tracing::debug;

use cutover_core::{Color, RolloutOutcome};
use cutover_state::{AuditStore, StateResult};

/// Point-in-time figures for one service.
#[derive(Debug, Clone, PartialEq)]
pub struct RolloutMetrics {
    pub service: String,
    pub switches_total: u64,
    /// Rollouts by outcome label.
    pub rollouts: BTreeMap<String, u64>,
    /// Color of the last recorded switch, if any.
    pub active_color: Option<Color>,
    pub last_verdict_passed: Option<bool>,
    pub last_rollout_finished_at: Option<u64>,
}

impl RolloutMetrics {
    /// Build metrics for every service the store knows about.
    pub fn collect(store: &AuditStore) -> StateResult<Vec<RolloutMetrics>> {
        let services = store.services()?;
        let mut out = Vec::with_capacity(services.len());
        for service in services {
            out.push(Self::collect_service(store, &service)?);
        }
        debug!(services = out.len(), "collected rollout metrics");
        Ok(out)
    }

    pub fn collect_service(store: &AuditStore, service: &str) -> StateResult<RolloutMetrics> {
        let switches = store.list_switches(service)?;
        let rollouts = store.list_rollouts(service)?;

        let mut by_outcome = BTreeMap::new();
        for record in &rollouts {
            *by_outcome.entry(record.outcome.to_string()).or_insert(0) += 1;
        }

        Ok(RolloutMetrics {
            service: service.to_string(),
            switches_total: switches.len() as u64,
            rollouts: by_outcome,
            active_color: switches.last().map(|s| s.to),
            last_verdict_passed: store.last_verdict(service)?.map(|v| v.passed),
            last_rollout_finished_at: rollouts.last().map(|r| r.finished_at),
        })
    }

    /// Count of rollouts that ended with `outcome`.
    pub fn rollouts_with(&self, outcome: RolloutOutcome) -> u64 {
        self.rollouts.get(&outcome.to_string()).copied().unwrap_or(0)
    }
}
