//! HealthGate: turns a set of required checks into one readiness verdict.
//!
//! A verdict is computed from a single pass over the checks. Retrying
//! across verdicts is the caller's job.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use cutover_core::{CheckFailure, CheckSpec, Environment, HealthVerdict};

use crate::checker::ProbeResult;
use crate::probe::{HttpProbe, Probe};

/// Check id reported when a gate is asked to judge zero checks.
pub const NO_CHECKS: &str = "<none>";

/// Produces readiness verdicts for candidate environments.
#[derive(Clone)]
pub struct HealthGate {
    probe: Arc<dyn Probe>,
}

impl HealthGate {
    pub fn new(probe: Arc<dyn Probe>) -> Self {
        Self { probe }
    }

    /// Gate backed by real HTTP probes.
    pub fn http() -> Self {
        Self::new(Arc::new(HttpProbe::new()))
    }

    /// The probe this gate runs checks with.
    pub fn probe(&self) -> Arc<dyn Probe> {
        self.probe.clone()
    }

    /// Run `required_checks` in order; the first failure decides the verdict.
    pub async fn check_readiness(
        &self,
        environment: &Environment,
        timeout: Duration,
        required_checks: &[CheckSpec],
    ) -> HealthVerdict {
        if required_checks.is_empty() {
            return no_checks_verdict(environment);
        }

        for check in required_checks {
            let result = run_bounded(self.probe.as_ref(), &environment.endpoint, check, timeout).await;
            if let Some(reason) = result.reason() {
                warn!(
                    environment = %environment.name,
                    check = %check.id,
                    %reason,
                    "readiness check failed"
                );
                return HealthVerdict::new(
                    environment,
                    vec![CheckFailure {
                        check: check.id.clone(),
                        reason: reason.to_string(),
                    }],
                );
            }
            debug!(environment = %environment.name, check = %check.id, "readiness check passed");
        }

        info!(
            environment = %environment.name,
            checks = required_checks.len(),
            "environment ready"
        );
        HealthVerdict::new(environment, Vec::new())
    }

    /// Run every check in parallel and join before computing the verdict.
    /// Failures are listed in the order the checks were requested.
    pub async fn check_readiness_concurrent(
        &self,
        environment: &Environment,
        timeout: Duration,
        required_checks: &[CheckSpec],
    ) -> HealthVerdict {
        if required_checks.is_empty() {
            return no_checks_verdict(environment);
        }

        let mut set = JoinSet::new();
        for (index, check) in required_checks.iter().enumerate() {
            let probe = self.probe.clone();
            let endpoint = environment.endpoint.clone();
            let check = check.clone();
            set.spawn(async move {
                let result = run_bounded(probe.as_ref(), &endpoint, &check, timeout).await;
                (index, result)
            });
        }

        let mut results: Vec<Option<ProbeResult>> = vec![None; required_checks.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => warn!(error = %e, "readiness check task did not complete"),
            }
        }

        let failures: Vec<CheckFailure> = required_checks
            .iter()
            .zip(results)
            .filter_map(|(check, result)| {
                let reason = match result {
                    Some(ProbeResult::Healthy) => return None,
                    Some(other) => other.reason().unwrap_or_default().to_string(),
                    // A panicked or cancelled task never produced a result.
                    None => "check did not complete".to_string(),
                };
                Some(CheckFailure {
                    check: check.id.clone(),
                    reason,
                })
            })
            .collect();

        if failures.is_empty() {
            info!(environment = %environment.name, checks = required_checks.len(), "environment ready");
        } else {
            warn!(
                environment = %environment.name,
                failed = ?failures.iter().map(|f| f.check.as_str()).collect::<Vec<_>>(),
                "readiness checks failed"
            );
        }
        HealthVerdict::new(environment, failures)
    }
}

/// Enforce the per-check timeout regardless of how the probe behaves.
async fn run_bounded(
    probe: &dyn Probe,
    endpoint: &str,
    check: &CheckSpec,
    timeout: Duration,
) -> ProbeResult {
    match tokio::time::timeout(timeout, probe.run(endpoint, check, timeout)).await {
        Ok(result) => result,
        Err(_) => ProbeResult::failed(format!("timed out after {timeout:?}")),
    }
}

fn no_checks_verdict(environment: &Environment) -> HealthVerdict {
    warn!(environment = %environment.name, "no readiness checks configured; failing closed");
    HealthVerdict::new(
        environment,
        vec![CheckFailure {
            check: NO_CHECKS.to_string(),
            reason: "no readiness checks configured".to_string(),
        }],
    )
}
