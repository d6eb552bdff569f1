//! Rollout controller: sequences deploy, gate, switch and supervision for
//! one service.
//!
//! Every entry point that can change the cluster takes the service lock
//! first, so two rollouts of the same service never interleave.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

use cutover_alerts::AlertSource;
use cutover_core::{
    Color, CutoverConfig, Environment, HealthVerdict, RolloutOutcome, RolloutRecord, ServiceRef,
    SwitchRecord, epoch_secs,
};
use cutover_health::{HealthGate, WatchSettings};
use cutover_orchestrator::{DeploymentStatus, Orchestrator, OrchestratorError};
use cutover_state::{AuditStore, StateResult};

use crate::error::{RolloutError, RolloutResult};
use crate::lock::ServiceLocks;
use crate::retry::Backoff;
use crate::supervisor::{
    RollbackSupervisor, SupervisionOutcome, SupervisorSettings, Trigger, cancelled,
};
use crate::switch::{SwitchOutcome, TrafficSwitch};

/// What a successful `promote_or_rollback` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoteReport {
    pub outcome: RolloutOutcome,
    pub from: Color,
    pub to: Color,
    pub switch: Option<SwitchRecord>,
    /// Readiness verdicts taken before the gate passed.
    pub verdicts: u32,
    /// Whether the previous color was scaled to zero.
    pub scaled_down: bool,
    pub detail: Option<String>,
}

/// Live selector plus the latest audit history.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub service: String,
    pub active: Option<Color>,
    pub blue: Option<DeploymentStatus>,
    pub green: Option<DeploymentStatus>,
    pub last_switch: Option<SwitchRecord>,
    pub last_verdict: Option<HealthVerdict>,
    pub last_rollout: Option<RolloutRecord>,
}

pub struct RolloutController {
    config: CutoverConfig,
    service: ServiceRef,
    orchestrator: Arc<dyn Orchestrator>,
    gate: HealthGate,
    alerts: Arc<dyn AlertSource>,
    store: AuditStore,
    switch: TrafficSwitch,
    locks: ServiceLocks,
    backoff: Backoff,
    cancel: watch::Receiver<bool>,
    initiated_by: String,
}

impl RolloutController {
    pub fn new(
        config: CutoverConfig,
        orchestrator: Arc<dyn Orchestrator>,
        gate: HealthGate,
        alerts: Arc<dyn AlertSource>,
        store: AuditStore,
    ) -> Self {
        let service = config.service_ref();
        let switch = TrafficSwitch::new(
            orchestrator.clone(),
            store.clone(),
            &config.service.selector_key,
        );
        let backoff = Backoff::from_config(&config.retry);
        // Sender dropped: never cancelled unless `with_cancel` is used.
        let (_, cancel) = watch::channel(false);
        Self {
            config,
            service,
            orchestrator,
            gate,
            alerts,
            store,
            switch,
            locks: ServiceLocks::new(),
            backoff,
            cancel,
            initiated_by: "cutover".to_string(),
        }
    }

    /// Share a lock registry (and lock directory) with other controllers.
    pub fn with_locks(mut self, locks: ServiceLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Abort when the flag flips to `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Name recorded as `initiated_by` in switch records.
    pub fn initiated_by(mut self, who: &str) -> Self {
        self.initiated_by = who.to_string();
        self
    }

    pub fn service(&self) -> &ServiceRef {
        &self.service
    }

    pub fn config(&self) -> &CutoverConfig {
        &self.config
    }

    pub fn store(&self) -> &AuditStore {
        &self.store
    }

    /// Resolve an environment from config with optional overrides.
    pub fn environment(
        &self,
        color: Color,
        image: Option<&str>,
        replicas: Option<u32>,
    ) -> RolloutResult<Environment> {
        Ok(self.config.environment(color, image, replicas)?)
    }

    /// Resolve the environment to promote. No image is required; the one
    /// running in the live Deployment is reported when it can be read.
    pub async fn promote_environment(&self, color: Color) -> RolloutResult<Environment> {
        let mut environment = self.config.promote_environment(color)?;
        match self
            .orchestrator
            .deployment_status(&self.service.namespace, &environment.name)
            .await
        {
            Ok(status) => {
                if let Some(image) = status.image {
                    environment.image = image;
                }
            }
            Err(e) => warn!(
                deployment = %environment.name,
                error = %e,
                "could not read deployment; promoting with configured values"
            ),
        }
        Ok(environment)
    }

    // ── deploy ─────────────────────────────────────────────────────

    /// Apply the Deployment for `environment` and wait for every replica
    /// to be ready. Refuses to touch the color that is serving traffic.
    pub async fn deploy(&self, environment: &Environment) -> RolloutResult<DeploymentStatus> {
        let _guard = self.locks.try_acquire(&self.service)?;
        self.check_cancel("deploy")?;

        let active = self.read_active().await?;
        if active == Some(environment.color) {
            return Err(RolloutError::Conflict {
                service: self.service.key(),
                expected: environment.color.other(),
                actual: active,
            });
        }

        info!(
            service = %self.service,
            deployment = %environment.name,
            color = %environment.color,
            image = %environment.image,
            replicas = environment.replicas,
            "applying deployment"
        );
        let key = self.config.service.selector_key.as_str();
        self.backoff
            .retry("apply deployment", |_| {
                self.orchestrator
                    .apply_deployment(&self.service, key, environment)
            })
            .await?;

        self.wait_ready(environment).await
    }

    async fn wait_ready(&self, environment: &Environment) -> RolloutResult<DeploymentStatus> {
        let timeout = self.config.deploy.timeout;
        let started = Instant::now();
        let deadline = started + timeout;
        let mut cancel = self.cancel.clone();

        loop {
            let status = self
                .backoff
                .retry("read deployment", |_| {
                    self.orchestrator
                        .deployment_status(&self.service.namespace, &environment.name)
                })
                .await?;
            if status.is_ready() {
                info!(
                    deployment = %environment.name,
                    ready = status.ready_replicas,
                    elapsed = ?started.elapsed(),
                    "deployment ready"
                );
                return Ok(status);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(RolloutError::DeployTimeout {
                    deployment: environment.name.clone(),
                    ready: status.ready_replicas,
                    desired: status.replicas,
                    waited: timeout,
                });
            }
            info!(
                deployment = %environment.name,
                ready = status.ready_replicas,
                desired = status.replicas,
                generation = status.generation,
                observed_generation = status.observed_generation,
                "waiting for rollout"
            );
            let pause = self.config.deploy.poll_interval.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = cancelled(&mut cancel) => return Err(RolloutError::Cancelled { stage: "deploy" }),
            }
        }
    }

    // ── promote ────────────────────────────────────────────────────

    /// Gate `environment`, switch traffic to it, supervise the cool-down,
    /// and either scale the old color down or revert. One RolloutRecord is
    /// persisted per call that gets past the lock.
    pub async fn promote_or_rollback(&self, environment: &Environment) -> RolloutResult<PromoteReport> {
        let _guard = self.locks.try_acquire(&self.service)?;
        let started_at = epoch_secs();
        let to = environment.color;
        let from = to.other();

        let result = self.run_promote(environment, from, to).await;

        let (outcome, detail) = match &result {
            Ok(report) => (report.outcome, report.detail.clone()),
            Err(e) => (outcome_for(e), Some(e.to_string())),
        };
        self.audit(
            "rollout record",
            self.store.append_rollout(&RolloutRecord {
                service: self.service.key(),
                environment: environment.name.clone(),
                from,
                to,
                outcome,
                started_at,
                finished_at: epoch_secs(),
                detail,
            }),
        );
        match &result {
            Ok(report) => info!(service = %self.service, outcome = %report.outcome, "promote finished"),
            Err(e) => error!(service = %self.service, %outcome, error = %e, "promote failed"),
        }
        result
    }

    async fn run_promote(
        &self,
        environment: &Environment,
        from: Color,
        to: Color,
    ) -> RolloutResult<PromoteReport> {
        let active = self.read_active().await?;
        if active == Some(to) {
            info!(service = %self.service, active = %to, "candidate already active; nothing to promote");
            return Ok(PromoteReport {
                outcome: RolloutOutcome::AlreadyActive,
                from,
                to,
                switch: None,
                verdicts: 0,
                scaled_down: false,
                detail: None,
            });
        }
        if active != Some(from) {
            return Err(RolloutError::Conflict {
                service: self.service.key(),
                expected: from,
                actual: active,
            });
        }

        let verdicts = self.gate_until_ready(environment, from).await?;

        self.check_cancel("switch")?;
        let record = match self
            .switch
            .switch_with_retry(&self.service, from, to, &self.initiated_by, &self.backoff)
            .await?
        {
            SwitchOutcome::Switched(record) => record,
            SwitchOutcome::Unchanged { active } => {
                // Someone else switched between our read and our patch.
                return Err(RolloutError::Conflict {
                    service: self.service.key(),
                    expected: from,
                    actual: Some(active),
                });
            }
        };

        let outcome = self
            .supervisor()
            .supervise(
                &self.service,
                &record,
                &environment.endpoint,
                self.config.supervisor_check(),
                self.cancel.clone(),
            )
            .await?;

        match outcome {
            SupervisionOutcome::Stable => {
                let scale = self.scale_down(from).await;
                let detail = scale
                    .as_ref()
                    .err()
                    .map(|e| format!("{from} not scaled down: {e}"));
                Ok(PromoteReport {
                    outcome: RolloutOutcome::Stable,
                    from,
                    to,
                    switch: Some(record),
                    verdicts,
                    scaled_down: scale.is_ok(),
                    detail,
                })
            }
            SupervisionOutcome::Reverted {
                trigger: Trigger::Aborted,
                ..
            } => Err(RolloutError::Cancelled { stage: "monitoring" }),
            SupervisionOutcome::Reverted { trigger, .. } => Err(RolloutError::DeploymentFailed {
                service: self.service.key(),
                reason: trigger.to_string(),
                reverted_to: from,
            }),
        }
    }

    /// Take verdicts until one passes or the attempt budget is spent.
    /// Returns how many verdicts were taken.
    async fn gate_until_ready(&self, environment: &Environment, active: Color) -> RolloutResult<u32> {
        let gate = &self.config.gate;
        let mut cancel = self.cancel.clone();
        let mut last: Option<HealthVerdict> = None;

        for attempt in 1..=gate.attempts {
            self.check_cancel("gate")?;
            let verdict = if gate.concurrent {
                self.gate
                    .check_readiness_concurrent(environment, gate.check_timeout, &gate.checks)
                    .await
            } else {
                self.gate
                    .check_readiness(environment, gate.check_timeout, &gate.checks)
                    .await
            };
            self.audit("verdict", self.store.append_verdict(&self.service.key(), &verdict));

            if verdict.passed {
                info!(environment = %environment.name, attempt, "readiness gate passed");
                return Ok(attempt);
            }
            warn!(
                environment = %environment.name,
                attempt,
                attempts = gate.attempts,
                failed = ?verdict.failed_check_ids(),
                "readiness gate not passed"
            );
            last = Some(verdict);

            if attempt < gate.attempts {
                tokio::select! {
                    _ = tokio::time::sleep(gate.interval) => {}
                    _ = cancelled(&mut cancel) => return Err(RolloutError::Cancelled { stage: "gate" }),
                }
            }
        }

        Err(RolloutError::ReadinessFailure {
            environment: environment.name.clone(),
            failed_checks: last
                .map(|v| v.failed_check_ids().into_iter().map(str::to_string).collect())
                .unwrap_or_default(),
            active: Some(active),
        })
    }

    fn supervisor(&self) -> RollbackSupervisor {
        let cfg = &self.config;
        RollbackSupervisor::new(
            self.switch.clone(),
            self.alerts.clone(),
            self.gate.probe(),
            SupervisorSettings {
                cool_down: cfg.supervisor.cool_down,
                alert_poll_interval: cfg.alerts.poll_interval,
                max_alert_source_failures: cfg.alerts.max_source_failures,
                health: WatchSettings {
                    interval: cfg.supervisor.health_interval,
                    timeout: cfg.gate.check_timeout,
                    unhealthy_threshold: cfg.supervisor.max_health_failures,
                },
                revert_attempts: cfg.supervisor.revert_attempts,
            },
            self.backoff,
        )
    }

    async fn scale_down(&self, color: Color) -> RolloutResult<()> {
        let name = self.config.deployment_name(color);
        let result = self
            .backoff
            .retry("scale down", |_| {
                self.orchestrator
                    .scale_deployment(&self.service.namespace, &name, 0)
            })
            .await;
        match result {
            Ok(()) => {
                info!(deployment = %name, %color, "previous color scaled to zero");
                Ok(())
            }
            Err(e) => {
                let e = RolloutError::from(e);
                warn!(deployment = %name, %color, error = %e, "failed to scale down previous color");
                Err(e)
            }
        }
    }

    // ── manual switch ──────────────────────────────────────────────

    /// Point traffic at `target` without gating or supervision. Used by
    /// operators recovering from an irrecoverable switch.
    pub async fn switch_to(&self, target: Color) -> RolloutResult<SwitchOutcome> {
        let _guard = self.locks.try_acquire(&self.service)?;
        self.check_cancel("switch")?;
        warn!(service = %self.service, %target, "manual traffic switch");
        self.switch
            .switch_with_retry(
                &self.service,
                target.other(),
                target,
                &self.initiated_by,
                &self.backoff,
            )
            .await
    }

    // ── status ─────────────────────────────────────────────────────

    /// Live selector, both Deployments, and the latest audit entries.
    pub async fn status(&self) -> RolloutResult<StatusReport> {
        let key = self.service.key();
        Ok(StatusReport {
            active: self.read_active().await?,
            blue: self.deployment(Color::Blue).await?,
            green: self.deployment(Color::Green).await?,
            last_switch: self.store.last_switch(&key)?,
            last_verdict: self.store.last_verdict(&key)?,
            last_rollout: self.store.last_rollout(&key)?,
            service: key,
        })
    }

    async fn deployment(&self, color: Color) -> RolloutResult<Option<DeploymentStatus>> {
        let name = self.config.deployment_name(color);
        let result = self
            .backoff
            .retry("read deployment", |_| {
                self.orchestrator
                    .deployment_status(&self.service.namespace, &name)
            })
            .await;
        match result {
            Ok(status) => Ok(Some(status)),
            Err(e) if matches!(e.error, OrchestratorError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ── helpers ────────────────────────────────────────────────────

    async fn read_active(&self) -> RolloutResult<Option<Color>> {
        Ok(self
            .backoff
            .retry("read selector", |_| self.switch.active_color(&self.service))
            .await?)
    }

    fn check_cancel(&self, stage: &'static str) -> RolloutResult<()> {
        if *self.cancel.borrow() {
            warn!(service = %self.service, stage, "cancelled");
            return Err(RolloutError::Cancelled { stage });
        }
        Ok(())
    }

    /// The audit trail never decides an outcome; failures are logged.
    fn audit<T>(&self, what: &str, result: StateResult<T>) {
        if let Err(e) = result {
            error!(service = %self.service, what, error = %e, "failed to write audit store");
        }
    }
}

fn outcome_for(error: &RolloutError) -> RolloutOutcome {
    match error {
        RolloutError::ReadinessFailure { .. } => RolloutOutcome::ReadinessFailed,
        RolloutError::DeploymentFailed { .. } => RolloutOutcome::Reverted,
        RolloutError::Cancelled { stage: "monitoring" } => RolloutOutcome::Reverted,
        RolloutError::Cancelled { .. } => RolloutOutcome::Aborted,
        _ => RolloutOutcome::Failed,
    }
}
