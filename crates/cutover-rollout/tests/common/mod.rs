//! Shared fixtures for controller scenarios: an in-memory cluster, an
//! in-memory alert feed, and a probe whose answers the test flips at will.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use cutover_alerts::MemoryAlertSource;
use cutover_core::{AlertSignal, CheckSpec, Color, CutoverConfig, Environment, ServiceRef, Severity};
use cutover_health::{HealthGate, Probe, ProbeFuture, ProbeResult};
use cutover_orchestrator::MemoryOrchestrator;
use cutover_rollout::{RolloutController, ServiceLocks};
use cutover_state::AuditStore;

pub const SERVICE_KEY: &str = "ai-agents/ai-agent";

pub const CONFIG: &str = r#"
[service]
namespace = "ai-agents"
name = "ai-agent"

[alerts]
poll_interval = "10ms"
max_source_failures = 2

[gate]
check_timeout = "200ms"
attempts = 3
interval = "10ms"
checks = [
    { id = "liveness", kind = "http", path = "/health" },
    { id = "readiness", kind = "http", path = "/ready" },
    { id = "smoke", kind = "smoke", steps = [
        { name = "chat", method = "POST", path = "/chat", body = '{"message":"ping"}' },
    ] },
]

[supervisor]
cool_down = "400ms"
health_interval = "20ms"
health_check = "readiness"
max_health_failures = 3
revert_attempts = 3

[retry]
max_attempts = 3
base_delay = "1ms"
max_delay = "5ms"

[deploy]
timeout = "200ms"
poll_interval = "10ms"

[environments.blue]
endpoint = "http://ai-agent-blue.ai-agents:8000"
replicas = 3
image = "registry.local/ai-agent:1.3.0"

[environments.green]
endpoint = "http://ai-agent-green.ai-agents:8000"
replicas = 3
image = "registry.local/ai-agent:1.4.0"
"#;

/// Probe answering per check id; unknown ids are healthy.
#[derive(Default)]
pub struct ScriptedProbe {
    answers: Mutex<HashMap<String, ProbeResult>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProbe {
    pub fn set(&self, check: &str, result: ProbeResult) {
        self.answers
            .lock()
            .unwrap()
            .insert(check.to_string(), result);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Probe for ScriptedProbe {
    fn run<'a>(
        &'a self,
        _endpoint: &'a str,
        check: &'a CheckSpec,
        _timeout: Duration,
    ) -> ProbeFuture<'a> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(check.id.clone());
            self.answers
                .lock()
                .unwrap()
                .get(&check.id)
                .cloned()
                .unwrap_or(ProbeResult::Healthy)
        })
    }
}

pub struct Harness {
    pub config: CutoverConfig,
    pub orch: Arc<MemoryOrchestrator>,
    pub alerts: Arc<MemoryAlertSource>,
    pub probe: Arc<ScriptedProbe>,
    pub store: AuditStore,
    pub locks: ServiceLocks,
    pub cancel_tx: watch::Sender<bool>,
}

impl Harness {
    /// Blue serving traffic with both Deployments present.
    pub fn new() -> Self {
        let config = CutoverConfig::from_toml_str(CONFIG).unwrap();
        let service = config.service_ref();
        let orch = Arc::new(
            MemoryOrchestrator::new()
                .with_service(&service, "color", Color::Blue)
                .with_deployment("ai-agents", "ai-agent-blue", 3, "registry.local/ai-agent:1.3.0")
                .with_deployment("ai-agents", "ai-agent-green", 3, "registry.local/ai-agent:1.4.0"),
        );
        let (cancel_tx, _) = watch::channel(false);
        Self {
            config,
            orch,
            alerts: Arc::new(MemoryAlertSource::new()),
            probe: Arc::new(ScriptedProbe::default()),
            store: AuditStore::open_in_memory().unwrap(),
            locks: ServiceLocks::new(),
            cancel_tx,
        }
    }

    pub fn controller(&self) -> RolloutController {
        RolloutController::new(
            self.config.clone(),
            self.orch.clone(),
            HealthGate::new(self.probe.clone()),
            self.alerts.clone(),
            self.store.clone(),
        )
        .with_locks(self.locks.clone())
        .with_cancel(self.cancel_tx.subscribe())
        .initiated_by("ci-pipeline")
    }

    pub fn service(&self) -> ServiceRef {
        self.config.service_ref()
    }

    pub fn green(&self) -> Environment {
        self.config.environment(Color::Green, None, None).unwrap()
    }

    pub fn selector(&self) -> Option<String> {
        self.orch.selector(&self.service(), "color")
    }
}

pub fn critical_alert() -> AlertSignal {
    AlertSignal {
        metric: "http_error_rate".to_string(),
        value: 0.21,
        threshold: 0.05,
        severity: Severity::Critical,
        fired_at_ms: cutover_core::epoch_millis(),
    }
}

/// Poll the in-memory selector until it reads `color`.
pub async fn wait_for_selector(orch: &MemoryOrchestrator, service: &ServiceRef, color: Color) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while orch.selector(service, "color").as_deref() != Some(color.as_str()) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("selector never reached the expected color");
}
