//! Deploy, manual switch and status against the in-memory cluster.

mod common;

use std::time::Duration;

use common::{Harness, SERVICE_KEY};
use cutover_core::{Color, RolloutOutcome};
use cutover_rollout::{RolloutError, SwitchOutcome};

#[tokio::test]
async fn deploy_applies_and_waits_for_ready_replicas() {
    let h = Harness::new();
    let controller = h.controller();
    let env = controller
        .environment(Color::Green, Some("registry.local/ai-agent:1.5.0"), Some(2))
        .unwrap();

    let status = controller.deploy(&env).await.unwrap();
    assert!(status.is_ready());
    assert_eq!(status.replicas, 2);
    assert_eq!(status.ready_replicas, 2);
    assert_eq!((status.generation, status.observed_generation), (2, 2));

    let stored = h.orch.deployment("ai-agents", "ai-agent-green").unwrap();
    assert_eq!(stored.image.as_deref(), Some("registry.local/ai-agent:1.5.0"));
    // Deploying never moves traffic.
    assert_eq!(h.selector().as_deref(), Some("blue"));
    assert_eq!(h.orch.patch_calls(), 0);
}

#[tokio::test]
async fn deploy_refuses_the_active_color() {
    let h = Harness::new();
    let controller = h.controller();
    let blue = controller.environment(Color::Blue, None, None).unwrap();

    let err = controller.deploy(&blue).await.unwrap_err();
    assert_eq!(err.exit_code(), 3);
    assert!(matches!(
        err,
        RolloutError::Conflict {
            actual: Some(Color::Blue),
            ..
        }
    ));
    assert_eq!(
        h.orch.deployment("ai-agents", "ai-agent-blue").unwrap().image.as_deref(),
        Some("registry.local/ai-agent:1.3.0")
    );
}

#[tokio::test]
async fn stalled_rollout_times_out() {
    let h = Harness::new();
    let orch = std::sync::Arc::new(
        cutover_orchestrator::MemoryOrchestrator::new().with_service(&h.service(), "color", Color::Blue),
    );
    orch.stall_rollouts(true);
    let controller = cutover_rollout::RolloutController::new(
        h.config.clone(),
        orch,
        cutover_health::HealthGate::new(h.probe.clone()),
        h.alerts.clone(),
        h.store.clone(),
    );

    let err = controller.deploy(&h.green()).await.unwrap_err();
    assert_eq!(err.exit_code(), 2);
    match err {
        RolloutError::DeployTimeout {
            deployment,
            ready,
            desired,
            waited,
        } => {
            assert_eq!(deployment, "ai-agent-green");
            assert_eq!(ready, 0);
            assert_eq!(desired, 3);
            assert_eq!(waited, Duration::from_millis(200));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn redeploying_a_scaled_up_color_waits_for_the_new_generation() {
    // Green still runs three ready replicas of the previous image.
    let h = Harness::new();
    h.orch.stall_rollouts(true);
    let env = h
        .controller()
        .environment(Color::Green, Some("registry.local/ai-agent:1.5.0"), None)
        .unwrap();

    let err = h.controller().deploy(&env).await.unwrap_err();
    match err {
        RolloutError::DeployTimeout { ready, desired, .. } => {
            // The old ReplicaSet's ready pods never count for the new spec.
            assert_eq!(ready, 3);
            assert_eq!(desired, 3);
        }
        other => panic!("unexpected error {other}"),
    }

    let stored = h.orch.deployment("ai-agents", "ai-agent-green").unwrap();
    assert_eq!((stored.generation, stored.observed_generation), (2, 1));
}

#[tokio::test]
async fn deploy_is_cancellable() {
    let h = Harness::new();
    h.orch.stall_rollouts(true);
    let controller = h.controller();
    let cancel = h.cancel_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.send_replace(true);
    });

    let err = controller.deploy(&h.green()).await.unwrap_err();
    assert!(matches!(err, RolloutError::Cancelled { stage: "deploy" }));
}

#[tokio::test]
async fn promote_environment_reads_the_live_image() {
    let h = Harness::new();
    let config =
        cutover_core::CutoverConfig::from_toml_str(include_str!("../../../cutover.toml")).unwrap();
    let controller = cutover_rollout::RolloutController::new(
        config,
        h.orch.clone(),
        cutover_health::HealthGate::new(h.probe.clone()),
        h.alerts.clone(),
        h.store.clone(),
    );

    let green = controller.promote_environment(Color::Green).await.unwrap();
    assert_eq!(green.name, "ai-agent-green");
    assert_eq!(green.endpoint, "http://ai-agent-green.ai-agents:8000");
    assert_eq!(green.image, "registry.local/ai-agent:1.4.0");
}

#[tokio::test]
async fn promote_environment_tolerates_a_missing_deployment() {
    let h = Harness::new();
    let orch = cutover_orchestrator::MemoryOrchestrator::new()
        .with_service(&h.service(), "color", Color::Blue);
    let mut config = h.config.clone();
    if let Some(green) = config.environments.green.as_mut() {
        green.image = None;
    }
    let controller = cutover_rollout::RolloutController::new(
        config,
        std::sync::Arc::new(orch),
        cutover_health::HealthGate::new(h.probe.clone()),
        h.alerts.clone(),
        h.store.clone(),
    );

    let green = controller.promote_environment(Color::Green).await.unwrap();
    assert_eq!(green.image, "");
    assert_eq!(green.replicas, 3);
}

#[tokio::test]
async fn manual_switch_moves_traffic_once() {
    let h = Harness::new();
    let controller = h.controller().initiated_by("oncall");

    match controller.switch_to(Color::Green).await.unwrap() {
        SwitchOutcome::Switched(record) => {
            assert_eq!(record.from, Color::Blue);
            assert_eq!(record.to, Color::Green);
            assert_eq!(record.initiated_by, "oncall");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(h.selector().as_deref(), Some("green"));

    let again = controller.switch_to(Color::Green).await.unwrap();
    assert_eq!(again, SwitchOutcome::Unchanged { active: Color::Green });
    assert_eq!(h.orch.patch_calls(), 1);
    assert_eq!(h.store.list_switches(SERVICE_KEY).unwrap().len(), 1);
}

#[tokio::test]
async fn manual_switch_respects_the_rollout_lock() {
    let h = Harness::new();
    let _held = h.locks.try_acquire(&h.service()).unwrap();

    let err = h.controller().switch_to(Color::Green).await.unwrap_err();
    assert!(matches!(err, RolloutError::RolloutInProgress { .. }));
    assert_eq!(h.selector().as_deref(), Some("blue"));
}

#[tokio::test]
async fn status_reports_selector_deployments_and_history() {
    let h = Harness::new();
    let before = h.controller().status().await.unwrap();
    assert_eq!(before.service, SERVICE_KEY);
    assert_eq!(before.active, Some(Color::Blue));
    assert!(before.last_switch.is_none());
    assert!(before.last_rollout.is_none());

    h.controller().promote_or_rollback(&h.green()).await.unwrap();

    let after = h.controller().status().await.unwrap();
    assert_eq!(after.active, Some(Color::Green));
    assert_eq!(after.blue.unwrap().replicas, 0);
    assert_eq!(after.green.unwrap().ready_replicas, 3);
    assert_eq!(after.last_switch.unwrap().to, Color::Green);
    assert!(after.last_verdict.unwrap().passed);
    assert_eq!(after.last_rollout.unwrap().outcome, RolloutOutcome::Stable);
}

#[tokio::test]
async fn status_tolerates_a_missing_deployment() {
    let h = Harness::new();
    let orch = cutover_orchestrator::MemoryOrchestrator::new()
        .with_service(&h.service(), "color", Color::Blue)
        .with_deployment("ai-agents", "ai-agent-blue", 3, "registry.local/ai-agent:1.3.0");
    let controller = cutover_rollout::RolloutController::new(
        h.config.clone(),
        std::sync::Arc::new(orch),
        cutover_health::HealthGate::new(h.probe.clone()),
        h.alerts.clone(),
        h.store.clone(),
    );

    let status = controller.status().await.unwrap();
    assert!(status.blue.is_some());
    assert!(status.green.is_none());
}
