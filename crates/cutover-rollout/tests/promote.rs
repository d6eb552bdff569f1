//! End-to-end promote scenarios against the in-memory cluster.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use common::{Harness, SERVICE_KEY, critical_alert, wait_for_selector};
use cutover_core::{Color, RolloutOutcome};
use cutover_health::ProbeResult;
use cutover_rollout::RolloutError;

#[tokio::test]
async fn healthy_rollout_goes_stable_and_scales_down_blue() {
    let h = Harness::new();
    let report = h.controller().promote_or_rollback(&h.green()).await.unwrap();

    assert_eq!(report.outcome, RolloutOutcome::Stable);
    assert_eq!(report.verdicts, 1);
    assert!(report.scaled_down);
    assert_eq!(report.switch.as_ref().unwrap().initiated_by, "ci-pipeline");

    assert_eq!(h.selector().as_deref(), Some("green"));
    assert_eq!(h.orch.deployment("ai-agents", "ai-agent-blue").unwrap().replicas, 0);
    assert_eq!(h.orch.deployment("ai-agents", "ai-agent-green").unwrap().replicas, 3);

    let calls = h.probe.calls();
    assert_eq!(&calls[..3], &["liveness", "readiness", "smoke"]);

    assert_eq!(h.store.list_switches(SERVICE_KEY).unwrap().len(), 1);
    let verdict = h.store.last_verdict(SERVICE_KEY).unwrap().unwrap();
    assert!(verdict.passed);
    let rollout = h.store.last_rollout(SERVICE_KEY).unwrap().unwrap();
    assert_eq!(rollout.outcome, RolloutOutcome::Stable);
    assert_eq!(rollout.from, Color::Blue);
    assert_eq!(rollout.to, Color::Green);
}

#[tokio::test]
async fn promote_runs_without_a_pinned_image() {
    let mut h = Harness::new();
    if let Some(green) = h.config.environments.green.as_mut() {
        green.image = None;
    }
    let controller = h.controller();
    let green = controller.promote_environment(Color::Green).await.unwrap();
    assert_eq!(green.image, "registry.local/ai-agent:1.4.0");

    let report = controller.promote_or_rollback(&green).await.unwrap();
    assert_eq!(report.outcome, RolloutOutcome::Stable);
    assert_eq!(h.selector().as_deref(), Some("green"));
}

#[tokio::test]
async fn failing_readiness_never_switches() {
    let h = Harness::new();
    h.probe
        .set("readiness", ProbeResult::unhealthy("status 503 Service Unavailable"));

    let err = h
        .controller()
        .promote_or_rollback(&h.green())
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 2);
    match &err {
        RolloutError::ReadinessFailure {
            failed_checks,
            active,
            ..
        } => {
            assert_eq!(failed_checks, &vec!["readiness".to_string()]);
            assert_eq!(*active, Some(Color::Blue));
        }
        other => panic!("unexpected error {other}"),
    }

    assert_eq!(h.orch.patch_calls(), 0);
    assert_eq!(h.selector().as_deref(), Some("blue"));
    assert_eq!(h.orch.deployment("ai-agents", "ai-agent-blue").unwrap().replicas, 3);

    let verdicts = h.store.list_verdicts(SERVICE_KEY).unwrap();
    assert_eq!(verdicts.len(), 3);
    assert!(verdicts.iter().all(|v| !v.passed));
    assert_eq!(
        h.store.last_rollout(SERVICE_KEY).unwrap().unwrap().outcome,
        RolloutOutcome::ReadinessFailed
    );
}

#[tokio::test]
async fn gate_retries_until_a_verdict_passes() {
    let h = Harness::new();
    h.probe.set("smoke", ProbeResult::failed("connection refused"));

    let probe = h.probe.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        probe.set("smoke", ProbeResult::Healthy);
    });

    let report = h.controller().promote_or_rollback(&h.green()).await.unwrap();
    assert_eq!(report.outcome, RolloutOutcome::Stable);
    assert!(report.verdicts >= 2, "verdicts = {}", report.verdicts);
}

#[tokio::test]
async fn critical_alert_mid_window_reverts_to_blue() {
    let h = Harness::new();
    let orch = h.orch.clone();
    let alerts = h.alerts.clone();
    let service = h.service();
    tokio::spawn(async move {
        wait_for_selector(&orch, &service, Color::Green).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        alerts.fire(critical_alert());
    });

    let started = Instant::now();
    let err = h
        .controller()
        .promote_or_rollback(&h.green())
        .await
        .unwrap_err();
    // Reverted well before the 400ms window would have closed.
    assert!(started.elapsed() < Duration::from_millis(400));

    assert_eq!(err.exit_code(), 5);
    assert!(matches!(
        err,
        RolloutError::DeploymentFailed {
            reverted_to: Color::Blue,
            ..
        }
    ));
    assert_eq!(h.selector().as_deref(), Some("blue"));

    let switches = h.store.list_switches(SERVICE_KEY).unwrap();
    assert_eq!(switches.len(), 2);
    assert_eq!((switches[0].from, switches[0].to), (Color::Blue, Color::Green));
    assert_eq!((switches[1].from, switches[1].to), (Color::Green, Color::Blue));
    assert_eq!(switches[1].initiated_by, "rollback-supervisor");

    // Nothing is scaled down after a revert.
    assert_eq!(h.orch.deployment("ai-agents", "ai-agent-blue").unwrap().replicas, 3);
    assert_eq!(
        h.store.last_rollout(SERVICE_KEY).unwrap().unwrap().outcome,
        RolloutOutcome::Reverted
    );
}

#[tokio::test]
async fn health_failures_on_new_color_revert() {
    let h = Harness::new();
    let orch = h.orch.clone();
    let probe = h.probe.clone();
    let service = h.service();
    tokio::spawn(async move {
        wait_for_selector(&orch, &service, Color::Green).await;
        probe.set("readiness", ProbeResult::failed("connection reset"));
    });

    let err = h
        .controller()
        .promote_or_rollback(&h.green())
        .await
        .unwrap_err();
    match &err {
        RolloutError::DeploymentFailed { reason, .. } => {
            assert!(reason.contains("consecutive health failures"), "{reason}");
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(h.selector().as_deref(), Some("blue"));
}

#[tokio::test]
async fn second_promote_is_rejected_while_first_runs() {
    let h = Arc::new(Harness::new());

    let first = {
        let h = h.clone();
        tokio::spawn(async move { h.controller().promote_or_rollback(&h.green()).await })
    };
    wait_for_selector(&h.orch, &h.service(), Color::Green).await;

    let err = h
        .controller()
        .promote_or_rollback(&h.green())
        .await
        .unwrap_err();
    assert!(matches!(err, RolloutError::RolloutInProgress { .. }));
    assert_eq!(err.exit_code(), 4);

    let report = first.await.unwrap().unwrap();
    assert_eq!(report.outcome, RolloutOutcome::Stable);
    // The rejected attempt never got far enough to write a record.
    assert_eq!(h.store.list_rollouts(SERVICE_KEY).unwrap().len(), 1);
}

#[tokio::test]
async fn promoting_the_active_color_is_a_noop() {
    let h = Harness::new();
    h.controller().promote_or_rollback(&h.green()).await.unwrap();

    let report = h.controller().promote_or_rollback(&h.green()).await.unwrap();
    assert_eq!(report.outcome, RolloutOutcome::AlreadyActive);
    assert!(report.switch.is_none());
    assert_eq!(h.orch.patch_calls(), 1);
    assert_eq!(h.store.list_switches(SERVICE_KEY).unwrap().len(), 1);
}

#[tokio::test]
async fn cancel_before_switch_aborts_without_touching_traffic() {
    let h = Harness::new();
    let controller = h.controller();
    h.cancel_tx.send_replace(true);

    let err = controller.promote_or_rollback(&h.green()).await.unwrap_err();
    assert!(matches!(err, RolloutError::Cancelled { stage: "gate" }));
    assert_eq!(err.exit_code(), 8);
    assert_eq!(h.orch.patch_calls(), 0);
    assert_eq!(h.selector().as_deref(), Some("blue"));
    assert_eq!(
        h.store.last_rollout(SERVICE_KEY).unwrap().unwrap().outcome,
        RolloutOutcome::Aborted
    );
}

#[tokio::test]
async fn cancel_during_monitoring_reverts() {
    let h = Harness::new();
    let controller = h.controller();
    let orch = h.orch.clone();
    let service = h.service();
    let cancel = h.cancel_tx.clone();
    tokio::spawn(async move {
        wait_for_selector(&orch, &service, Color::Green).await;
        cancel.send_replace(true);
    });

    let err = controller.promote_or_rollback(&h.green()).await.unwrap_err();
    assert!(matches!(err, RolloutError::Cancelled { stage: "monitoring" }));
    assert_eq!(h.selector().as_deref(), Some("blue"));
    assert_eq!(
        h.store.last_rollout(SERVICE_KEY).unwrap().unwrap().outcome,
        RolloutOutcome::Reverted
    );
}

#[tokio::test]
async fn exactly_one_color_is_active_throughout_a_revert() {
    let h = Harness::new();
    let orch = h.orch.clone();
    let alerts = h.alerts.clone();
    let service = h.service();
    tokio::spawn(async move {
        wait_for_selector(&orch, &service, Color::Green).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        alerts.fire(critical_alert());
    });

    let done = Arc::new(AtomicBool::new(false));
    let observer = {
        let orch = h.orch.clone();
        let service = h.service();
        let done = done.clone();
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while !done.load(Ordering::SeqCst) {
                seen.push(orch.selector(&service, "color"));
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            seen
        })
    };

    let _ = h.controller().promote_or_rollback(&h.green()).await;
    done.store(true, Ordering::SeqCst);

    let seen = observer.await.unwrap();
    assert!(!seen.is_empty());
    for value in seen {
        assert!(
            matches!(value.as_deref(), Some("blue") | Some("green")),
            "observed selector {value:?}"
        );
    }
}
