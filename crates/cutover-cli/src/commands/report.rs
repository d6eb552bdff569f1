use std::path::{Path, PathBuf};

use chrono::DateTime;

use cutover_alerts::{RolloutMetrics, render_prometheus};
use cutover_core::{RolloutRecord, SwitchRecord};
use cutover_orchestrator::DeploymentStatus;
use cutover_rollout::StatusReport;

use crate::context::{Context, load_config};

pub async fn status(config: &Path, state: Option<PathBuf>) -> anyhow::Result<()> {
    let (ctx, persisted) = Context::open_for_reading(config, state)?;
    let report = ctx.controller("cutover").await?.status().await?;
    print!("{}", format_status(&report));
    if !persisted {
        println!("  (audit store busy; a rollout is probably running)");
    }
    Ok(())
}

pub fn history(
    config: &Path,
    state: Option<PathBuf>,
    limit: usize,
    format: &str,
) -> anyhow::Result<()> {
    let (ctx, _) = Context::open_for_reading(config, state)?;
    let key = ctx.config.service_ref().key();
    let switches = tail(ctx.store.list_switches(&key)?, limit);
    let rollouts = tail(ctx.store.list_rollouts(&key)?, limit);

    match format {
        "json" => {
            let doc = serde_json::json!({
                "service": key,
                "switches": switches,
                "rollouts": rollouts,
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        _ => print!("{}", format_history(&key, &switches, &rollouts)),
    }
    Ok(())
}

pub fn metrics(config: &Path, state: Option<PathBuf>) -> anyhow::Result<()> {
    let (ctx, _) = Context::open_for_reading(config, state)?;
    let metrics = RolloutMetrics::collect(&ctx.store)?;
    print!("{}", render_prometheus(&metrics));
    Ok(())
}

pub fn config(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path, None)?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

fn tail<T>(mut items: Vec<T>, limit: usize) -> Vec<T> {
    if items.len() > limit {
        items.drain(..items.len() - limit);
    }
    items
}

fn timestamp(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}

fn deployment_line(label: &str, deployment: Option<&DeploymentStatus>) -> String {
    match deployment {
        Some(d) => format!(
            "  {label:<6} {} {}/{} ready  {}\n",
            d.name,
            d.ready_replicas,
            d.replicas,
            d.image.as_deref().unwrap_or("-")
        ),
        None => format!("  {label:<6} (not deployed)\n"),
    }
}

fn format_status(report: &StatusReport) -> String {
    let mut out = format!("Service: {}\n", report.service);
    match report.active {
        Some(color) => out.push_str(&format!("  Active: {color}\n")),
        None => out.push_str("  Active: (selector missing)\n"),
    }
    out.push_str(&deployment_line("blue", report.blue.as_ref()));
    out.push_str(&deployment_line("green", report.green.as_ref()));
    if let Some(s) = &report.last_switch {
        out.push_str(&format!(
            "  Last switch:  {} → {} by {} at {}\n",
            s.from,
            s.to,
            s.initiated_by,
            timestamp(s.timestamp_ms / 1000)
        ));
    }
    if let Some(v) = &report.last_verdict {
        let result = if v.passed {
            "passed".to_string()
        } else {
            format!("failed ({})", v.failed_check_ids().join(", "))
        };
        out.push_str(&format!(
            "  Last verdict: {} {result} at {}\n",
            v.environment,
            timestamp(v.timestamp)
        ));
    }
    if let Some(r) = &report.last_rollout {
        out.push_str(&format!(
            "  Last rollout: {} → {} {} at {}\n",
            r.from,
            r.to,
            r.outcome,
            timestamp(r.finished_at)
        ));
    }
    out
}

fn format_history(service: &str, switches: &[SwitchRecord], rollouts: &[RolloutRecord]) -> String {
    let mut out = format!("Service: {service}\n\nSwitches:\n");
    if switches.is_empty() {
        out.push_str("  (none)\n");
    }
    for s in switches {
        out.push_str(&format!(
            "  {}  {} → {}  by {}\n",
            timestamp(s.timestamp_ms / 1000),
            s.from,
            s.to,
            s.initiated_by
        ));
    }

    out.push_str("\nRollouts:\n");
    if rollouts.is_empty() {
        out.push_str("  (none)\n");
    }
    for r in rollouts {
        out.push_str(&format!(
            "  {}  {} → {}  {:<16} {}s\n",
            timestamp(r.started_at),
            r.from,
            r.to,
            r.outcome.to_string(),
            r.finished_at.saturating_sub(r.started_at)
        ));
        if let Some(detail) = &r.detail {
            out.push_str(&format!("      {detail}\n"));
        }
    }
    out
}
