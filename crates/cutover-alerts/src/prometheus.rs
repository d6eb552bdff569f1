//! Prometheus text exposition format.
//!
//! Renders rollout metrics for a node-exporter textfile collector or a
//! scrape endpoint.

use std::fmt::Write;

use cutover_core::Color;

use crate::collector::RolloutMetrics;

/// Render rollout metrics into Prometheus text format.
///
/// Produces COUNTER and GAUGE metrics with `service` labels.
pub fn render_prometheus(metrics: &[RolloutMetrics]) -> String {
    let mut out = String::new();

    out.push_str("# HELP cutover_switches_total Traffic switches applied.\n");
    out.push_str("# TYPE cutover_switches_total counter\n");
    for m in metrics {
        let _ = writeln!(
            out,
            "cutover_switches_total{{service=\"{}\"}} {}",
            escape(&m.service),
            m.switches_total
        );
    }

    out.push_str("# HELP cutover_rollouts_total Promote invocations by outcome.\n");
    out.push_str("# TYPE cutover_rollouts_total counter\n");
    for m in metrics {
        for (outcome, count) in &m.rollouts {
            let _ = writeln!(
                out,
                "cutover_rollouts_total{{service=\"{}\",outcome=\"{outcome}\"}} {count}",
                escape(&m.service)
            );
        }
    }

    out.push_str("# HELP cutover_active_color Color the last switch routed traffic to (1 = active).\n");
    out.push_str("# TYPE cutover_active_color gauge\n");
    for m in metrics {
        let Some(active) = m.active_color else {
            continue;
        };
        for color in [Color::Blue, Color::Green] {
            let _ = writeln!(
                out,
                "cutover_active_color{{service=\"{}\",color=\"{color}\"}} {}",
                escape(&m.service),
                u8::from(color == active)
            );
        }
    }

    out.push_str("# HELP cutover_last_verdict_passed Whether the latest readiness verdict passed.\n");
    out.push_str("# TYPE cutover_last_verdict_passed gauge\n");
    for m in metrics {
        if let Some(passed) = m.last_verdict_passed {
            let _ = writeln!(
                out,
                "cutover_last_verdict_passed{{service=\"{}\"}} {}",
                escape(&m.service),
                u8::from(passed)
            );
        }
    }

    out.push_str("# HELP cutover_last_rollout_timestamp_seconds Finish time of the latest rollout.\n");
    out.push_str("# TYPE cutover_last_rollout_timestamp_seconds gauge\n");
    for m in metrics {
        if let Some(ts) = m.last_rollout_finished_at {
            let _ = writeln!(
                out,
                "cutover_last_rollout_timestamp_seconds{{service=\"{}\"}} {ts}",
                escape(&m.service)
            );
        }
    }

    out
}

/// Escape a label value.
fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
