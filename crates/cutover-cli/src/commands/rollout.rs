use std::path::{Path, PathBuf};

use cutover_core::Color;
use cutover_rollout::SwitchOutcome;

use crate::context::Context;

pub async fn deploy(
    config: &Path,
    state: Option<PathBuf>,
    color: Color,
    image: Option<&str>,
    replicas: Option<u32>,
) -> anyhow::Result<()> {
    let ctx = Context::open(config, state)?;
    let controller = ctx.controller("cutover").await?;
    let environment = controller.environment(color, image, replicas)?;

    let status = controller.deploy(&environment).await?;
    println!(
        "✓ {} ready ({}/{} replicas)",
        status.name, status.ready_replicas, status.replicas
    );
    println!("  Image: {}", environment.image);
    println!("  Next:  cutover promote --color {color}");
    Ok(())
}

pub async fn promote(
    config: &Path,
    state: Option<PathBuf>,
    color: Color,
    actor: &str,
) -> anyhow::Result<()> {
    let ctx = Context::open(config, state)?;
    let controller = ctx.controller(actor).await?;
    let environment = controller.promote_environment(color).await?;

    let report = controller.promote_or_rollback(&environment).await?;
    match report.switch {
        None => println!("✓ {} already serving {}", ctx.config.service_ref(), report.to),
        Some(record) => {
            println!(
                "✓ {} switched {} → {} and stable after {:?}",
                ctx.config.service_ref(),
                record.from,
                record.to,
                ctx.config.supervisor.cool_down
            );
            println!("  Readiness verdicts: {}", report.verdicts);
            if report.scaled_down {
                println!("  {} scaled to zero", ctx.config.deployment_name(report.from));
            }
        }
    }
    if let Some(detail) = report.detail {
        println!("  Note: {detail}");
    }
    Ok(())
}

pub async fn switch(
    config: &Path,
    state: Option<PathBuf>,
    color: Color,
    actor: &str,
) -> anyhow::Result<()> {
    let ctx = Context::open(config, state)?;
    let controller = ctx.controller(actor).await?;

    match controller.switch_to(color).await? {
        SwitchOutcome::Switched(record) => {
            println!(
                "✓ {} switched {} → {}",
                ctx.config.service_ref(),
                record.from,
                record.to
            );
        }
        SwitchOutcome::Unchanged { active } => {
            println!("✓ {} already serving {active}", ctx.config.service_ref());
        }
    }
    Ok(())
}
