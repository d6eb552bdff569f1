//! cutover: blue-green rollouts from a CI pipeline.
//!
//! ```text
//! cutover deploy  --color green --image registry.local/ai-agent:1.4.0
//! cutover promote --color green
//! cutover status
//! ```
//!
//! The process exit code tells the pipeline what happened; see
//! `RolloutError::exit_code`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use cutover_core::Color;

mod commands;
mod context;

#[derive(Parser)]
#[command(
    name = "cutover",
    about = "Blue-green rollouts with automatic rollback",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to cutover.toml.
    #[arg(short, long, global = true, default_value = "cutover.toml")]
    config: PathBuf,

    /// Override [state].path from the config file.
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Log format: text or json.
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the Deployment for the idle color and wait until it is ready.
    Deploy {
        /// Color to deploy; must not be the one serving traffic.
        #[arg(long)]
        color: Color,
        /// Image to run (default: [environments.<color>].image).
        #[arg(long)]
        image: Option<String>,
        /// Replica count (default: [environments.<color>].replicas).
        #[arg(long)]
        replicas: Option<u32>,
    },
    /// Gate the idle color, switch traffic to it, and supervise the
    /// cool-down window. Reverts automatically on alerts or failed health.
    Promote {
        /// Color to promote.
        #[arg(long)]
        color: Color,
        /// Name recorded in the switch audit trail.
        #[arg(long, default_value = "cutover")]
        actor: String,
    },
    /// Point traffic at a color immediately, without gating.
    Switch {
        #[arg(long)]
        color: Color,
        #[arg(long, default_value = "operator")]
        actor: String,
    },
    /// Show the live selector, both Deployments and the latest history.
    Status,
    /// List recorded switches and rollouts.
    History {
        /// Show at most this many entries of each kind.
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output format: text or json.
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Print rollout counters in Prometheus text format.
    Metrics,
    /// Validate the config file and print it with defaults filled in.
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(&cli.log_format) {
        eprintln!("error: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = commands::exit_code(&e);
            eprintln!("error: {e:#}");
            ExitCode::from(code)
        }
    }
}

fn init_tracing(format: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,cutover=debug"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        "json" => builder.json().init(),
        "text" => builder.init(),
        other => anyhow::bail!("unknown log format {other:?} (expected text or json)"),
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let Cli {
        config,
        state,
        command,
        ..
    } = cli;

    match command {
        Commands::Deploy {
            color,
            image,
            replicas,
        } => commands::rollout::deploy(&config, state, color, image.as_deref(), replicas).await,
        Commands::Promote { color, actor } => {
            commands::rollout::promote(&config, state, color, &actor).await
        }
        Commands::Switch { color, actor } => {
            commands::rollout::switch(&config, state, color, &actor).await
        }
        Commands::Status => commands::report::status(&config, state).await,
        Commands::History { limit, format } => {
            commands::report::history(&config, state, limit, &format)
        }
        Commands::Metrics => commands::report::metrics(&config, state),
        Commands::Config => commands::report::config(&config),
    }
}
