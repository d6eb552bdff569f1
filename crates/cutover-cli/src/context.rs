//! Wiring from a config file to a ready-to-use controller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::watch;
use tracing::{info, warn};

use cutover_alerts::{AlertSource, AlertmanagerSource, NoAlerts};
use cutover_core::CutoverConfig;
use cutover_health::{HealthGate, HttpProbe};
use cutover_orchestrator::KubeClient;
use cutover_rollout::{RolloutController, RolloutError, ServiceLocks};
use cutover_state::AuditStore;

pub struct Context {
    pub config: CutoverConfig,
    pub store: AuditStore,
    pub locks: ServiceLocks,
}

/// Load and validate the config, applying the `--state` override.
pub fn load_config(path: &Path, state: Option<PathBuf>) -> anyhow::Result<CutoverConfig> {
    let mut config = CutoverConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    if let Some(state) = state {
        config.state.path = state;
    }
    Ok(config)
}

/// Lock files live next to the audit database.
pub fn lock_dir(config: &CutoverConfig) -> PathBuf {
    match config.state.path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

impl Context {
    pub fn open(path: &Path, state: Option<PathBuf>) -> anyhow::Result<Self> {
        let config = load_config(path, state)?;
        let locks = ServiceLocks::with_dir(&lock_dir(&config));
        let store = match AuditStore::open(&config.state.path) {
            Ok(store) => store,
            Err(e) => {
                // The database is held exclusively by a running rollout;
                // report that rather than a bare open failure.
                if let Err(busy @ RolloutError::RolloutInProgress { .. }) =
                    locks.try_acquire(&config.service_ref())
                {
                    return Err(busy.into());
                }
                return Err(anyhow::Error::new(e)
                    .context(format!("opening {}", config.state.path.display())));
            }
        };
        info!(service = %config.service_ref(), state = %config.state.path.display(), "config loaded");
        Ok(Self {
            config,
            store,
            locks,
        })
    }

    /// Like `open`, but falls back to an empty in-memory store when the
    /// audit database cannot be opened. Read-only commands use this so that
    /// `status` keeps working while a promote holds the database.
    pub fn open_for_reading(path: &Path, state: Option<PathBuf>) -> anyhow::Result<(Self, bool)> {
        let config = load_config(path, state)?;
        let locks = ServiceLocks::with_dir(&lock_dir(&config));
        match AuditStore::open(&config.state.path) {
            Ok(store) => Ok((
                Self {
                    config,
                    store,
                    locks,
                },
                true,
            )),
            Err(e) => {
                warn!(state = %config.state.path.display(), error = %e, "audit store unavailable; history omitted");
                Ok((
                    Self {
                        config,
                        store: AuditStore::open_in_memory()?,
                        locks,
                    },
                    false,
                ))
            }
        }
    }

    pub async fn controller(&self, actor: &str) -> anyhow::Result<RolloutController> {
        let config = &self.config;
        let orchestrator = KubeClient::connect(
            config.orchestrator.api_url.as_deref(),
            config.orchestrator.request_timeout,
        )
        .await
        .context("connecting to the Kubernetes API")?;
        let alerts: Arc<dyn AlertSource> = match &config.alerts.alertmanager_url {
            Some(url) => Arc::new(
                AlertmanagerSource::new(url, config.alerts.request_timeout)
                    .context("building the Alertmanager client")?,
            ),
            None => {
                warn!("no [alerts].alertmanager_url configured; only health checks can trigger a rollback");
                Arc::new(NoAlerts)
            }
        };
        Ok(RolloutController::new(
            config.clone(),
            Arc::new(orchestrator),
            HealthGate::new(Arc::new(HttpProbe::new())),
            alerts,
            self.store.clone(),
        )
        .with_locks(self.locks.clone())
        .with_cancel(cancel_on_ctrl_c())
        .initiated_by(actor))
    }
}

/// Flip a cancel flag on the first Ctrl-C. A rollout that is already
/// monitoring reverts before the process exits.
fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received; cancelling");
                tx.send_replace(true);
                // Keep the sender alive so receivers never see a closed channel.
                std::future::pending::<()>().await;
            }
            Err(e) => warn!(error = %e, "failed to install Ctrl-C handler"),
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutover_core::Color;

    const MINIMAL: &str = r#"
[service]
namespace = "ai-agents"
name = "ai-agent"

[environments.green]
endpoint = "http://ai-agent-green.ai-agents:8000"
image = "registry.local/ai-agent:1.4.0"
"#;

    fn write_config(dir: &Path) -> PathBuf {
        let path = dir.join("cutover.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        path
    }

    fn bundled() -> CutoverConfig {
        CutoverConfig::from_toml_str(include_str!("../../../cutover.toml")).unwrap()
    }

    #[test]
    fn bundled_sample_config_is_valid() {
        let config = bundled();
        assert_eq!(config.supervisor_check().id, "readiness");
        assert_eq!(config.gate.checks.len(), 3);
        assert_eq!(config.orchestrator.api_url, None);
        // Green has no pinned image; `deploy --image` supplies it.
        assert!(config.environment(Color::Green, None, None).is_err());
        assert!(
            config
                .environment(Color::Green, Some("registry.local/ai-agent:1.4.0"), None)
                .is_ok()
        );
    }

    #[test]
    fn bundled_sample_config_promotes_without_an_image() {
        let config = bundled();
        for color in [Color::Blue, Color::Green] {
            let env = config.promote_environment(color).unwrap();
            assert_eq!(env.name, format!("ai-agent-{color}"));
            assert_eq!(env.endpoint, format!("http://ai-agent-{color}.ai-agents:8000"));
            assert_eq!(env.replicas, 3);
        }
    }

    #[tokio::test]
    async fn controller_connects_to_an_explicit_api_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cutover.toml");
        let toml = format!("{MINIMAL}\n[orchestrator]\napi_url = \"http://127.0.0.1:8001\"\n");
        std::fs::write(&path, toml).unwrap();

        let ctx = Context::open(&path, Some(dir.path().join("audit.redb"))).unwrap();
        let controller = ctx.controller("ci").await.unwrap();
        assert_eq!(controller.service().key(), "ai-agents/ai-agent");
    }

    #[test]
    fn state_override_replaces_config_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path());
        let state = dir.path().join("state/audit.redb");

        let config = load_config(&path, Some(state.clone())).unwrap();
        assert_eq!(config.state.path, state);
        assert_eq!(lock_dir(&config), dir.path().join("state"));
    }

    #[test]
    fn bare_state_file_locks_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path());
        let config = load_config(&path, Some(PathBuf::from("audit.redb"))).unwrap();
        assert_eq!(lock_dir(&config), PathBuf::from("."));
    }

    #[test]
    fn missing_config_names_the_file() {
        let err = load_config(Path::new("/nonexistent/cutover.toml"), None)
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("/nonexistent/cutover.toml"));
    }

    #[test]
    fn second_open_reports_rollout_in_progress() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path());
        let state = Some(dir.path().join("audit.redb"));

        let first = Context::open(&path, state.clone()).unwrap();
        let _held = first.locks.try_acquire(&first.config.service_ref()).unwrap();

        let err = Context::open(&path, state).err().unwrap();
        let rollout = err.downcast_ref::<RolloutError>().unwrap();
        assert_eq!(rollout.exit_code(), 4);
    }

    #[test]
    fn reading_falls_back_when_database_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path());
        let state = Some(dir.path().join("audit.redb"));

        let _first = Context::open(&path, state.clone()).unwrap();
        let (_ctx, persisted) = Context::open_for_reading(&path, state).unwrap();
        assert!(!persisted);
    }
}
