//! cutover.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::serde_str;
use crate::types::{CheckSpec, Color, Environment, ServiceRef};

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("no [environments.{0}] section and no overrides given")]
    MissingEnvironment(Color),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CutoverConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub environments: EnvironmentsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub namespace: String,
    pub name: String,
    /// Selector label whose value names the active color.
    #[serde(default = "default_selector_key")]
    pub selector_key: String,
    /// Deployment names are `{prefix}-{color}`; defaults to the service name.
    #[serde(default)]
    pub deployment_prefix: Option<String>,
}

fn default_selector_key() -> String {
    "color".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Kubernetes API base URL without credentials (e.g. `kubectl proxy`).
    /// Unset: the kubeconfig or in-cluster service account is used.
    pub api_url: Option<String>,
    #[serde(with = "serde_str")]
    pub request_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Alertmanager base URL. Without it, no alerts are ever observed.
    pub alertmanager_url: Option<String>,
    #[serde(with = "serde_str")]
    pub poll_interval: Duration,
    #[serde(with = "serde_str")]
    pub request_timeout: Duration,
    /// Consecutive failed polls tolerated before the window fails closed.
    pub max_source_failures: u32,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            alertmanager_url: None,
            poll_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            max_source_failures: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Timeout applied to each individual check.
    #[serde(with = "serde_str")]
    pub check_timeout: Duration,
    /// Verdicts to attempt before declaring readiness failure.
    pub attempts: u32,
    /// Pause between verdict attempts.
    #[serde(with = "serde_str")]
    pub interval: Duration,
    /// Run checks in parallel instead of short-circuiting sequentially.
    pub concurrent: bool,
    pub checks: Vec<CheckSpec>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            check_timeout: Duration::from_secs(5),
            attempts: 5,
            interval: Duration::from_secs(10),
            concurrent: false,
            checks: vec![
                CheckSpec::http("liveness", "/health"),
                CheckSpec::http("readiness", "/ready"),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    #[serde(with = "serde_str")]
    pub cool_down: Duration,
    /// How often the new active color is probed during the window.
    #[serde(with = "serde_str")]
    pub health_interval: Duration,
    /// Check used for post-switch probing; defaults to the first gate check.
    pub health_check: Option<String>,
    /// Consecutive failed probes that trigger a rollback.
    pub max_health_failures: u32,
    /// Revert attempts before escalating as irrecoverable.
    pub revert_attempts: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            cool_down: Duration::from_secs(60),
            health_interval: Duration::from_secs(5),
            health_check: None,
            max_health_failures: 3,
            revert_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts for a transient failure (first try included).
    pub max_attempts: u32,
    #[serde(with = "serde_str")]
    pub base_delay: Duration,
    #[serde(with = "serde_str")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// How long `deploy` waits for ready replicas.
    #[serde(with = "serde_str")]
    pub timeout: Duration,
    #[serde(with = "serde_str")]
    pub poll_interval: Duration,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".cutover/audit.redb"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentsConfig {
    pub blue: Option<EnvironmentConfig>,
    pub green: Option<EnvironmentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Base URL the health checks hit (usually the color's own Service).
    pub endpoint: String,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub image: Option<String>,
}

fn default_replicas() -> u32 {
    1
}

impl CutoverConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: CutoverConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configs that would make the controller misbehave at runtime.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.service.namespace.is_empty() || self.service.name.is_empty() {
            return Err(ConfigError::Invalid(
                "service.namespace and service.name are required".to_string(),
            ));
        }
        if self.gate.checks.is_empty() {
            return Err(ConfigError::Invalid("gate.checks must not be empty".to_string()));
        }
        if self.gate.attempts == 0 {
            return Err(ConfigError::Invalid("gate.attempts must be at least 1".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for check in &self.gate.checks {
            if !seen.insert(check.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate gate check id {:?}",
                    check.id
                )));
            }
        }
        if let Some(id) = &self.supervisor.health_check {
            if !seen.contains(id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "supervisor.health_check {id:?} is not a gate check"
                )));
            }
        }
        if self.supervisor.max_health_failures == 0 {
            return Err(ConfigError::Invalid(
                "supervisor.max_health_failures must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn service_ref(&self) -> ServiceRef {
        ServiceRef::new(&self.service.namespace, &self.service.name)
    }

    /// Deployment name for a color.
    pub fn deployment_name(&self, color: Color) -> String {
        let prefix = self
            .service
            .deployment_prefix
            .as_deref()
            .unwrap_or(&self.service.name);
        format!("{prefix}-{color}")
    }

    fn environment_section(&self, color: Color) -> ConfigResult<&EnvironmentConfig> {
        let section = match color {
            Color::Blue => self.environments.blue.as_ref(),
            Color::Green => self.environments.green.as_ref(),
        };
        section.ok_or(ConfigError::MissingEnvironment(color))
    }

    /// Resolve the environment for a color, applying CLI overrides.
    pub fn environment(
        &self,
        color: Color,
        image: Option<&str>,
        replicas: Option<u32>,
    ) -> ConfigResult<Environment> {
        let section = self.environment_section(color)?;
        let image = image
            .map(str::to_string)
            .or_else(|| section.image.clone())
            .ok_or_else(|| {
                ConfigError::Invalid(format!("no image configured or given for {color}"))
            })?;

        Ok(Environment {
            name: self.deployment_name(color),
            color,
            endpoint: section.endpoint.trim_end_matches('/').to_string(),
            replicas: replicas.unwrap_or(section.replicas),
            image,
        })
    }

    /// Resolve the environment `promote` gates and switches to. Promotion
    /// never applies a Deployment, so an unpinned image resolves to an
    /// empty string instead of an error.
    pub fn promote_environment(&self, color: Color) -> ConfigResult<Environment> {
        let section = self.environment_section(color)?;
        Ok(Environment {
            name: self.deployment_name(color),
            color,
            endpoint: section.endpoint.trim_end_matches('/').to_string(),
            replicas: section.replicas,
            image: section.image.clone().unwrap_or_default(),
        })
    }

    /// Check used to probe the active color during the cool-down window.
    pub fn supervisor_check(&self) -> &CheckSpec {
        self.supervisor
            .health_check
            .as_deref()
            .and_then(|id| self.gate.checks.iter().find(|c| c.id == id))
            .unwrap_or(&self.gate.checks[0])
    }
}
