//! Domain types shared by the gate, the switch, and the supervisor.
//!
//! Everything here is serializable to JSON so the audit store can persist
//! it verbatim.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── Colors ────────────────────────────────────────────────────────

/// One of the two parallel environments behind a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Blue,
    Green,
}

impl Color {
    /// The color that is not `self`.
    pub fn other(self) -> Color {
        match self {
            Color::Blue => Color::Green,
            Color::Green => Color::Blue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Color::Blue => "blue",
            Color::Green => "green",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a selector value is not a known color.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownColor(pub String);

impl fmt::Display for UnknownColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown color {:?} (expected blue or green)", self.0)
    }
}

impl std::error::Error for UnknownColor {}

impl FromStr for Color {
    type Err = UnknownColor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blue" => Ok(Color::Blue),
            "green" => Ok(Color::Green),
            _ => Err(UnknownColor(s.to_string())),
        }
    }
}

// ── Service / environment ─────────────────────────────────────────

/// Identity of the stable Service whose selector picks the active color.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceRef {
    pub namespace: String,
    pub name: String,
}

impl ServiceRef {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Composite key used by the lock registry and the audit store.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A deployed (or about to be deployed) color of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Deployment name, e.g. `ai-agent-green`.
    pub name: String,
    pub color: Color,
    /// Base URL health checks are issued against (`http://host:port`).
    pub endpoint: String,
    pub replicas: u32,
    /// Container image pull reference.
    pub image: String,
}

// ── Health checks ─────────────────────────────────────────────────

/// One required readiness check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSpec {
    /// Stable identifier reported in verdicts (e.g. "readiness").
    pub id: String,
    #[serde(flatten)]
    pub kind: CheckKind,
}

/// What a check actually does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckKind {
    /// Single GET; passes on 2xx (or on `expect_status` when set).
    Http {
        path: String,
        #[serde(default)]
        expect_status: Option<u16>,
    },
    /// Ordered request suite; every step must pass.
    Smoke { steps: Vec<SmokeStep> },
}

/// One request of a smoke-test suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmokeStep {
    pub name: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub expect_status: Option<u16>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl CheckSpec {
    pub fn http(id: &str, path: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: CheckKind::Http {
                path: path.to_string(),
                expect_status: None,
            },
        }
    }

    pub fn smoke(id: &str, steps: Vec<SmokeStep>) -> Self {
        Self {
            id: id.to_string(),
            kind: CheckKind::Smoke { steps },
        }
    }
}

/// Why a single check failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckFailure {
    pub check: String,
    pub reason: String,
}

/// Outcome of one HealthGate poll cycle. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthVerdict {
    pub environment: String,
    pub color: Color,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    pub passed: bool,
    /// Failed checks, in the order they were requested.
    pub failed_checks: Vec<CheckFailure>,
}

impl HealthVerdict {
    /// Build a verdict; `passed` is derived so it can never disagree with
    /// the failure list.
    pub fn new(environment: &Environment, failed_checks: Vec<CheckFailure>) -> Self {
        Self {
            environment: environment.name.clone(),
            color: environment.color,
            timestamp: epoch_secs(),
            passed: failed_checks.is_empty(),
            failed_checks,
        }
    }

    pub fn failed_check_ids(&self) -> Vec<&str> {
        self.failed_checks.iter().map(|f| f.check.as_str()).collect()
    }
}

// ── Switch audit ──────────────────────────────────────────────────

/// Append-only audit entry for one applied selector change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchRecord {
    pub service: String,
    pub from: Color,
    pub to: Color,
    /// Unix timestamp (milliseconds) the selector change was applied.
    pub timestamp_ms: u64,
    pub initiated_by: String,
}

// ── Alerts ────────────────────────────────────────────────────────

/// Alert severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
    Page,
}

impl Severity {
    /// Whether this severity disarms a cool-down window.
    pub fn is_critical(self) -> bool {
        self >= Severity::Critical
    }

    /// Lenient parse of the `severity` label. Unknown values rank as info.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "page" | "pager" | "emergency" => Severity::Page,
            "critical" | "crit" | "error" => Severity::Critical,
            "warning" | "warn" => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
            Severity::Page => "page",
        };
        f.write_str(s)
    }
}

/// A firing alert as reported by the metrics backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSignal {
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub severity: Severity,
    /// Unix timestamp (milliseconds) the alert started firing.
    pub fired_at_ms: u64,
}

// ── Rollout history ───────────────────────────────────────────────

/// Terminal outcome of one promote invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutOutcome {
    /// Cool-down elapsed cleanly; previous color scaled down.
    Stable,
    /// Candidate was already the active color; nothing to do.
    AlreadyActive,
    /// Supervisor reverted the switch.
    Reverted,
    /// HealthGate never passed; the switch was not attempted.
    ReadinessFailed,
    /// Operator abort before the switch.
    Aborted,
    /// Any other terminal error.
    Failed,
}

impl fmt::Display for RolloutOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RolloutOutcome::Stable => "stable",
            RolloutOutcome::AlreadyActive => "already_active",
            RolloutOutcome::Reverted => "reverted",
            RolloutOutcome::ReadinessFailed => "readiness_failed",
            RolloutOutcome::Aborted => "aborted",
            RolloutOutcome::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Persisted summary of one promote invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutRecord {
    pub service: String,
    pub environment: String,
    pub from: Color,
    pub to: Color,
    pub outcome: RolloutOutcome,
    pub started_at: u64,
    pub finished_at: u64,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Current unix time in milliseconds.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
