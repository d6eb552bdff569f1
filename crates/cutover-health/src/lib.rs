//! cutover-health: readiness gating for a candidate color.
//!
//! Runs the configured checks (HTTP liveness, HTTP readiness, smoke
//! suites) against an environment and turns the results into an immutable
//! [`HealthVerdict`](cutover_core::HealthVerdict). After the traffic
//! switch, [`HealthWatch`] keeps probing the new active color and reports
//! consecutive failures to the rollback supervisor.
//!
//! # Architecture
//!
//! ```text
//! HealthGate
//!   ├── check_readiness()            sequential, first failure short-circuits
//!   └── check_readiness_concurrent() fan-out, joined before the verdict
//!         └── Probe (trait) ── HttpProbe ── http::send (hyper http1)
//!
//! HealthWatch
//!   ├── background task, one probe per interval
//!   ├── HealthTracker (consecutive failures vs threshold)
//!   └── mpsc<HealthReport> → supervisor
//! ```
//!
//! Every probe fails closed: connection errors, timeouts and unexpected
//! status codes all count as failures.

pub mod checker;
pub mod gate;
pub mod http;
pub mod probe;
pub mod watch;

pub use checker::{HealthStatus, HealthTracker, ProbeResult};
pub use gate::HealthGate;
pub use probe::{HttpProbe, Probe, ProbeFuture};
pub use watch::{HealthReport, HealthWatch, WatchSettings};
