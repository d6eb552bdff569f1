//! cutover-alerts: alert intake for the rollback supervisor, plus
//! Prometheus exposition of rollout history.
//!
//! # Architecture
//!
//! ```text
//! AlertSource (trait)
//!   ├── AlertmanagerSource → GET /api/v2/alerts?filter=service="…"
//!   ├── MemoryAlertSource  → alerts pushed in-process (tests, rehearsal)
//!   └── NoAlerts           → nothing configured; never fires
//!
//! Prometheus exposition
//!   └── RolloutMetrics::collect(AuditStore) → render_prometheus() → text/plain
//! ```

pub mod alertmanager;
pub mod collector;
pub mod error;
pub mod prometheus;
pub mod source;

pub use alertmanager::AlertmanagerSource;
pub use collector::RolloutMetrics;
pub use error::{AlertError, AlertResult};
pub use prometheus::render_prometheus;
pub use source::{AlertFuture, AlertSource, MemoryAlertSource, NoAlerts};
