//! cutover-rollout: blue-green promotion for a single service.
//!
//! # Architecture
//!
//! ```text
//! RolloutController
//!   ├── deploy()              → apply Deployment, wait for ready replicas
//!   ├── promote_or_rollback() → ServiceLocks::try_acquire
//!   │                             → HealthGate (attempts × verdicts)
//!   │                             → TrafficSwitch (one conditional patch)
//!   │                             → RollbackSupervisor (cool-down window)
//!   │                             → scale old color to zero | revert
//!   ├── switch_to()           → manual switch, no gate
//!   └── status()              → live selector + audit history
//! ```
//!
//! Errors are a single [`RolloutError`] taxonomy; each variant maps to the
//! exit code the CI pipeline sees.

pub mod controller;
pub mod error;
pub mod lock;
pub mod retry;
pub mod supervisor;
pub mod switch;

pub use controller::{PromoteReport, RolloutController, StatusReport};
pub use error::{RolloutError, RolloutResult};
pub use lock::{ServiceLockGuard, ServiceLocks};
pub use retry::{Backoff, RetryError, Retryable};
pub use supervisor::{
    RollbackSupervisor, SupervisionOutcome, SupervisorSettings, SupervisorState, Trigger,
};
pub use switch::{SwitchOutcome, TrafficSwitch};
