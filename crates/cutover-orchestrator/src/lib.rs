//! cutover-orchestrator: the seam between the controller and the cluster.
//!
//! The controller never caches which color is live. It asks the
//! [`Orchestrator`] for the Service selector every time, and changes it
//! with exactly one conditional patch.
//!
//! # Implementations
//!
//! - **`KubeClient`**: the Kubernetes API through `kube::Client`. Selector
//!   changes are JSON-Patch documents with a `test` op, so the API server
//!   itself rejects racing switches. Deployments are written with
//!   server-side apply.
//! - **`MemoryOrchestrator`**: in-process cluster model with fault
//!   injection, used by tests and rehearsal runs.

pub mod error;
pub mod kube;
pub mod memory;

use std::future::Future;
use std::pin::Pin;

use cutover_core::{Color, Environment, ServiceRef};

pub use error::{OrchestratorError, OrchestratorResult};
pub use kube::KubeClient;
pub use memory::{MemoryOrchestrator, PatchFault};

/// Boxed future alias for orchestrator calls.
pub type OrchestratorFuture<'a, T> =
    Pin<Box<dyn Future<Output = OrchestratorResult<T>> + Send + 'a>>;

/// Observed state of a Deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentStatus {
    pub name: String,
    /// Desired replicas.
    pub replicas: u32,
    pub ready_replicas: u32,
    pub updated_replicas: u32,
    pub image: Option<String>,
    /// `metadata.generation`: bumped on every spec change.
    pub generation: u64,
    /// `status.observedGeneration`: the generation the counts describe.
    pub observed_generation: u64,
}

impl DeploymentStatus {
    /// The latest spec has been observed and every desired replica is
    /// updated and ready. Counts from an older generation never qualify.
    pub fn is_ready(&self) -> bool {
        self.observed_generation >= self.generation
            && self.ready_replicas >= self.replicas
            && self.updated_replicas >= self.replicas
    }
}

/// Operations the controller needs from the orchestration API.
pub trait Orchestrator: Send + Sync {
    /// Read the color the Service currently routes to. `None` if the
    /// selector has no `selector_key` entry.
    fn active_color<'a>(
        &'a self,
        service: &'a ServiceRef,
        selector_key: &'a str,
    ) -> OrchestratorFuture<'a, Option<Color>>;

    /// Atomically replace the selector value `expected` with `target` in a
    /// single API call. Fails with `PreconditionFailed` if the selector no
    /// longer holds `expected`.
    fn patch_selector<'a>(
        &'a self,
        service: &'a ServiceRef,
        selector_key: &'a str,
        expected: Color,
        target: Color,
    ) -> OrchestratorFuture<'a, ()>;

    /// Create or update the Deployment backing `environment`.
    fn apply_deployment<'a>(
        &'a self,
        service: &'a ServiceRef,
        selector_key: &'a str,
        environment: &'a Environment,
    ) -> OrchestratorFuture<'a, ()>;

    /// Set the replica count of a Deployment.
    fn scale_deployment<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        replicas: u32,
    ) -> OrchestratorFuture<'a, ()>;

    /// Read a Deployment's rollout progress.
    fn deployment_status<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> OrchestratorFuture<'a, DeploymentStatus>;
}
