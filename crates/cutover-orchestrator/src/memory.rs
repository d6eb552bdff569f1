//! In-process orchestrator.
//!
//! Models Services (selector maps) and Deployments in memory with the same
//! conditional-patch semantics as the real API. Faults can be queued to
//! exercise the controller's error paths.
//!
//! Deployments carry a generation like the real thing: an apply bumps
//! `generation`, and the status keeps describing the previous rollout
//! until a later read "observes" the new generation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use cutover_core::{Color, Environment, ServiceRef};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::{DeploymentStatus, Orchestrator, OrchestratorFuture};

/// A queued failure for the next selector patch.
#[derive(Debug, Clone)]
pub enum PatchFault {
    /// Fail without applying the patch.
    Reject(OrchestratorError),
    /// Apply the patch, then report the error as if the response was lost.
    LostResponse(OrchestratorError),
}

#[derive(Default)]
struct Cluster {
    /// service key → selector labels.
    services: HashMap<String, BTreeMap<String, String>>,
    /// `{namespace}/{name}` → deployment.
    deployments: HashMap<String, DeploymentStatus>,
    patch_faults: VecDeque<PatchFault>,
    /// `None` entries let a read through.
    read_faults: VecDeque<Option<OrchestratorError>>,
    scale_faults: VecDeque<OrchestratorError>,
}

/// Orchestrator whose whole cluster lives in a mutex.
#[derive(Default)]
pub struct MemoryOrchestrator {
    cluster: Mutex<Cluster>,
    patch_calls: AtomicU32,
    stall_rollouts: AtomicBool,
}

impl MemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a Service routing to `color`.
    pub fn with_service(self, service: &ServiceRef, selector_key: &str, color: Color) -> Self {
        {
            let mut cluster = self.lock();
            let mut selector = BTreeMap::new();
            selector.insert("app".to_string(), service.name.clone());
            selector.insert(selector_key.to_string(), color.as_str().to_string());
            cluster.services.insert(service.key(), selector);
        }
        self
    }

    /// Register a Deployment whose first generation is fully rolled out.
    pub fn with_deployment(self, namespace: &str, name: &str, replicas: u32, image: &str) -> Self {
        self.lock().deployments.insert(
            format!("{namespace}/{name}"),
            DeploymentStatus {
                name: name.to_string(),
                replicas,
                ready_replicas: replicas,
                updated_replicas: replicas,
                image: Some(image.to_string()),
                generation: 1,
                observed_generation: 1,
            },
        );
        self
    }

    /// Queue a fault for an upcoming `patch_selector` call.
    pub fn push_patch_fault(&self, fault: PatchFault) {
        self.lock().patch_faults.push_back(fault);
    }

    /// Queue a failure for an upcoming `active_color` call.
    pub fn push_read_fault(&self, error: OrchestratorError) {
        self.lock().read_faults.push_back(Some(error));
    }

    /// Let `passes` reads succeed, then fail the next one.
    pub fn push_read_fault_after(&self, passes: usize, error: OrchestratorError) {
        let mut cluster = self.lock();
        for _ in 0..passes {
            cluster.read_faults.push_back(None);
        }
        cluster.read_faults.push_back(Some(error));
    }

    /// Queue a failure for an upcoming `scale_deployment` call.
    pub fn push_scale_fault(&self, error: OrchestratorError) {
        self.lock().scale_faults.push_back(error);
    }

    /// Change the selector behind the controller's back.
    pub fn set_selector(&self, service: &ServiceRef, selector_key: &str, color: Color) {
        if let Some(selector) = self.lock().services.get_mut(&service.key()) {
            selector.insert(selector_key.to_string(), color.as_str().to_string());
        }
    }

    /// Current selector value, read directly.
    pub fn selector(&self, service: &ServiceRef, selector_key: &str) -> Option<String> {
        self.lock()
            .services
            .get(&service.key())
            .and_then(|s| s.get(selector_key).cloned())
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<DeploymentStatus> {
        self.lock()
            .deployments
            .get(&format!("{namespace}/{name}"))
            .cloned()
    }

    /// When set, new generations are never observed: applied Deployments
    /// keep reporting the previous rollout's status.
    pub fn stall_rollouts(&self, stall: bool) {
        self.stall_rollouts.store(stall, Ordering::SeqCst);
    }

    /// Number of `patch_selector` calls received, failed ones included.
    pub fn patch_calls(&self) -> u32 {
        self.patch_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Cluster> {
        // A poisoned lock only means a test thread panicked mid-update.
        self.cluster.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn apply_patch(
        cluster: &mut Cluster,
        service: &ServiceRef,
        selector_key: &str,
        expected: Color,
        target: Color,
    ) -> OrchestratorResult<()> {
        let selector = cluster
            .services
            .get_mut(&service.key())
            .ok_or_else(|| OrchestratorError::NotFound {
                kind: "service",
                name: service.key(),
            })?;
        match selector.get(selector_key) {
            Some(current) if current == expected.as_str() => {
                selector.insert(selector_key.to_string(), target.as_str().to_string());
                Ok(())
            }
            other => Err(OrchestratorError::PreconditionFailed(format!(
                "selector {selector_key:?} is {other:?}, not {expected}"
            ))),
        }
    }
}

impl Orchestrator for MemoryOrchestrator {
    fn active_color<'a>(
        &'a self,
        service: &'a ServiceRef,
        selector_key: &'a str,
    ) -> OrchestratorFuture<'a, Option<Color>> {
        Box::pin(async move {
            let mut cluster = self.lock();
            if let Some(Some(fault)) = cluster.read_faults.pop_front() {
                return Err(fault);
            }
            let selector =
                cluster
                    .services
                    .get(&service.key())
                    .ok_or_else(|| OrchestratorError::NotFound {
                        kind: "service",
                        name: service.key(),
                    })?;
            match selector.get(selector_key) {
                None => Ok(None),
                Some(raw) => raw.parse::<Color>().map(Some).map_err(|_| {
                    OrchestratorError::UnknownSelector {
                        key: selector_key.to_string(),
                        value: raw.clone(),
                    }
                }),
            }
        })
    }

    fn patch_selector<'a>(
        &'a self,
        service: &'a ServiceRef,
        selector_key: &'a str,
        expected: Color,
        target: Color,
    ) -> OrchestratorFuture<'a, ()> {
        Box::pin(async move {
            self.patch_calls.fetch_add(1, Ordering::SeqCst);
            let mut cluster = self.lock();
            match cluster.patch_faults.pop_front() {
                Some(PatchFault::Reject(e)) => Err(e),
                Some(PatchFault::LostResponse(e)) => {
                    Self::apply_patch(&mut cluster, service, selector_key, expected, target)?;
                    Err(e)
                }
                None => Self::apply_patch(&mut cluster, service, selector_key, expected, target),
            }
        })
    }

    fn apply_deployment<'a>(
        &'a self,
        service: &'a ServiceRef,
        _selector_key: &'a str,
        environment: &'a Environment,
    ) -> OrchestratorFuture<'a, ()> {
        Box::pin(async move {
            let mut cluster = self.lock();
            let deployment = cluster
                .deployments
                .entry(format!("{}/{}", service.namespace, environment.name))
                .or_insert_with(|| DeploymentStatus {
                    name: environment.name.clone(),
                    replicas: 0,
                    ready_replicas: 0,
                    updated_replicas: 0,
                    image: None,
                    generation: 0,
                    observed_generation: 0,
                });
            deployment.generation += 1;
            deployment.replicas = environment.replicas;
            deployment.image = Some(environment.image.clone());
            Ok(())
        })
    }

    fn scale_deployment<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        replicas: u32,
    ) -> OrchestratorFuture<'a, ()> {
        Box::pin(async move {
            let mut cluster = self.lock();
            if let Some(fault) = cluster.scale_faults.pop_front() {
                return Err(fault);
            }
            let deployment = cluster
                .deployments
                .get_mut(&format!("{namespace}/{name}"))
                .ok_or_else(|| OrchestratorError::NotFound {
                    kind: "deployment",
                    name: name.to_string(),
                })?;
            deployment.generation += 1;
            deployment.observed_generation = deployment.generation;
            deployment.replicas = replicas;
            deployment.ready_replicas = replicas;
            deployment.updated_replicas = replicas;
            Ok(())
        })
    }

    fn deployment_status<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> OrchestratorFuture<'a, DeploymentStatus> {
        Box::pin(async move {
            let stalled = self.stall_rollouts.load(Ordering::SeqCst);
            let mut cluster = self.lock();
            let deployment = cluster
                .deployments
                .get_mut(&format!("{namespace}/{name}"))
                .ok_or_else(|| OrchestratorError::NotFound {
                    kind: "deployment",
                    name: name.to_string(),
                })?;
            let snapshot = deployment.clone();
            // The next read sees the pending generation rolled out.
            if !stalled && deployment.observed_generation < deployment.generation {
                deployment.observed_generation = deployment.generation;
                deployment.ready_replicas = deployment.replicas;
                deployment.updated_replicas = deployment.replicas;
            }
            Ok(snapshot)
        })
    }
}
