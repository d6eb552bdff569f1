//! Kubernetes API client.
//!
//! Built on `kube::Client`. With an explicit `api_url` it talks to an
//! endpoint that handles authentication on its behalf (`kubectl proxy`);
//! otherwise the kubeconfig or in-cluster service account is used. Every
//! call runs under the configured request timeout.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Config};
use serde_json::{Value, json};
use tracing::{debug, info};

use cutover_core::{Color, Environment, ServiceRef};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::{DeploymentStatus, Orchestrator, OrchestratorFuture};

const FIELD_MANAGER: &str = "cutover";

/// Orchestrator backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    timeout: Duration,
}

impl KubeClient {
    /// Build a client for `api_url`, or infer one from the environment
    /// when no URL is configured.
    pub async fn connect(api_url: Option<&str>, timeout: Duration) -> OrchestratorResult<Self> {
        let mut config = match api_url {
            Some(url) => {
                let uri = url.parse::<http::Uri>().map_err(|e| {
                    OrchestratorError::Setup(format!("invalid api_url {url:?}: {e}"))
                })?;
                Config::new(uri)
            }
            None => Config::infer()
                .await
                .map_err(|e| OrchestratorError::Setup(e.to_string()))?,
        };
        config.connect_timeout = Some(timeout);
        config.read_timeout = Some(timeout);
        debug!(cluster_url = %config.cluster_url, "kubernetes client configured");

        let client =
            Client::try_from(config).map_err(|e| OrchestratorError::Setup(e.to_string()))?;
        Ok(Self::from_client(client, timeout))
    }

    pub fn from_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Run one API call under the request timeout.
    async fn call<T>(
        &self,
        kind: &'static str,
        name: &str,
        request: impl Future<Output = kube::Result<T>>,
    ) -> OrchestratorResult<T> {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result.map_err(|e| api_error(e, kind, name)),
            Err(_) => Err(OrchestratorError::Timeout(self.timeout)),
        }
    }
}

impl Orchestrator for KubeClient {
    fn active_color<'a>(
        &'a self,
        service: &'a ServiceRef,
        selector_key: &'a str,
    ) -> OrchestratorFuture<'a, Option<Color>> {
        Box::pin(async move {
            let api = self.services(&service.namespace);
            let svc = self
                .call("service", &service.key(), api.get(&service.name))
                .await?;
            let value = svc
                .spec
                .and_then(|spec| spec.selector)
                .and_then(|mut selector| selector.remove(selector_key));
            match value {
                None => Ok(None),
                Some(raw) => raw
                    .parse::<Color>()
                    .map(Some)
                    .map_err(|_| OrchestratorError::UnknownSelector {
                        key: selector_key.to_string(),
                        value: raw,
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
            let document = selector_patch(selector_key, expected, target);
            debug!(service = %service, patch = %document, "patching service selector");
            let patch = Patch::Json::<()>(
                serde_json::from_value(document)
                    .map_err(|e| OrchestratorError::Decode(format!("selector patch: {e}")))?,
            );

            let api = self.services(&service.namespace);
            let result = self
                .call(
                    "service",
                    &service.key(),
                    api.patch(&service.name, &PatchParams::default(), &patch),
                )
                .await;

            match result {
                Ok(_) => {
                    info!(service = %service, from = %expected, to = %target, "service selector patched");
                    Ok(())
                }
                // A failed `test` op comes back as 422; a lost write race as 409.
                Err(OrchestratorError::Api {
                    status: 422,
                    message,
                })
                | Err(OrchestratorError::PreconditionFailed(message)) => {
                    Err(OrchestratorError::PreconditionFailed(format!(
                        "selector {selector_key:?} is no longer {expected}: {message}"
                    )))
                }
                Err(e) => Err(e),
            }
        })
    }

    fn apply_deployment<'a>(
        &'a self,
        service: &'a ServiceRef,
        selector_key: &'a str,
        environment: &'a Environment,
    ) -> OrchestratorFuture<'a, ()> {
        Box::pin(async move {
            let manifest = deployment_manifest(service, selector_key, environment);
            let params = PatchParams::apply(FIELD_MANAGER).force();
            let api = self.deployments(&service.namespace);
            self.call(
                "deployment",
                &environment.name,
                api.patch(&environment.name, &params, &Patch::Apply(&manifest)),
            )
            .await?;
            info!(
                deployment = %environment.name,
                image = %environment.image,
                replicas = environment.replicas,
                "deployment applied"
            );
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
            let api = self.deployments(namespace);
            let patch = Patch::Merge(json!({ "spec": { "replicas": replicas } }));
            self.call(
                "deployment",
                name,
                api.patch_scale(name, &PatchParams::default(), &patch),
            )
            .await?;
            info!(%namespace, deployment = %name, replicas, "deployment scaled");
            Ok(())
        })
    }

    fn deployment_status<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> OrchestratorFuture<'a, DeploymentStatus> {
        Box::pin(async move {
            let api = self.deployments(namespace);
            let deployment = self.call("deployment", name, api.get(name)).await?;
            parse_deployment_status(name, &deployment)
        })
    }
}

/// JSON-Patch that swaps the selector value only if it still holds `expected`.
pub fn selector_patch(selector_key: &str, expected: Color, target: Color) -> Value {
    let path = format!("/spec/selector/{}", escape_pointer(selector_key));
    json!([
        { "op": "test", "path": path, "value": expected.as_str() },
        { "op": "replace", "path": path, "value": target.as_str() },
    ])
}

/// Partial Deployment owned by cutover: image, replicas, color labels.
fn deployment_manifest(service: &ServiceRef, selector_key: &str, env: &Environment) -> Deployment {
    let labels = BTreeMap::from([
        ("app".to_string(), service.name.clone()),
        (selector_key.to_string(), env.color.as_str().to_string()),
    ]);

    Deployment {
        metadata: ObjectMeta {
            name: Some(env.name.clone()),
            namespace: Some(service.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(i32::try_from(env.replicas).unwrap_or(i32::MAX)),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: service.name.clone(),
                        image: Some(env.image.clone()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn parse_deployment_status(name: &str, deployment: &Deployment) -> OrchestratorResult<DeploymentStatus> {
    let spec = deployment
        .spec
        .as_ref()
        .ok_or_else(|| OrchestratorError::Decode(format!("deployment {name} has no spec")))?;
    let status = deployment.status.as_ref();
    let count = |n: Option<i32>| n.unwrap_or(0).max(0) as u32;

    Ok(DeploymentStatus {
        name: name.to_string(),
        replicas: spec.replicas.unwrap_or(1).max(0) as u32,
        ready_replicas: count(status.and_then(|s| s.ready_replicas)),
        updated_replicas: count(status.and_then(|s| s.updated_replicas)),
        image: spec
            .template
            .spec
            .as_ref()
            .and_then(|pod| pod.containers.first())
            .and_then(|c| c.image.clone()),
        generation: deployment.metadata.generation.unwrap_or(0).max(0) as u64,
        observed_generation: status
            .and_then(|s| s.observed_generation)
            .unwrap_or(0)
            .max(0) as u64,
    })
}

/// Map a kube error onto the orchestrator's vocabulary.
fn api_error(err: kube::Error, kind: &'static str, name: &str) -> OrchestratorError {
    match err {
        kube::Error::Api(response) => match response.code {
            404 => OrchestratorError::NotFound {
                kind,
                name: name.to_string(),
            },
            409 => OrchestratorError::PreconditionFailed(response.message.clone()),
            status => OrchestratorError::Api {
                status,
                message: response.message.clone(),
            },
        },
        kube::Error::SerdeError(e) => OrchestratorError::Decode(format!("{kind} {name}: {e}")),
        other => OrchestratorError::Transport(other.to_string()),
    }
}

/// RFC 6901 escaping for a single pointer segment.
fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}
