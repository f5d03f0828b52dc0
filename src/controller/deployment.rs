//! Deployment controller implementation
//!
//! Each reconcile pass fetches the Deployment by name, counts the pods
//! matching its template, appends the sidecar when `node-sidecar=true` asks
//! for it, stamps `pod-count`, and writes the object back. API errors are
//! returned unchanged; the runtime decides when to retry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument};

#[cfg(test)]
use mockall::automock;

use crate::metrics::Metrics;
use crate::sidecar::{inject_sidecar, set_pod_count, template_selector, SIDECAR_CONTAINER_NAME};
use crate::{Error, FIELD_MANAGER};

/// Delay before a failed reconcile is retried
pub const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Trait abstracting the object-store operations the reconciler needs
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DeploymentClient: Send + Sync {
    /// Fetch the current state of a Deployment
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, Error>;

    /// Count pods in `namespace` matching an equality label selector
    ///
    /// `None` counts every pod in the namespace.
    async fn count_pods(&self, namespace: &str, selector: Option<String>) -> Result<usize, Error>;

    /// Replace a Deployment with the given object
    ///
    /// The object's resourceVersion is sent along, so a write based on a
    /// stale read is rejected by the API server with 409 Conflict.
    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, Error>;
}

/// Real Kubernetes client implementation
pub struct KubeDeploymentClient {
    client: Client,
}

impl KubeDeploymentClient {
    /// Create a new KubeDeploymentClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeploymentClient for KubeDeploymentClient {
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn count_pods(&self, namespace: &str, selector: Option<String>) -> Result<usize, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = match selector {
            Some(ref s) => ListParams::default().labels(s),
            None => ListParams::default(),
        };
        let pods = api.list_metadata(&params).await?;
        Ok(pods.items.len())
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, Error> {
        let namespace = deployment
            .metadata
            .namespace
            .as_deref()
            .ok_or(Error::MissingObjectKey("namespace"))?;
        let name = deployment
            .metadata
            .name
            .as_deref()
            .ok_or(Error::MissingObjectKey("name"))?;

        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        Ok(api.replace(name, &params, deployment).await?)
    }
}

/// Shared controller context
pub struct Context {
    /// Object-store client used by the reconciler
    pub client: Arc<dyn DeploymentClient>,
    /// Reconcile metrics
    pub metrics: Arc<Metrics>,
}

impl Context {
    /// Create a context backed by the real Kubernetes API
    pub fn new(client: Client, metrics: Arc<Metrics>) -> Self {
        Self::with_client(Arc::new(KubeDeploymentClient::new(client)), metrics)
    }

    /// Create a context with a custom object-store client
    pub fn with_client(client: Arc<dyn DeploymentClient>, metrics: Arc<Metrics>) -> Self {
        Self { client, metrics }
    }
}

/// Reconcile a Deployment
///
/// The triggering object only supplies the namespace and name; the decision
/// is made on a fresh read so the write carries the latest resourceVersion.
///
/// # Returns
///
/// `Action::await_change()` on success. Every error from the API is
/// propagated as-is.
#[instrument(
    skip(deployment, ctx),
    fields(deployment = %deployment.name_any(), namespace = ?deployment.namespace())
)]
pub async fn reconcile(deployment: Arc<Deployment>, ctx: Arc<Context>) -> Result<Action, Error> {
    let _timer = ctx.metrics.start_reconcile();

    let namespace = deployment
        .metadata
        .namespace
        .as_deref()
        .ok_or(Error::MissingObjectKey("namespace"))?;
    let name = deployment
        .metadata
        .name
        .as_deref()
        .ok_or(Error::MissingObjectKey("name"))?;

    debug!("reconciling deployment");

    let mut current = ctx.client.get_deployment(namespace, name).await?;

    let selector = template_selector(&current);
    let pod_count = ctx.client.count_pods(namespace, selector.clone()).await?;
    debug!(selector = ?selector, pod_count, "counted template pods");

    let injected = inject_sidecar(&mut current);
    if injected {
        info!(container = SIDECAR_CONTAINER_NAME, "adding sidecar to pod template");
    }
    set_pod_count(&mut current, pod_count);

    ctx.client.replace_deployment(&current).await?;

    if injected {
        ctx.metrics.record_injection();
    }
    debug!(injected, pod_count, "deployment written back");

    Ok(Action::await_change())
}

/// Error policy for the Deployment controller
///
/// Logs the failure and requeues after a fixed delay.
pub fn error_policy(deployment: Arc<Deployment>, error: &Error, ctx: Arc<Context>) -> Action {
    ctx.metrics.record_error();
    error!(
        ?error,
        deployment = %deployment.name_any(),
        namespace = ?deployment.namespace(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    Action::requeue(ERROR_REQUEUE)
}
