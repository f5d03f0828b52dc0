//! Controller runner - builds the Deployment controller future
//!
//! Pods are watched as secondary objects so the `pod-count` label follows
//! scale-ups and restarts. Each Pod is mapped back to its Deployment through
//! the owning ReplicaSet.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use crate::controller::{error_policy, reconcile, Context};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Label the Deployment controller stamps on every ReplicaSet and Pod it creates
const POD_TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

/// Build the Deployment controller future
///
/// Runs until SIGINT or SIGTERM is received.
pub fn build_controller(client: Client, ctx: Arc<Context>) -> impl Future<Output = ()> + Send {
    let deployments: Api<Deployment> = Api::all(client.clone());
    let pods: Api<Pod> = Api::all(client);

    tracing::info!("- Deployment controller");

    Controller::new(
        deployments,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .watches(
        pods,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
        |pod| deployment_for_pod(&pod),
    )
    .shutdown_on_signal()
    .run(reconcile, error_policy, ctx)
    .for_each(log_reconcile_result("Deployment"))
}

/// Map a Pod to the Deployment that manages it
///
/// Follows the controlling owner reference. A ReplicaSet owner is resolved
/// to its Deployment by stripping the `-<pod-template-hash>` suffix from the
/// ReplicaSet name. Pods without a namespace or a controller map to nothing.
pub fn deployment_for_pod(pod: &Pod) -> Option<ObjectRef<Deployment>> {
    let namespace = pod.metadata.namespace.as_deref()?;
    let owner = pod
        .metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|o| o.controller == Some(true))?;

    let name = match owner.kind.as_str() {
        "Deployment" => owner.name.as_str(),
        "ReplicaSet" => {
            let hash = pod
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(POD_TEMPLATE_HASH_LABEL));
            match hash {
                Some(hash) => owner.name.strip_suffix(hash)?.strip_suffix('-')?,
                None => owner.name.rsplit_once('-')?.0,
            }
        }
        _ => return None,
    };

    if name.is_empty() {
        return None;
    }
    Some(ObjectRef::new(name).within(namespace))
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
