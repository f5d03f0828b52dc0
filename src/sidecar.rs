//! Sidecar descriptor and injection logic
//!
//! Everything here is pure: functions inspect or mutate a `Deployment` value
//! and never talk to the API server. The reconciler composes them.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec};

/// Label key that opts a Deployment into sidecar injection
pub const SIDECAR_LABEL: &str = "node-sidecar";

/// The only label value that enables injection
pub const SIDECAR_ENABLED_VALUE: &str = "true";

/// Name of the injected container
pub const SIDECAR_CONTAINER_NAME: &str = "node-sidecar";

/// Image run by the injected container
pub const SIDECAR_IMAGE: &str = "aminmithil/node-demo:latest";

/// Port exposed by the injected container
pub const SIDECAR_PORT: i32 = 8081;

/// Label holding the number of pods matching the Deployment's template
pub const POD_COUNT_LABEL: &str = "pod-count";

/// Build the sidecar container descriptor
pub fn sidecar_container() -> Container {
    Container {
        name: SIDECAR_CONTAINER_NAME.to_string(),
        image: Some(SIDECAR_IMAGE.to_string()),
        ports: Some(vec![ContainerPort {
            container_port: SIDECAR_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Whether the Deployment carries `node-sidecar=true`
pub fn sidecar_requested(deployment: &Deployment) -> bool {
    deployment
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(SIDECAR_LABEL))
        .is_some_and(|value| value == SIDECAR_ENABLED_VALUE)
}

/// Whether the pod template already has a container named `node-sidecar`
pub fn has_sidecar(deployment: &Deployment) -> bool {
    pod_spec(deployment)
        .map(|spec| {
            spec.containers
                .iter()
                .any(|c| c.name == SIDECAR_CONTAINER_NAME)
        })
        .unwrap_or(false)
}

/// Append the sidecar if it is requested and not already present
///
/// Returns true when the container list was changed.
pub fn inject_sidecar(deployment: &mut Deployment) -> bool {
    if !sidecar_requested(deployment) || has_sidecar(deployment) {
        return false;
    }

    let pod_spec = deployment
        .spec
        .get_or_insert_with(Default::default)
        .template
        .spec
        .get_or_insert_with(PodSpec::default);
    pod_spec.containers.push(sidecar_container());
    true
}

/// Render the pod template labels as an equality selector
///
/// Returns `None` when the template has no labels, meaning "every pod in
/// the namespace".
pub fn template_selector(deployment: &Deployment) -> Option<String> {
    let labels = deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.metadata.as_ref())
        .and_then(|m| m.labels.as_ref())
        .filter(|l| !l.is_empty())?;

    Some(
        labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Stamp the `pod-count` label onto the Deployment
pub fn set_pod_count(deployment: &mut Deployment, count: usize) {
    deployment
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(POD_COUNT_LABEL.to_string(), count.to_string());
}

fn pod_spec(deployment: &Deployment) -> Option<&PodSpec> {
    deployment.spec.as_ref()?.template.spec.as_ref()
}
