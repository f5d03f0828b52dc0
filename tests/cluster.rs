//! End-to-end tests against a real Kubernetes cluster
//!
//! These tests require a reachable cluster (kind works) and the current
//! kubeconfig context pointing at it. They are ignored by default and can be
//! run with:
//!
//! ```bash
//! cargo test --test cluster -- --ignored
//! ```
//!
//! Each test creates its own Deployment in the `default` namespace and
//! deletes it afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;

use node_sidecar_controller::controller::{reconcile, Context};
use node_sidecar_controller::metrics::Metrics;
use node_sidecar_controller::sidecar::{POD_COUNT_LABEL, SIDECAR_CONTAINER_NAME, SIDECAR_LABEL};

const NAMESPACE: &str = "default";

fn test_deployment(name: &str, opted_in: bool) -> Deployment {
    let selector = BTreeMap::from([("app".to_string(), name.to_string())]);
    let mut labels = BTreeMap::new();
    if opted_in {
        labels.insert(SIDECAR_LABEL.to_string(), "true".to_string());
    }

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(0),
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "app".to_string(),
                        image: Some("registry.k8s.io/pause:3.10".to_string()),
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

async fn setup(name: &str, opted_in: bool) -> (Api<Deployment>, Arc<Context>, Deployment) {
    let client = Client::try_default()
        .await
        .expect("kubeconfig should point at a test cluster");
    let api: Api<Deployment> = Api::namespaced(client.clone(), NAMESPACE);

    let _ = api.delete(name, &DeleteParams::default()).await;
    let created = api
        .create(&PostParams::default(), &test_deployment(name, opted_in))
        .await
        .expect("create test deployment");

    let metrics = Arc::new(Metrics::new().unwrap());
    (api, Arc::new(Context::new(client, metrics)), created)
}

/// Story: an opted-in Deployment on a live API server gets the sidecar once
#[tokio::test]
#[ignore]
async fn live_deployment_gets_sidecar_once() {
    let name = "node-sidecar-e2e-opted-in";
    let (api, ctx, created) = setup(name, true).await;

    reconcile(Arc::new(created), ctx.clone())
        .await
        .expect("first reconcile");
    let after_first = api.get(name).await.unwrap();
    reconcile(Arc::new(after_first), ctx.clone())
        .await
        .expect("second reconcile");

    let stored = api.get(name).await.unwrap();
    let containers = stored.spec.unwrap().template.spec.unwrap().containers;
    let sidecars = containers
        .iter()
        .filter(|c| c.name == SIDECAR_CONTAINER_NAME)
        .count();
    assert_eq!(sidecars, 1);
    assert_eq!(
        stored
            .metadata
            .labels
            .unwrap()
            .get(POD_COUNT_LABEL)
            .map(String::as_str),
        Some("0")
    );

    api.delete(name, &DeleteParams::default()).await.unwrap();
}

/// Story: a Deployment without the label is left with one container
#[tokio::test]
#[ignore]
async fn live_deployment_without_label_is_untouched() {
    let name = "node-sidecar-e2e-opted-out";
    let (api, ctx, created) = setup(name, false).await;

    reconcile(Arc::new(created), ctx).await.expect("reconcile");

    let stored = api.get(name).await.unwrap();
    let containers = stored.spec.unwrap().template.spec.unwrap().containers;
    assert_eq!(containers.len(), 1);

    api.delete(name, &DeleteParams::default()).await.unwrap();
}
