//! Controller implementation for sidecar injection
//!
//! This module contains the reconciliation logic for Deployments. The
//! controller follows the observe-diff-act loop: read the current object,
//! decide whether the sidecar is missing, write the result back.

mod deployment;

pub use deployment::{
    error_policy, reconcile, Context, DeploymentClient, KubeDeploymentClient, ERROR_REQUEUE,
};
