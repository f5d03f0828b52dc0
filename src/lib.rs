//! node-sidecar-controller - injects the node sidecar into labelled Deployments
//!
//! The controller watches `apps/v1` Deployments. Any Deployment labelled
//! `node-sidecar=true` gets a fixed sidecar container appended to its pod
//! template (once), and every reconciled Deployment is stamped with a
//! `pod-count` label holding the number of pods matching its template.
//!
//! # Modules
//!
//! - [`sidecar`] - The sidecar descriptor and the pure injection logic
//! - [`controller`] - Reconcile callback and its object-store seam
//! - [`controller_runner`] - Wires the reconcile into a kube-rs `Controller`
//! - [`leader_election`] - Lease-based leader election for HA deployments
//! - [`metrics`] - Prometheus metrics for reconcile outcomes
//! - [`server`] - Metrics and health HTTP endpoints
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod controller;
pub mod controller_runner;
pub mod error;
pub mod leader_election;
pub mod metrics;
pub mod server;
pub mod sidecar;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager recorded on every write made by this controller
pub const FIELD_MANAGER: &str = "node-sidecar-controller";

/// Default bind address for the metrics and health endpoints
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

/// Default name of the Lease used for leader election
pub const DEFAULT_LEASE_NAME: &str = "node-sidecar-controller-leader";
