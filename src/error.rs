//! Error types for the node-sidecar controller

use thiserror::Error;

/// Main error type for controller operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error, passed through unchanged
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The triggering object lacks a field needed to address it
    #[error("object is missing metadata.{0}")]
    MissingObjectKey(&'static str),

    /// Metrics registration or encoding failed
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// The metrics server failed to bind or serve
    #[error("metrics server error: {0}")]
    Server(#[from] std::io::Error),

    /// Leader election could not be set up or was lost
    #[error("leader election error: {0}")]
    LeaderElection(String),

    /// Tracing or exporter initialization failed
    #[error("telemetry error: {0}")]
    Telemetry(String),
}

impl Error {
    /// Create a leader election error with the given message
    pub fn leader_election(msg: impl Into<String>) -> Self {
        Self::LeaderElection(msg.into())
    }

    /// Create a telemetry error with the given message
    pub fn telemetry(msg: impl Into<String>) -> Self {
        Self::Telemetry(msg.into())
    }

    /// Check if retrying the same operation could succeed
    ///
    /// Client errors from the API server (4xx) need a changed object to
    /// succeed, except 409 Conflict which clears once the cache catches up.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(ae)) => ae.code == 409 || !(400..500).contains(&ae.code),
            Error::Kube(_) => true,
            Error::MissingObjectKey(_) => false,
            Error::Metrics(_) => false,
            Error::Server(_) => true,
            Error::LeaderElection(_) => true,
            Error::Telemetry(_) => false,
        }
    }
}
