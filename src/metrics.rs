//! Prometheus metrics for the reconcile loop
//!
//! Provides:
//! - Reconcile counts and durations
//! - Reconcile failures (counted by the error policy)
//! - Sidecar injections that were successfully written back

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramTimer, IntCounter, Registry, TextEncoder,
};

use crate::Result;

/// Reconcile metrics backed by a dedicated registry
pub struct Metrics {
    registry: Registry,
    reconciles: IntCounter,
    reconcile_errors: IntCounter,
    injections: IntCounter,
    reconcile_duration: Histogram,
}

impl Metrics {
    /// Create and register all metrics
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let reconciles = IntCounter::new(
            "node_sidecar_reconciles_total",
            "Total number of Deployment reconciliations",
        )?;
        registry.register(Box::new(reconciles.clone()))?;

        let reconcile_errors = IntCounter::new(
            "node_sidecar_reconcile_errors_total",
            "Total number of failed Deployment reconciliations",
        )?;
        registry.register(Box::new(reconcile_errors.clone()))?;

        let injections = IntCounter::new(
            "node_sidecar_injections_total",
            "Total number of sidecar containers added to Deployments",
        )?;
        registry.register(Box::new(injections.clone()))?;

        // 1ms .. 10s
        let reconcile_duration = Histogram::with_opts(
            HistogramOpts::new(
                "node_sidecar_reconcile_duration_seconds",
                "Duration of Deployment reconciliation in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
        )?;
        registry.register(Box::new(reconcile_duration.clone()))?;

        Ok(Self {
            registry,
            reconciles,
            reconcile_errors,
            injections,
            reconcile_duration,
        })
    }

    /// Count a reconcile and time it until the returned timer is dropped
    pub fn start_reconcile(&self) -> HistogramTimer {
        self.reconciles.inc();
        self.reconcile_duration.start_timer()
    }

    /// Count a failed reconcile
    pub fn record_error(&self) {
        self.reconcile_errors.inc();
    }

    /// Count a sidecar injection
    pub fn record_injection(&self) {
        self.injections.inc();
    }

    /// Reconciles started so far
    pub fn reconciles(&self) -> u64 {
        self.reconciles.get()
    }

    /// Failed reconciles so far
    pub fn errors(&self) -> u64 {
        self.reconcile_errors.get()
    }

    /// Injections written so far
    pub fn injections(&self) -> u64 {
        self.injections.get()
    }

    /// Encode every metric in the Prometheus text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
