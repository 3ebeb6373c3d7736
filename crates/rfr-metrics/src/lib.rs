//! ---
//! rfr_section: "03-observability"
//! rfr_subsection: "module"
//! rfr_type: "source"
//! rfr_scope: "code"
//! rfr_description: "Prometheus registry and lifecycle metric families."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::error;

/// Shared registry type used across crates.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Render every family in the registry using the Prometheus text format.
pub fn encode_text(registry: &Registry) -> Result<String> {
    let families = registry.gather();
    TextEncoder::new()
        .encode_to_string(&families)
        .map_err(|err| {
            error!(error = %err, "failed to encode metrics");
            err
        })
        .context("metrics encoding error")
}

/// Metrics recorded by the resource lifecycle controller.
#[derive(Clone, Debug)]
pub struct LifecycleMetrics {
    registry: SharedRegistry,
    operations_total: IntCounterVec,
    operation_duration_seconds: HistogramVec,
    lock_wait_seconds: Histogram,
}

impl LifecycleMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let operations_total = IntCounterVec::new(
            Opts::new(
                "rfr_operations_total",
                "Lifecycle operations executed by verb and outcome",
            ),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 20)
            .context("failed to construct histogram buckets")?;
        let operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "rfr_operation_duration_seconds",
                "Wall-clock duration of lifecycle operations including remote polling",
            )
            .buckets(buckets.clone()),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration_seconds.clone()))?;

        let lock_wait_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "rfr_lock_wait_seconds",
                "Time spent waiting for the route filter lock before a remote write",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(lock_wait_seconds.clone()))?;

        Ok(Self {
            registry,
            operations_total,
            operation_duration_seconds,
            lock_wait_seconds,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Count a finished operation and record how long it took.
    pub fn observe_operation(&self, operation: &str, outcome: &str, duration: Duration) {
        self.operations_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.operation_duration_seconds
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    pub fn observe_lock_wait(&self, waited: Duration) {
        self.lock_wait_seconds.observe(waited.as_secs_f64());
    }
}
