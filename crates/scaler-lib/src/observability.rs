//! Observability infrastructure for the scaler
//!
//! Provides:
//! - Prometheus metrics (cycle counts, node gauges, forecast latency,
//!   guard suppressions)
//! - Structured JSON logging with tracing for significant scaling events

use crate::models::{ForecastResult, ScalingDecision};
use prometheus::{
    register_histogram, register_int_gauge, Histogram, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for forecast round trips (in seconds)
const FORECAST_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ScalerMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct ScalerMetricsInner {
    cycles_total: IntGauge,
    cycle_errors_total: IntGauge,
    actuations_total: IntGauge,
    suppressed_scale_downs_total: IntGauge,
    current_nodes: IntGauge,
    desired_nodes: IntGauge,
    oracle_primed: IntGauge,
    forecast_latency_seconds: Histogram,
}

impl ScalerMetricsInner {
    fn new() -> Self {
        Self {
            cycles_total: register_int_gauge!(
                "node_scaler_cycles_total",
                "Total number of completed reconciliation cycles"
            )
            .expect("Failed to register cycles_total"),

            cycle_errors_total: register_int_gauge!(
                "node_scaler_cycle_errors_total",
                "Total number of reconciliation cycles aborted by an error"
            )
            .expect("Failed to register cycle_errors_total"),

            actuations_total: register_int_gauge!(
                "node_scaler_actuations_total",
                "Total number of replica updates issued to the machine pool"
            )
            .expect("Failed to register actuations_total"),

            suppressed_scale_downs_total: register_int_gauge!(
                "node_scaler_suppressed_scale_downs_total",
                "Total number of scale-downs blocked by the usage guard"
            )
            .expect("Failed to register suppressed_scale_downs_total"),

            current_nodes: register_int_gauge!(
                "node_scaler_current_nodes",
                "Compute nodes observed in the latest cycle"
            )
            .expect("Failed to register current_nodes"),

            desired_nodes: register_int_gauge!(
                "node_scaler_desired_nodes",
                "Desired compute node count from the latest decision"
            )
            .expect("Failed to register desired_nodes"),

            oracle_primed: register_int_gauge!(
                "node_scaler_oracle_primed",
                "1 once the forecast oracle has been primed with history"
            )
            .expect("Failed to register oracle_primed"),

            forecast_latency_seconds: register_histogram!(
                "node_scaler_forecast_latency_seconds",
                "Time spent waiting on the forecast oracle per cycle",
                FORECAST_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register forecast_latency_seconds"),
        }
    }
}

/// Scaler metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ScalerMetrics {
    // This is just a marker - we use the global instance
    _private: (),
}

impl Default for ScalerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ScalerMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Count a completed cycle
    pub fn inc_cycles(&self) {
        self.inner().cycles_total.inc();
    }

    /// Count an aborted cycle
    pub fn inc_cycle_errors(&self) {
        self.inner().cycle_errors_total.inc();
    }

    /// Count a replica update issued to the pool
    pub fn inc_actuations(&self) {
        self.inner().actuations_total.inc();
    }

    /// Count a scale-down blocked by the usage guard
    pub fn inc_suppressed_scale_downs(&self) {
        self.inner().suppressed_scale_downs_total.inc();
    }

    /// Record the observed and desired node counts for the latest cycle
    pub fn set_node_counts(&self, current: i32, desired: i32) {
        self.inner().current_nodes.set(i64::from(current));
        self.inner().desired_nodes.set(i64::from(desired));
    }

    /// Mark the oracle as primed (warm-up complete)
    pub fn set_oracle_primed(&self, primed: bool) {
        self.inner().oracle_primed.set(i64::from(primed));
    }

    /// Record a forecast round-trip latency observation
    pub fn observe_forecast_latency(&self, duration_secs: f64) {
        self.inner().forecast_latency_seconds.observe(duration_secs);
    }
}

/// Structured logger for scaler events
///
/// Provides consistent JSON-formatted logging for scaling decisions,
/// guard suppressions, and lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    pool_namespace: String,
}

impl StructuredLogger {
    pub fn new(pool_namespace: impl Into<String>) -> Self {
        Self {
            pool_namespace: pool_namespace.into(),
        }
    }

    /// Log scaler startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "scaler_started",
            pool_namespace = %self.pool_namespace,
            scaler_version = %version,
            "Node scaler started"
        );
    }

    /// Log scaler shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "scaler_shutdown",
            pool_namespace = %self.pool_namespace,
            reason = %reason,
            "Node scaler shutting down"
        );
    }

    /// Log the oracle being primed at the end of warm-up
    pub fn log_oracle_primed(&self, dataset: &str) {
        info!(
            event = "oracle_primed",
            pool_namespace = %self.pool_namespace,
            dataset = %dataset,
            "Forecast oracle primed with historical data"
        );
    }

    /// Log a scaling action about to be issued
    pub fn log_scaling(&self, decision: &ScalingDecision, reported_replicas: i32) {
        info!(
            event = "pool_scaled",
            pool_namespace = %self.pool_namespace,
            current_nodes = decision.current_nodes,
            desired_nodes = decision.desired_nodes,
            reported_replicas = reported_replicas,
            "Scaling compute pool"
        );
    }

    /// Log a scale-down blocked by the usage guard
    pub fn log_suppressed_scale_down(
        &self,
        decision: &ScalingDecision,
        forecast: &ForecastResult,
    ) {
        warn!(
            event = "scale_down_suppressed",
            pool_namespace = %self.pool_namespace,
            current_nodes = decision.current_nodes,
            forecast_cpu_millis = forecast.cpu_millis,
            forecast_memory_mib = forecast.memory_mib,
            "Resource consumption exceeds prediction, can't scale down yet"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaler_metrics_creation() {
        // Note: metrics live in the Prometheus global registry, so they
        // are created once per process. We exercise the handle here.
        let metrics = ScalerMetrics::new();

        metrics.inc_cycles();
        metrics.inc_cycle_errors();
        metrics.inc_actuations();
        metrics.inc_suppressed_scale_downs();
        metrics.set_node_counts(3, 4);
        metrics.set_oracle_primed(true);
        metrics.observe_forecast_latency(0.05);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("openshift-machine-api");
        assert_eq!(logger.pool_namespace, "openshift-machine-api");
    }
}
