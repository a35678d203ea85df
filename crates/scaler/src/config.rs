//! Scaler configuration

use anyhow::Result;
use scaler_lib::models::{NodeShape, MIB};
use scaler_lib::reconciler::ReconcilerConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Scaler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScalerConfig {
    /// Forecast oracle endpoint
    #[serde(default = "default_forecast_endpoint")]
    pub forecast_endpoint: String,

    /// Directory holding historical resource*.csv datasets
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Namespace holding the managed machine sets
    #[serde(default = "default_machine_namespace")]
    pub machine_namespace: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Reference CPU of one compute node, in milli-units
    #[serde(default = "default_node_cpu_millis")]
    pub node_cpu_millis: i64,

    /// Reference memory of one compute node, in MiB
    #[serde(default = "default_node_memory_mib")]
    pub node_memory_mib: i64,

    /// Reconciliation interval in seconds
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,

    /// Post-actuation settle delay in seconds
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,

    /// Warm-up retry delay in seconds
    #[serde(default = "default_warmup_retry")]
    pub warmup_retry_secs: u64,

    /// Forecast horizon in minutes
    #[serde(default = "default_forecast_horizon")]
    pub forecast_horizon_mins: i64,
}

fn default_forecast_endpoint() -> String {
    "http://localhost:5001".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_machine_namespace() -> String {
    "openshift-machine-api".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_node_cpu_millis() -> i64 {
    4000
}

fn default_node_memory_mib() -> i64 {
    16384
}

fn default_cycle_interval() -> u64 {
    30
}

fn default_settle_delay() -> u64 {
    30
}

fn default_warmup_retry() -> u64 {
    5
}

fn default_forecast_horizon() -> i64 {
    20
}

impl ScalerConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("SCALER"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| ScalerConfig {
            forecast_endpoint: default_forecast_endpoint(),
            data_dir: default_data_dir(),
            machine_namespace: default_machine_namespace(),
            api_port: default_api_port(),
            node_cpu_millis: default_node_cpu_millis(),
            node_memory_mib: default_node_memory_mib(),
            cycle_interval_secs: default_cycle_interval(),
            settle_delay_secs: default_settle_delay(),
            warmup_retry_secs: default_warmup_retry(),
            forecast_horizon_mins: default_forecast_horizon(),
        }))
    }

    /// The loop configuration derived from this environment config
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            cycle_interval: Duration::from_secs(self.cycle_interval_secs),
            settle_delay: Duration::from_secs(self.settle_delay_secs),
            warmup_retry_delay: Duration::from_secs(self.warmup_retry_secs),
            forecast_horizon: chrono::Duration::minutes(self.forecast_horizon_mins),
            data_dir: PathBuf::from(&self.data_dir),
            node_shape: NodeShape {
                cpu_millis: self.node_cpu_millis,
                memory_bytes: self.node_memory_mib * MIB,
            },
        }
    }
}
