//! Node Scaler - Predictive node capacity controller
//!
//! This binary runs in-cluster, comparing forecast resource demand
//! against compute capacity and resizing the managed machine pool.

use anyhow::Result;
use scaler_lib::{
    actuator::MachineSetActuator,
    cluster::{KubeInventory, KubeUsageSource},
    forecast::HttpForecastClient,
    health::{components, HealthRegistry},
    observability::{ScalerMetrics, StructuredLogger},
    reconciler::Reconciler,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const SCALER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting node-scaler");

    // Load configuration
    let config = config::ScalerConfig::load()?;
    info!(
        machine_namespace = %config.machine_namespace,
        forecast_endpoint = %config.forecast_endpoint,
        "Scaler configured"
    );

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::INVENTORY).await;
    health_registry.register(components::USAGE).await;
    health_registry.register(components::FORECAST).await;
    health_registry.register(components::ACTUATOR).await;

    // Initialize metrics
    let metrics = ScalerMetrics::new();

    // Initialize structured logger
    let logger = StructuredLogger::new(&config.machine_namespace);
    logger.log_startup(SCALER_VERSION);

    // Cluster collaborators share one API client
    let client = kube::Client::try_default().await?;
    let inventory = Arc::new(KubeInventory::new(client.clone()));
    let usage = Arc::new(KubeUsageSource::new(client.clone()));
    let oracle = Arc::new(HttpForecastClient::new(&config.forecast_endpoint)?);
    let actuator = Arc::new(MachineSetActuator::new(client, &config.machine_namespace));

    let reconciler = Arc::new(Reconciler::new(
        inventory,
        usage,
        oracle,
        actuator,
        config.reconciler_config(),
        health_registry.clone(),
        logger.clone(),
    ));

    // Create shared application state
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics.clone()));

    // Start health and metrics server
    let _api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Start the reconciliation loop; readiness flips once warm-up succeeds
    let (shutdown_tx, _) = broadcast::channel(1);
    let loop_handle = tokio::spawn(reconciler.run(shutdown_tx.subscribe()));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());
    loop_handle.await?;
    info!("Shutting down");

    Ok(())
}
