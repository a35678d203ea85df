//! Scaler library for predictive node capacity control
//!
//! This crate provides the core functionality for:
//! - Cluster-wide resource aggregation from node snapshots
//! - Forecast-driven node delta computation
//! - The scaling policy and its scale-down safety guard
//! - The reconciliation loop and collaborator interfaces
//! - Health checks and observability

pub mod actuator;
pub mod aggregate;
pub mod cluster;
pub mod delta;
pub mod error;
pub mod forecast;
pub mod health;
pub mod models;
pub mod observability;
pub mod policy;
pub mod quantity;
pub mod reconciler;

pub use error::ScalerError;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ScalerMetrics, StructuredLogger};
