//! Forecast-to-node-count delta computation
//!
//! Pure arithmetic: the gap between predicted demand and current capacity
//! per dimension, converted into an equivalent node count using the
//! configured node shape. No I/O happens here so the math is testable
//! without a live cluster or oracle.

use crate::models::{ForecastResult, NodeShape, ResourceAggregate};

/// Why a dimension could not produce a node delta, or the delta itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionDelta {
    /// Signed node-count delta, rounded toward zero
    Nodes(i64),
    /// The capacity aggregate had no value for this dimension
    MissingCapacity,
    /// The node shape has a zero or negative quantity for this dimension
    InvalidShape,
}

impl DimensionDelta {
    /// The delta, if the dimension produced one
    pub fn nodes(&self) -> Option<i64> {
        match self {
            DimensionDelta::Nodes(n) => Some(*n),
            _ => None,
        }
    }
}

/// Node deltas per resource dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeDeltas {
    pub cpu: DimensionDelta,
    pub memory: DimensionDelta,
}

/// Convert the capacity/forecast gap into node-count deltas.
///
/// Per dimension: `delta = predicted - capacity`, then truncating
/// division by the shape quantity. Memory capacity is compared in MiB,
/// the unit the oracle predicts in. A dimension with no capacity value or
/// an unusable shape divisor is excluded rather than coerced to zero.
pub fn compute_node_deltas(
    capacity: &ResourceAggregate,
    forecast: &ForecastResult,
    shape: &NodeShape,
) -> NodeDeltas {
    NodeDeltas {
        cpu: dimension_delta(capacity.cpu_millis(), forecast.cpu_millis, shape.cpu_millis),
        memory: dimension_delta(capacity.memory_mib(), forecast.memory_mib, shape.memory_mib()),
    }
}

fn dimension_delta(capacity: Option<i64>, predicted: i64, shape: i64) -> DimensionDelta {
    let Some(capacity) = capacity else {
        return DimensionDelta::MissingCapacity;
    };
    if shape <= 0 {
        return DimensionDelta::InvalidShape;
    }
    // i64 division truncates toward zero, for both signs of the gap.
    DimensionDelta::Nodes((predicted - capacity) / shape)
}
