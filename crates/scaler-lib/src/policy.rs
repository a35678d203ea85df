//! Scaling decision policy
//!
//! Resolves the per-dimension node deltas into one desired pool size and
//! applies the scale-down guard. Pure: identical inputs always give the
//! same decision.

use crate::delta::NodeDeltas;
use crate::models::{ForecastResult, ResourceAggregate, ScalingDecision};

/// Decide the desired compute node count for this cycle.
///
/// The base target is `current + cpu_delta`; when the memory delta asks
/// for more nodes, the hungriest dimension wins. Under-provisioning
/// either resource fails workloads while over-provisioning only idles
/// capacity, so conflicting dimensions are never averaged. An excluded
/// dimension takes no part in the decision; with both excluded the pool
/// keeps its current size.
///
/// Scale-down guard: a reduction is blocked when observed usage already
/// exceeds the forecast on any dimension. Actual consumption above the
/// prediction is proof the forecast underestimated demand. Scale-up is
/// never guarded.
pub fn decide(
    current_nodes: i32,
    deltas: &NodeDeltas,
    usage: &ResourceAggregate,
    forecast: &ForecastResult,
) -> ScalingDecision {
    let cpu = deltas.cpu.nodes();
    let memory = deltas.memory.nodes();

    let node_delta = match (cpu, memory) {
        (Some(cpu), Some(memory)) if memory > cpu => Some(memory),
        (Some(cpu), _) => Some(cpu),
        (None, memory) => memory,
    };

    let mut desired_nodes = match node_delta {
        Some(delta) => clamp_node_count(i64::from(current_nodes) + delta),
        None => current_nodes,
    };

    let mut scale_down_suppressed = false;
    if desired_nodes < current_nodes && usage_exceeds_forecast(usage, forecast) {
        desired_nodes = current_nodes;
        scale_down_suppressed = true;
    }

    ScalingDecision {
        desired_nodes,
        current_nodes,
        scale_down_suppressed,
    }
}

/// True when observed usage is above the forecast on any dimension.
///
/// Compares usage against the forecast, not against capacity; the
/// asymmetry is deliberate (the forecast is the signal that would justify
/// the scale-down). Unknown usage dimensions cannot fire the guard.
pub fn usage_exceeds_forecast(usage: &ResourceAggregate, forecast: &ForecastResult) -> bool {
    let cpu_over = usage
        .cpu_millis()
        .is_some_and(|used| used > forecast.cpu_millis);
    let memory_over = usage
        .memory_mib()
        .is_some_and(|used| used > forecast.memory_mib);
    cpu_over || memory_over
}

fn clamp_node_count(desired: i64) -> i32 {
    desired.clamp(0, i64::from(i32::MAX)) as i32
}
