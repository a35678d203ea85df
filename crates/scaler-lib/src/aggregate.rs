//! Cluster-wide resource aggregation
//!
//! Reduces per-node snapshots into capacity and usage totals for the
//! compute pool. Control-plane nodes never contribute, regardless of
//! readiness.

use crate::models::{NodeSnapshot, ResourceAggregate, ResourceQuantities};

/// Sum the selected quantities of every node the predicate admits.
///
/// A dimension absent on a given node contributes nothing; a dimension
/// absent on every selected node is absent from the result. Empty input
/// yields an empty aggregate.
pub fn aggregate<'a, P, F>(nodes: &'a [NodeSnapshot], predicate: P, quantities: F) -> ResourceAggregate
where
    P: Fn(&NodeSnapshot) -> bool,
    F: Fn(&'a NodeSnapshot) -> &'a ResourceQuantities,
{
    let mut totals = ResourceAggregate::new();
    for node in nodes.iter().filter(|n| predicate(n)) {
        for (kind, value) in quantities(node).iter() {
            totals.accumulate(kind, value);
        }
    }
    totals
}

/// Capacity totals over compute nodes
pub fn aggregate_capacity(nodes: &[NodeSnapshot]) -> ResourceAggregate {
    aggregate(nodes, NodeSnapshot::is_compute, |n| &n.capacity)
}

/// Usage totals over compute nodes
pub fn aggregate_usage(nodes: &[NodeSnapshot]) -> ResourceAggregate {
    aggregate(nodes, NodeSnapshot::is_compute, |n| &n.usage)
}
