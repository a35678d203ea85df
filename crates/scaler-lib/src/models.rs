//! Core data models for the node scaler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Bytes per MiB; the forecast oracle speaks memory in MiB.
pub const MIB: i64 = 1024 * 1024;

/// Node labels that mark a control-plane node.
pub const CONTROL_PLANE_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/master",
    "node-role.kubernetes.io/control-plane",
];

/// A resource dimension reported by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Cpu,
    Memory,
    EphemeralStorage,
    Pods,
}

impl ResourceKind {
    /// Map a Kubernetes resource name to a known dimension
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "cpu" => Some(ResourceKind::Cpu),
            "memory" => Some(ResourceKind::Memory),
            "ephemeral-storage" => Some(ResourceKind::EphemeralStorage),
            "pods" => Some(ResourceKind::Pods),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Memory => "memory",
            ResourceKind::EphemeralStorage => "ephemeral-storage",
            ResourceKind::Pods => "pods",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resource quantities reported by a single node
///
/// A dimension absent from the map was not reported by the node. That is
/// "unknown", not zero; consumers must not coerce it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuantities {
    quantities: BTreeMap<ResourceKind, i64>,
}

impl ResourceQuantities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, kind: ResourceKind, value: i64) {
        self.quantities.insert(kind, value);
    }

    pub fn get(&self, kind: ResourceKind) -> Option<i64> {
        self.quantities.get(&kind).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.quantities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, i64)> + '_ {
        self.quantities.iter().map(|(k, v)| (*k, *v))
    }

    /// Builder helper: CPU in milli-units
    pub fn with_cpu_millis(mut self, millis: i64) -> Self {
        self.set(ResourceKind::Cpu, millis);
        self
    }

    /// Builder helper: memory in bytes
    pub fn with_memory_bytes(mut self, bytes: i64) -> Self {
        self.set(ResourceKind::Memory, bytes);
        self
    }
}

/// Cluster-wide resource totals, one entry per dimension seen on any
/// contributing node
///
/// Sums are exact integer arithmetic (CPU milli-units, memory bytes), so
/// the total is independent of the order nodes were listed in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAggregate {
    totals: BTreeMap<ResourceKind, i64>,
}

impl ResourceAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a quantity to the running total for a dimension
    pub fn accumulate(&mut self, kind: ResourceKind, value: i64) {
        *self.totals.entry(kind).or_insert(0) += value;
    }

    /// Total for a dimension, or `None` if no node reported it
    pub fn get(&self, kind: ResourceKind) -> Option<i64> {
        self.totals.get(&kind).copied()
    }

    pub fn cpu_millis(&self) -> Option<i64> {
        self.get(ResourceKind::Cpu)
    }

    pub fn memory_bytes(&self) -> Option<i64> {
        self.get(ResourceKind::Memory)
    }

    /// Memory total converted to MiB (truncating), the unit the forecast
    /// oracle uses
    pub fn memory_mib(&self) -> Option<i64> {
        self.memory_bytes().map(|b| b / MIB)
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, i64)> + '_ {
        self.totals.iter().map(|(k, v)| (*k, *v))
    }
}

/// Role of a cluster node, derived from its labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    ControlPlane,
    Compute,
}

impl NodeRole {
    /// Control-plane if the node carries any of the well-known role labels
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Self {
        if CONTROL_PLANE_LABELS
            .iter()
            .any(|l| labels.contains_key(*l))
        {
            NodeRole::ControlPlane
        } else {
            NodeRole::Compute
        }
    }
}

/// One node's observed state at the start of a cycle
///
/// Produced fresh each cycle by the inventory and usage collaborators and
/// discarded at the end of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub role: NodeRole,
    pub ready: bool,
    pub capacity: ResourceQuantities,
    pub usage: ResourceQuantities,
}

impl NodeSnapshot {
    pub fn is_compute(&self) -> bool {
        self.role == NodeRole::Compute
    }
}

/// Reference resource footprint of one compute node
///
/// Configured per deployment, not discovered. Used only as the divisor
/// that turns resource deltas into node-count deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeShape {
    /// CPU capacity of one node in milli-units
    pub cpu_millis: i64,
    /// Memory capacity of one node in bytes
    pub memory_bytes: i64,
}

impl NodeShape {
    pub fn memory_mib(&self) -> i64 {
        self.memory_bytes / MIB
    }
}

/// What the scaler tells the oracle when asking for a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForecastRequest {
    /// The instant the prediction is for
    pub at: DateTime<Utc>,
    /// Current aggregate CPU demand in milli-units
    pub current_cpu_millis: i64,
    /// Current aggregate memory demand in MiB
    pub current_memory_mib: i64,
}

/// Predicted resource demand returned by the oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastResult {
    /// Predicted CPU demand in milli-units
    #[serde(rename = "cpu")]
    pub cpu_millis: i64,
    /// Predicted memory demand in MiB
    #[serde(rename = "memory")]
    pub memory_mib: i64,
}

/// The per-cycle output of the scaling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingDecision {
    /// Target size of the compute pool, never negative
    pub desired_nodes: i32,
    /// Observed compute node count the decision was made against
    pub current_nodes: i32,
    /// True when the scale-down guard forced desired back to current
    pub scale_down_suppressed: bool,
}
