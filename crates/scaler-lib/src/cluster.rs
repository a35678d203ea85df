//! Cluster inventory and usage collaborators
//!
//! Read-only views of the cluster, queried fresh each cycle: the node
//! list from the core API and per-node usage from the metrics API
//! (`metrics.k8s.io/v1beta1`).

use crate::error::ScalerError;
use crate::models::{NodeRole, NodeSnapshot, ResourceKind, ResourceQuantities};
use crate::quantity;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::ListParams;
use kube::{Api, Client};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Label selector handed to the metrics API so control-plane nodes are
/// filtered server-side
const COMPUTE_SELECTOR: &str = "!node-role.kubernetes.io/master";

/// Current set of node snapshots (identity, role, capacity, readiness)
#[async_trait]
pub trait NodeInventory: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeSnapshot>, ScalerError>;
}

/// Current per-node resource usage, keyed by node name
#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn node_usage(&self) -> Result<HashMap<String, ResourceQuantities>, ScalerError>;
}

/// Node inventory backed by the Kubernetes core API
pub struct KubeInventory {
    nodes: Api<Node>,
}

impl KubeInventory {
    pub fn new(client: Client) -> Self {
        Self {
            nodes: Api::all(client),
        }
    }
}

#[async_trait]
impl NodeInventory for KubeInventory {
    async fn list_nodes(&self) -> Result<Vec<NodeSnapshot>, ScalerError> {
        let nodes = self
            .nodes
            .list(&ListParams::default())
            .await
            .map_err(|e| ScalerError::transient("inventory", e))?;

        Ok(nodes.into_iter().map(snapshot_from_node).collect())
    }
}

/// Map an API node object into a cycle-scoped snapshot
fn snapshot_from_node(node: Node) -> NodeSnapshot {
    let name = node.metadata.name.unwrap_or_default();
    let labels = node.metadata.labels.unwrap_or_default();
    let role = NodeRole::from_labels(&labels);

    let status = node.status.unwrap_or_default();
    let ready = status
        .conditions
        .unwrap_or_default()
        .iter()
        .any(|c| c.type_ == "Ready" && c.status == "True");
    let capacity = parse_quantities(&status.capacity.unwrap_or_default(), &name);

    NodeSnapshot {
        name,
        role,
        ready,
        capacity,
        usage: ResourceQuantities::new(),
    }
}

/// Convert a Kubernetes quantity map into integer resource quantities.
///
/// Unknown dimensions are ignored; an unparseable value is skipped with a
/// warning, leaving the dimension absent (unknown) for that node.
fn parse_quantities(map: &BTreeMap<String, Quantity>, node: &str) -> ResourceQuantities {
    let mut quantities = ResourceQuantities::new();
    for (resource_name, value) in map {
        let Some(kind) = ResourceKind::from_name(resource_name) else {
            continue;
        };
        let parsed = match kind {
            ResourceKind::Cpu => quantity::parse_cpu_millis(&value.0),
            _ => quantity::parse_bytes(&value.0),
        };
        match parsed {
            Ok(amount) => quantities.set(kind, amount),
            Err(e) => warn!(
                node = %node,
                resource = %kind,
                error = %e,
                "Skipping unparseable quantity"
            ),
        }
    }
    quantities
}

/// `metrics.k8s.io/v1beta1` node metrics item.
///
/// Not part of k8s-openapi, so the resource is declared by hand.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NodeMetrics {
    pub metadata: ObjectMeta,
    pub timestamp: String,
    pub window: String,
    pub usage: BTreeMap<String, Quantity>,
}

impl k8s_openapi::Resource for NodeMetrics {
    type Scope = k8s_openapi::ClusterResourceScope;

    const API_VERSION: &'static str = "metrics.k8s.io/v1beta1";
    const GROUP: &'static str = "metrics.k8s.io";
    const KIND: &'static str = "NodeMetrics";
    const URL_PATH_SEGMENT: &'static str = "nodes";
    const VERSION: &'static str = "v1beta1";
}

impl k8s_openapi::Metadata for NodeMetrics {
    type Ty = ObjectMeta;

    fn metadata(&self) -> &Self::Ty {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Self::Ty {
        &mut self.metadata
    }
}

/// Usage source backed by the metrics API
pub struct KubeUsageSource {
    metrics: Api<NodeMetrics>,
}

impl KubeUsageSource {
    pub fn new(client: Client) -> Self {
        Self {
            metrics: Api::all(client),
        }
    }
}

#[async_trait]
impl UsageSource for KubeUsageSource {
    async fn node_usage(&self) -> Result<HashMap<String, ResourceQuantities>, ScalerError> {
        let params = ListParams::default().labels(COMPUTE_SELECTOR);
        let items = self
            .metrics
            .list(&params)
            .await
            .map_err(|e| ScalerError::transient("usage", e))?;

        let mut usage = HashMap::new();
        for item in items {
            let Some(name) = item.metadata.name.clone() else {
                continue;
            };
            let quantities = parse_quantities(&item.usage, &name);
            usage.insert(name, quantities);
        }
        Ok(usage)
    }
}
