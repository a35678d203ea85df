//! Machine-pool actuator
//!
//! Applies scaling decisions to the managed compute pool. The machine API
//! is the system of record for the replica count; the scaler re-reads it
//! every cycle and never caches a locally computed value.

use crate::error::ScalerError;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

/// The managed compute-node pool
#[async_trait]
pub trait PoolActuator: Send + Sync {
    /// Replica count currently requested on the pool
    async fn current_replicas(&self) -> Result<i32, ScalerError>;

    /// Request a new replica count. Fire-and-forget; convergence is the
    /// machine controller's problem.
    async fn scale_to(&self, replicas: i32) -> Result<(), ScalerError>;
}

/// `machine.openshift.io/v1beta1` MachineSet, reduced to the fields the
/// scaler reads. Declared by hand since it is not part of k8s-openapi.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MachineSet {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: MachineSetSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MachineSetStatus>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct MachineSetSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetStatus {
    #[serde(default)]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub ready_replicas: Option<i32>,
}

impl k8s_openapi::Resource for MachineSet {
    type Scope = k8s_openapi::NamespaceResourceScope;

    const API_VERSION: &'static str = "machine.openshift.io/v1beta1";
    const GROUP: &'static str = "machine.openshift.io";
    const KIND: &'static str = "MachineSet";
    const URL_PATH_SEGMENT: &'static str = "machinesets";
    const VERSION: &'static str = "v1beta1";
}

impl k8s_openapi::Metadata for MachineSet {
    type Ty = ObjectMeta;

    fn metadata(&self) -> &Self::Ty {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Self::Ty {
        &mut self.metadata
    }
}

/// Actuator that scales one machine set in a configured namespace
pub struct MachineSetActuator {
    machine_sets: Api<MachineSet>,
}

impl MachineSetActuator {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            machine_sets: Api::namespaced(client, namespace),
        }
    }

    /// The pool this scaler manages
    async fn target(&self) -> Result<MachineSet, ScalerError> {
        let sets = self
            .machine_sets
            .list(&ListParams::default())
            .await
            .map_err(|e| ScalerError::transient("actuator", e))?;

        pick_target(sets.items)
            .ok_or_else(|| ScalerError::transient("actuator", "no machine sets in namespace"))
    }
}

/// Deterministic pool selection when several machine sets exist: first by
/// lexicographic name
fn pick_target(mut sets: Vec<MachineSet>) -> Option<MachineSet> {
    sets.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
    sets.into_iter().next()
}

#[async_trait]
impl PoolActuator for MachineSetActuator {
    async fn current_replicas(&self) -> Result<i32, ScalerError> {
        let target = self.target().await?;
        Ok(target.spec.replicas.unwrap_or(0))
    }

    async fn scale_to(&self, replicas: i32) -> Result<(), ScalerError> {
        let target = self.target().await?;
        let name = target.metadata.name.as_deref().unwrap_or_default();
        let status = target.status.unwrap_or_default();
        info!(
            machine_set = %name,
            replicas,
            previous = ?target.spec.replicas,
            ready = ?status.ready_replicas,
            "Scaling machine set"
        );

        let patch = json!({ "spec": { "replicas": replicas } });
        self.machine_sets
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ScalerError::transient("actuator", e))?;
        Ok(())
    }
}
