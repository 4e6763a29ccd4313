//! Target cluster types
//!
//! The autoscaler consumes ScyllaCluster objects owned by the cluster
//! operator. Only the fields the autoscaler reads or guards are modeled
//! here; everything else passes through the apiserver untouched.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::quantity::Quantity;

/// Label carrying the digest of the recommendations last applied by the
/// Updater. Opaque to every other writer.
pub const CHECKSUM_LABEL: &str = "autoscaler-checksum";

/// Resource name of the CPU entries the autoscaler controls.
pub const RESOURCE_CPU: &str = "cpu";

/// ScyllaCluster is the Schema for the scyllaclusters API (consumed only)
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "scylla.scylladb.com",
    version = "v1",
    kind = "ScyllaCluster",
    plural = "scyllaclusters",
    namespaced,
    status = "ScyllaClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ScyllaClusterSpec {
    pub datacenter: DatacenterSpec,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatacenterSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub racks: Vec<RackSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RackSpec {
    pub name: String,

    /// Desired instance count for this rack
    #[serde(default)]
    pub members: i32,

    #[serde(default)]
    pub storage: StorageSpec,

    #[serde(default)]
    pub resources: ResourceRequirements,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Persistent volume size per member, e.g. "100Gi"
    #[serde(default)]
    pub capacity: Quantity,
}

/// Resource requests and limits keyed by resource name, mirroring the
/// core/v1 ResourceRequirements shape
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, Quantity>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, Quantity>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScyllaClusterStatus {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub racks: BTreeMap<String, RackStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RackStatus {
    #[serde(default)]
    pub members: i32,

    #[serde(default)]
    pub ready_members: i32,
}

/// A cluster is ready when every rack declared in the spec reports as many
/// ready members as the spec asks for.
pub fn is_cluster_ready(cluster: &ScyllaCluster) -> bool {
    cluster.spec.datacenter.racks.iter().all(|rack| {
        cluster
            .status
            .as_ref()
            .and_then(|status| status.racks.get(&rack.name))
            .is_some_and(|rs| rs.ready_members == rack.members)
    })
}

/// Find a rack spec by name.
pub fn find_rack<'a>(name: &str, racks: &'a [RackSpec]) -> Option<&'a RackSpec> {
    racks.iter().find(|rack| rack.name == name)
}
