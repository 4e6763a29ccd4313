use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::duration::ApiDuration;
use crate::crd::scylla_cluster::ResourceRequirements;
use crate::quantity::Quantity;

/// ScyllaClusterAutoscaler is the Schema for the scyllaclusterautoscalers API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "autoscaling.scylla.scylladb.com",
    version = "v1alpha1",
    kind = "ScyllaClusterAutoscaler",
    plural = "scyllaclusterautoscalers",
    shortname = "sca",
    namespaced,
    status = "ScyllaClusterAutoscalerStatus",
    printcolumn = r#"{"name":"Target", "type":"string", "jsonPath":".spec.targetRef.name"}"#,
    printcolumn = r#"{"name":"Mode", "type":"string", "jsonPath":".spec.updatePolicy.updateMode"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.updateStatus"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ScyllaClusterAutoscalerSpec {
    /// The ScyllaCluster this autoscaler governs. Immutable once set.
    pub target_ref: TargetRef,

    /// How recommendations are applied to the target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<UpdatePolicy>,

    /// Per-datacenter scaling rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling_policy: Option<ScalingPolicy>,
}

/// Namespaced reference to the target cluster, looked up at read time
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    pub namespace: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePolicy {
    #[serde(default)]
    pub update_mode: UpdateMode,

    /// Recommendations older than this are never applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation_expiration_time: Option<ApiDuration>,

    /// Minimum time between two applies to the same target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_cooldown: Option<ApiDuration>,
}

/// Whether the Updater may act on recommendations
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum UpdateMode {
    /// Recommendations are computed and surfaced in status only
    Off,
    /// Recommendations are applied to the target spec
    #[default]
    Auto,
}

impl std::fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateMode::Off => write!(f, "Off"),
            UpdateMode::Auto => write!(f, "Auto"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScalingPolicy {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datacenters: Vec<DatacenterScalingPolicy>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatacenterScalingPolicy {
    /// Must match the target cluster's datacenter name
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub racks: Vec<RackScalingPolicy>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RackScalingPolicy {
    /// Must name a rack of the target datacenter
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_policy: Option<RackMemberPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_policy: Option<RackResourcePolicy>,

    /// Evaluated in declaration order; the lowest satisfied priority wins
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<ScalingRule>,
}

/// Inclusive bounds on recommended member counts
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RackMemberPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_allowed: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_allowed: Option<i32>,
}

/// Inclusive bounds on recommended CPU quantities
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RackResourcePolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_allowed_cpu: Option<Quantity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_allowed_cpu: Option<Quantity>,

    #[serde(default)]
    pub controlled_values: ControlledValues,
}

/// Which CPU entries a vertical recommendation writes
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum ControlledValues {
    /// Only requests are scaled; existing limits cap the scaled requests
    Requests,
    /// Requests and limits are scaled together
    #[default]
    RequestsAndLimits,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScalingRule {
    /// Unique per rack
    pub name: String,

    /// Lower value wins among satisfied rules
    pub priority: i32,

    /// Metric expression evaluated against the metrics backend
    pub expression: String,

    /// When set, the expression must hold over the whole trailing window
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "for")]
    pub for_: Option<ApiDuration>,

    /// Sample step for ranged evaluation; provider default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<ApiDuration>,

    pub mode: ScalingMode,

    /// Multiplier applied to the current members or CPU quantity
    pub factor: f64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ScalingMode {
    /// Scale the rack member count
    Horizontal,
    /// Scale the rack CPU resources
    Vertical,
}

impl std::fmt::Display for ScalingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalingMode::Horizontal => write!(f, "Horizontal"),
            ScalingMode::Vertical => write!(f, "Vertical"),
        }
    }
}

/// Observed state written by the Recommender and Updater
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScyllaClusterAutoscalerStatus {
    /// When the Recommender last evaluated this autoscaler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,

    /// When the Updater last mutated the target spec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_status: Option<UpdateStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<ClusterRecommendations>,
}

/// Outcome of the latest Recommender pass
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum UpdateStatus {
    Ok,
    TargetFetchFail,
    TargetNotReady,
    RecommendationsFail,
}

impl std::fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateStatus::Ok => write!(f, "Ok"),
            UpdateStatus::TargetFetchFail => write!(f, "TargetFetchFail"),
            UpdateStatus::TargetNotReady => write!(f, "TargetNotReady"),
            UpdateStatus::RecommendationsFail => write!(f, "RecommendationsFail"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRecommendations {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datacenter_recommendations: Vec<DatacenterRecommendations>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatacenterRecommendations {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rack_recommendations: Vec<RackRecommendations>,
}

/// Desired state for one rack; unset fields leave the rack untouched
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RackRecommendations {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

impl ScyllaClusterAutoscaler {
    /// Effective update mode; defaults to Auto when no policy is set.
    pub fn update_mode(&self) -> UpdateMode {
        self.spec
            .update_policy
            .as_ref()
            .map(|p| p.update_mode)
            .unwrap_or_default()
    }
}
