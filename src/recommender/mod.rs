//! Recommender: rule evaluation and recommendation publishing
//!
//! Each pass lists every autoscaler, evaluates its scaling policy against
//! the metrics backend and persists the outcome in the autoscaler status.
//! A failing autoscaler never aborts the pass; its status records the
//! failure class and the next tick retries.

mod calc;

pub use calc::{calculate_cpu, calculate_members};

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use tracing::{error, warn};

use crate::crd::{
    ClusterRecommendations, ControlledValues, DatacenterRecommendations, DatacenterScalingPolicy,
    DatacenterSpec, RackRecommendations, RackScalingPolicy, RackSpec, ScalingMode, ScalingPolicy,
    ScyllaCluster, ScyllaClusterAutoscaler, UpdateStatus, is_cluster_ready,
};
use crate::crd::{RESOURCE_CPU, find_rack};
use crate::error::{Error, Result};
use crate::metrics::Provider;
use crate::util::min_quantity;

/// Field manager for status patches
const FIELD_MANAGER: &str = "scylla-autoscaler-recommender";

pub struct Recommender {
    client: Client,
    provider: Arc<dyn Provider>,
}

impl Recommender {
    pub fn new(client: Client, provider: Arc<dyn Provider>) -> Self {
        Self { client, provider }
    }

    /// One full evaluation pass over all autoscalers.
    pub async fn run_once(&self) -> Result<()> {
        let autoscalers: Api<ScyllaClusterAutoscaler> = Api::all(self.client.clone());
        let list = autoscalers.list(&ListParams::default()).await?;

        for sca in list.items {
            self.process(&sca).await;
        }

        Ok(())
    }

    async fn process(&self, sca: &ScyllaClusterAutoscaler) {
        let name = sca.name_any();
        let namespace = sca.namespace().unwrap_or_default();
        let target = &sca.spec.target_ref;

        let clusters: Api<ScyllaCluster> = Api::namespaced(self.client.clone(), &target.namespace);
        let cluster = match clusters.get(&target.name).await {
            Ok(cluster) => cluster,
            Err(error) => {
                error!(%namespace, %name, target = %target.name, %error, "failed to fetch target cluster");
                self.write_status(sca, UpdateStatus::TargetFetchFail, None).await;
                return;
            }
        };

        if !is_cluster_ready(&cluster) {
            warn!(%namespace, %name, target = %target.name, "target cluster not ready");
            self.write_status(sca, UpdateStatus::TargetNotReady, None).await;
            return;
        }

        match cluster_recommendations(
            self.provider.as_ref(),
            &cluster,
            sca.spec.scaling_policy.as_ref(),
        )
        .await
        {
            Ok(recommendations) => {
                self.write_status(sca, UpdateStatus::Ok, recommendations).await;
            }
            Err(error) => {
                error!(%namespace, %name, %error, "failed to prepare recommendations");
                self.write_status(sca, UpdateStatus::RecommendationsFail, None).await;
            }
        }
    }

    /// Persist the pass outcome. A failed status write is logged and left
    /// for the next tick; it never fails the pass.
    async fn write_status(
        &self,
        sca: &ScyllaClusterAutoscaler,
        update_status: UpdateStatus,
        recommendations: Option<ClusterRecommendations>,
    ) {
        let namespace = sca.namespace().unwrap_or_default();
        let name = sca.name_any();
        let api: Api<ScyllaClusterAutoscaler> = Api::namespaced(self.client.clone(), &namespace);

        let patch = serde_json::json!({
            "status": {
                "lastUpdated": Utc::now(),
                "updateStatus": update_status,
                "recommendations": recommendations,
            }
        });

        if let Err(error) = api
            .patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
        {
            error!(%namespace, %name, %error, "failed to update autoscaler status");
        }
    }
}

/// Recommendations for a whole cluster; `None` when no rule applied
/// anywhere. Every datacenter policy must name the cluster's datacenter.
pub async fn cluster_recommendations(
    provider: &dyn Provider,
    cluster: &ScyllaCluster,
    policy: Option<&ScalingPolicy>,
) -> Result<Option<ClusterRecommendations>> {
    let Some(policy) = policy else {
        return Ok(None);
    };

    let datacenter = &cluster.spec.datacenter;
    let mut recommendations = Vec::new();
    for datacenter_policy in &policy.datacenters {
        if datacenter_policy.name != datacenter.name {
            return Err(Error::DatacenterNotFound(datacenter_policy.name.clone()));
        }
        if let Some(recs) = datacenter_recommendations(provider, datacenter, datacenter_policy).await? {
            recommendations.push(recs);
        }
    }

    if recommendations.is_empty() {
        Ok(None)
    } else {
        Ok(Some(ClusterRecommendations {
            datacenter_recommendations: recommendations,
        }))
    }
}

async fn datacenter_recommendations(
    provider: &dyn Provider,
    datacenter: &DatacenterSpec,
    policy: &DatacenterScalingPolicy,
) -> Result<Option<DatacenterRecommendations>> {
    let mut recommendations = Vec::new();
    for rack_policy in &policy.racks {
        let rack = find_rack(&rack_policy.name, &datacenter.racks)
            .ok_or_else(|| Error::RackNotFound(rack_policy.name.clone()))?;
        if let Some(recs) = rack_recommendations(provider, rack, rack_policy).await? {
            recommendations.push(recs);
        }
    }

    if recommendations.is_empty() {
        Ok(None)
    } else {
        Ok(Some(DatacenterRecommendations {
            name: datacenter.name.clone(),
            rack_recommendations: recommendations,
        }))
    }
}

/// Evaluate a rack's rules in declaration order. A rule is considered only
/// while its priority is strictly below the best applied so far, so the
/// lowest priority wins and equal priorities resolve to the first declared.
pub async fn rack_recommendations(
    provider: &dyn Provider,
    rack: &RackSpec,
    policy: &RackScalingPolicy,
) -> Result<Option<RackRecommendations>> {
    warn_on_conflicting_priorities(policy);

    let mut best_priority: Option<i32> = None;
    let mut members = rack.members;
    let mut resources = rack.resources.clone();

    for rule in &policy.rules {
        if best_priority.is_some_and(|best| rule.priority >= best) {
            continue;
        }

        let satisfied = match rule.for_ {
            Some(window) => {
                provider
                    .ranged_query(&rule.expression, window.0, rule.step.map(|step| step.0))
                    .await
            }
            None => provider.query(&rule.expression).await,
        }
        .map_err(|error| Error::from(error).for_rule(&rule.name))?;

        if !satisfied {
            continue;
        }

        match rule.mode {
            ScalingMode::Horizontal => {
                let (min, max) = match &policy.member_policy {
                    Some(member_policy) => (member_policy.min_allowed, member_policy.max_allowed),
                    None => (None, None),
                };
                members = calculate_members(rack.members, min, max, rule.factor);
                resources = rack.resources.clone();
            }
            ScalingMode::Vertical => {
                resources = vertical_resources(rack, policy, rule.factor)?;
                members = rack.members;
            }
        }

        best_priority = Some(rule.priority);
    }

    if best_priority.is_some() {
        Ok(Some(RackRecommendations {
            name: rack.name.clone(),
            members: Some(members),
            resources: Some(resources),
        }))
    } else {
        Ok(None)
    }
}

/// Scaled CPU resources for a vertical rule, honoring the resource policy
/// bounds and its controlledValues mode.
fn vertical_resources(
    rack: &RackSpec,
    policy: &RackScalingPolicy,
    factor: f64,
) -> Result<crate::crd::ResourceRequirements> {
    let current = rack
        .resources
        .requests
        .get(RESOURCE_CPU)
        .ok_or(Error::CpuRequestsUndefined)?;

    let resource_policy = policy.resource_policy.as_ref();
    let min = resource_policy.and_then(|p| p.min_allowed_cpu.as_ref());
    let max = resource_policy.and_then(|p| p.max_allowed_cpu.as_ref());
    let controlled_values = resource_policy
        .map(|p| p.controlled_values)
        .unwrap_or_default();

    let mut resources = rack.resources.clone();
    let mut request = calculate_cpu(current, min, max, factor)?;

    if let Some(limit) = rack.resources.limits.get(RESOURCE_CPU) {
        match controlled_values {
            ControlledValues::RequestsAndLimits => {
                let scaled_limit = calculate_cpu(limit, min, max, factor)?;
                resources.limits.insert(RESOURCE_CPU.to_string(), scaled_limit);
            }
            // limits stay untouched and cap the scaled requests
            ControlledValues::Requests => {
                request = min_quantity(request, limit.clone())?;
            }
        }
    }
    resources.requests.insert(RESOURCE_CPU.to_string(), request);

    Ok(resources)
}

fn warn_on_conflicting_priorities(policy: &RackScalingPolicy) {
    let mut seen = HashSet::new();
    for rule in &policy.rules {
        if !seen.insert(rule.priority) {
            warn!(
                rack = %policy.name,
                rule = %rule.name,
                priority = rule.priority,
                "conflicting rule priorities, first declared rule wins"
            );
        }
    }
}
