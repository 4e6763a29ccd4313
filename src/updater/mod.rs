//! Updater: applying recommendations to target clusters
//!
//! Each pass considers only autoscalers in Auto mode whose last
//! Recommender pass succeeded, then walks four gates before touching the
//! target: recommendation expiration, update cooldown, checksum
//! idempotence and target readiness. The checksum of the applied
//! recommendations travels as a label on the target cluster, so a stale
//! read can never apply the same recommendation twice.

use chrono::{DateTime, Utc};
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info};

use crate::crd::{
    CHECKSUM_LABEL, ClusterRecommendations, DatacenterRecommendations, RackRecommendations,
    RackSpec, RESOURCE_CPU, ScyllaCluster, ScyllaClusterAutoscaler, UpdateMode, UpdateStatus,
    is_cluster_ready,
};
use crate::error::Result;
use crate::util::checksum;

/// Field manager for status patches
const FIELD_MANAGER: &str = "scylla-autoscaler-updater";

pub struct Updater {
    client: Client,
}

impl Updater {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// One apply pass over all eligible autoscalers. The first store error
    /// aborts the pass; the caller retries on the next tick.
    pub async fn run_once(&self) -> Result<()> {
        let autoscalers: Api<ScyllaClusterAutoscaler> = Api::all(self.client.clone());
        let list = autoscalers.list(&ListParams::default()).await?;
        let now = Utc::now();

        for sca in list.items.iter().filter(|sca| is_eligible(sca)) {
            let name = sca.name_any();
            let namespace = sca.namespace().unwrap_or_default();

            if recommendation_expired(sca, now) {
                info!(%namespace, %name, "skipping update: recommendation expired");
                continue;
            }
            if !update_cooldown_exceeded(sca, now) {
                info!(%namespace, %name, "skipping update: update cooldown not exceeded");
                continue;
            }

            let target = &sca.spec.target_ref;
            let clusters: Api<ScyllaCluster> =
                Api::namespaced(self.client.clone(), &target.namespace);
            let mut cluster = clusters.get(&target.name).await?;

            if equal_checksums(&cluster, sca)? {
                info!(%namespace, %name, "skipping update: recommendations already applied");
                continue;
            }
            if !is_cluster_ready(&cluster) {
                info!(%namespace, %name, "skipping update: target cluster not ready");
                continue;
            }

            let Some(recommendations) = sca.status.as_ref().and_then(|s| s.recommendations.as_ref())
            else {
                debug!(%namespace, %name, "no recommendations for target cluster");
                continue;
            };
            let datacenter_name = cluster.spec.datacenter.name.clone();
            let Some(rack_recommendations) =
                datacenter_recommendations(recommendations, &datacenter_name)
            else {
                debug!(%namespace, %name, datacenter = %datacenter_name, "no rack recommendations for datacenter");
                continue;
            };

            for recommendation in rack_recommendations.to_vec() {
                match find_rack_mut(&recommendation.name, &mut cluster.spec.datacenter.racks) {
                    Some(rack) => apply_rack_recommendation(rack, &recommendation),
                    None => debug!(
                        %namespace, %name,
                        rack = %recommendation.name,
                        "recommended rack not found in target datacenter"
                    ),
                }
            }

            self.update_cluster(&clusters, cluster, recommendations).await?;
            self.mark_applied(sca).await?;
        }

        Ok(())
    }

    /// Write the mutated spec together with the checksum label in one
    /// update; the resource version carried by `cluster` provides the
    /// optimistic-concurrency guard.
    async fn update_cluster(
        &self,
        api: &Api<ScyllaCluster>,
        mut cluster: ScyllaCluster,
        recommendations: &ClusterRecommendations,
    ) -> Result<()> {
        let digest = checksum(recommendations)?;
        cluster
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(CHECKSUM_LABEL.to_string(), digest);

        let name = cluster.name_any();
        api.replace(&name, &PostParams::default(), &cluster).await?;
        info!(cluster = %name, "target cluster updated");
        Ok(())
    }

    async fn mark_applied(&self, sca: &ScyllaClusterAutoscaler) -> Result<()> {
        let namespace = sca.namespace().unwrap_or_default();
        let name = sca.name_any();
        let api: Api<ScyllaClusterAutoscaler> = Api::namespaced(self.client.clone(), &namespace);

        let patch = serde_json::json!({
            "status": { "lastApplied": Utc::now() }
        });
        api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        info!(%namespace, %name, "autoscaler status updated");
        Ok(())
    }
}

/// Only Auto-mode autoscalers with a successful Recommender pass are
/// considered for updates.
fn is_eligible(sca: &ScyllaClusterAutoscaler) -> bool {
    sca.update_mode() == UpdateMode::Auto
        && sca.status.as_ref().and_then(|s| s.update_status) == Some(UpdateStatus::Ok)
}

/// A recommendation past its expiration window is never applied.
fn recommendation_expired(sca: &ScyllaClusterAutoscaler, now: DateTime<Utc>) -> bool {
    let Some(expiration) = sca
        .spec
        .update_policy
        .as_ref()
        .and_then(|p| p.recommendation_expiration_time)
    else {
        return false;
    };
    let Some(last_updated) = sca.status.as_ref().and_then(|s| s.last_updated) else {
        return false;
    };

    now.signed_duration_since(last_updated)
        .to_std()
        .is_ok_and(|elapsed| elapsed > expiration.0)
}

/// An absent cooldown or an absent lastApplied timestamp never gates.
fn update_cooldown_exceeded(sca: &ScyllaClusterAutoscaler, now: DateTime<Utc>) -> bool {
    let Some(cooldown) = sca
        .spec
        .update_policy
        .as_ref()
        .and_then(|p| p.update_cooldown)
    else {
        return true;
    };
    let Some(last_applied) = sca.status.as_ref().and_then(|s| s.last_applied) else {
        return true;
    };

    now.signed_duration_since(last_applied)
        .to_std()
        .is_ok_and(|elapsed| elapsed >= cooldown.0)
}

/// True when the checksum label on the cluster matches the digest of the
/// recommendations about to be applied.
fn equal_checksums(
    cluster: &ScyllaCluster,
    sca: &ScyllaClusterAutoscaler,
) -> Result<bool, serde_json::Error> {
    let applied = cluster
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(CHECKSUM_LABEL));
    let recommendations = sca.status.as_ref().and_then(|s| s.recommendations.as_ref());

    match (applied, recommendations) {
        (Some(applied), Some(recommendations)) => Ok(checksum(recommendations)? == *applied),
        _ => Ok(false),
    }
}

fn datacenter_recommendations<'a>(
    recommendations: &'a ClusterRecommendations,
    datacenter_name: &str,
) -> Option<&'a [RackRecommendations]> {
    recommendations
        .datacenter_recommendations
        .iter()
        .find(|dc| dc.name == datacenter_name)
        .map(|dc: &DatacenterRecommendations| dc.rack_recommendations.as_slice())
}

fn find_rack_mut<'a>(name: &str, racks: &'a mut [RackSpec]) -> Option<&'a mut RackSpec> {
    racks.iter_mut().find(|rack| rack.name == name)
}

/// Write the recommended members and CPU entries onto the rack. Memory and
/// any other resource names stay as they are.
fn apply_rack_recommendation(rack: &mut RackSpec, recommendation: &RackRecommendations) {
    if let Some(members) = recommendation.members {
        rack.members = members;
    }
    if let Some(resources) = &recommendation.resources {
        if let Some(cpu) = resources.requests.get(RESOURCE_CPU) {
            rack.resources
                .requests
                .insert(RESOURCE_CPU.to_string(), cpu.clone());
        }
        if let Some(cpu) = resources.limits.get(RESOURCE_CPU) {
            rack.resources
                .limits
                .insert(RESOURCE_CPU.to_string(), cpu.clone());
        }
    }
}
