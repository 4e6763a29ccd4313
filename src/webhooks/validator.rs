//! Controlled-field validation
//!
//! While an Auto-mode autoscaler targets a cluster, its member counts,
//! storage capacity and the scaled resource entries belong to the Updater.
//! Any other client changing them gets denied.

use crate::crd::{ScyllaCluster, ScyllaClusterAutoscaler, UpdateMode, find_rack};
use crate::quantity::Quantity;

/// Result of validating a cluster change
#[derive(Debug)]
pub struct ValidationResult {
    pub allowed: bool,
    pub message: Option<String>,
}

impl ValidationResult {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            message: None,
        }
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            message: Some(message.into()),
        }
    }
}

/// Deny the change when any autoscaler in Auto mode targets this cluster
/// and a rack present in both revisions changed a controlled field.
///
/// Racks appearing only in the new object or only in the old one never
/// trigger a denial; adding and removing racks stays a user operation.
pub fn validate_cluster_changes(
    cluster: &ScyllaCluster,
    old_cluster: &ScyllaCluster,
    autoscalers: &[ScyllaClusterAutoscaler],
    scaled_resources: &[String],
) -> ValidationResult {
    for sca in autoscalers {
        let target = &sca.spec.target_ref;
        if Some(target.name.as_str()) != cluster.metadata.name.as_deref()
            || Some(target.namespace.as_str()) != cluster.metadata.namespace.as_deref()
        {
            continue;
        }
        if sca.update_mode() == UpdateMode::Off {
            continue;
        }

        for rack in &cluster.spec.datacenter.racks {
            let Some(old_rack) = find_rack(&rack.name, &old_cluster.spec.datacenter.racks) else {
                continue;
            };

            if rack.members != old_rack.members {
                return ValidationResult::denied(
                    "changing members is forbidden while the cluster is administered by the autoscaler",
                );
            }

            if rack.storage.capacity != old_rack.storage.capacity {
                return ValidationResult::denied(
                    "changing storage capacity is forbidden while the cluster is administered by the autoscaler",
                );
            }

            for resource in scaled_resources {
                if !quantities_equal(
                    rack.resources.requests.get(resource),
                    old_rack.resources.requests.get(resource),
                ) {
                    return ValidationResult::denied(format!(
                        "changing requests.{resource} is forbidden while the cluster is administered by the autoscaler"
                    ));
                }
                if !quantities_equal(
                    rack.resources.limits.get(resource),
                    old_rack.resources.limits.get(resource),
                ) {
                    return ValidationResult::denied(format!(
                        "changing limits.{resource} is forbidden while the cluster is administered by the autoscaler"
                    ));
                }
            }
        }
    }

    ValidationResult::allowed()
}

/// Semantic comparison with absent entries reading as zero.
fn quantities_equal(a: Option<&Quantity>, b: Option<&Quantity>) -> bool {
    let zero = Quantity::default();
    a.unwrap_or(&zero) == b.unwrap_or(&zero)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crd::{
        DatacenterSpec, RackSpec, ResourceRequirements, ScyllaClusterAutoscalerSpec,
        ScyllaClusterSpec, StorageSpec, TargetRef, UpdatePolicy,
    };
    use kube::core::ObjectMeta;

    fn rack(members: i32, cpu_request: Option<&str>, cpu_limit: Option<&str>) -> RackSpec {
        let mut resources = ResourceRequirements::default();
        if let Some(cpu) = cpu_request {
            resources.requests.insert("cpu".to_string(), Quantity(cpu.into()));
        }
        if let Some(cpu) = cpu_limit {
            resources.limits.insert("cpu".to_string(), Quantity(cpu.into()));
        }
        RackSpec {
            name: "rack1".to_string(),
            members,
            storage: StorageSpec {
                capacity: Quantity("100Gi".into()),
            },
            resources,
        }
    }

    fn cluster(racks: Vec<RackSpec>) -> ScyllaCluster {
        let mut cluster = ScyllaCluster::new(
            "prod",
            ScyllaClusterSpec {
                datacenter: DatacenterSpec {
                    name: "dc1".to_string(),
                    racks,
                },
            },
        );
        cluster.metadata = ObjectMeta {
            name: Some("prod".to_string()),
            namespace: Some("scylla".to_string()),
            ..Default::default()
        };
        cluster
    }

    fn autoscaler(mode: UpdateMode, target_name: &str) -> ScyllaClusterAutoscaler {
        ScyllaClusterAutoscaler::new(
            "sca",
            ScyllaClusterAutoscalerSpec {
                target_ref: TargetRef {
                    name: target_name.to_string(),
                    namespace: "scylla".to_string(),
                },
                update_policy: Some(UpdatePolicy {
                    update_mode: mode,
                    recommendation_expiration_time: None,
                    update_cooldown: None,
                }),
                scaling_policy: None,
            },
        )
    }

    fn cpu_resources() -> Vec<String> {
        vec!["cpu".to_string()]
    }

    #[test]
    fn member_change_is_denied() {
        let old = cluster(vec![rack(3, None, None)]);
        let new = cluster(vec![rack(4, None, None)]);
        let scas = [autoscaler(UpdateMode::Auto, "prod")];

        let result = validate_cluster_changes(&new, &old, &scas, &cpu_resources());
        assert!(!result.allowed);
        assert!(result.message.unwrap().contains("members"));
    }

    #[test]
    fn unrelated_autoscaler_does_not_guard() {
        let old = cluster(vec![rack(3, None, None)]);
        let new = cluster(vec![rack(4, None, None)]);
        let scas = [autoscaler(UpdateMode::Auto, "other-cluster")];

        assert!(validate_cluster_changes(&new, &old, &scas, &cpu_resources()).allowed);
    }

    #[test]
    fn off_mode_autoscaler_does_not_guard() {
        let old = cluster(vec![rack(3, None, None)]);
        let new = cluster(vec![rack(4, None, None)]);
        let scas = [autoscaler(UpdateMode::Off, "prod")];

        assert!(validate_cluster_changes(&new, &old, &scas, &cpu_resources()).allowed);
    }

    #[test]
    fn any_matching_autoscaler_denies() {
        let old = cluster(vec![rack(3, None, None)]);
        let new = cluster(vec![rack(4, None, None)]);
        let scas = [
            autoscaler(UpdateMode::Off, "prod"),
            autoscaler(UpdateMode::Auto, "prod"),
        ];

        assert!(!validate_cluster_changes(&new, &old, &scas, &cpu_resources()).allowed);
    }

    #[test]
    fn unchanged_cluster_is_allowed() {
        let old = cluster(vec![rack(3, Some("2"), Some("4"))]);
        let new = cluster(vec![rack(3, Some("2"), Some("4"))]);
        let scas = [autoscaler(UpdateMode::Auto, "prod")];

        assert!(validate_cluster_changes(&new, &old, &scas, &cpu_resources()).allowed);
    }

    #[test]
    fn storage_capacity_change_is_denied() {
        let old = cluster(vec![rack(3, None, None)]);
        let mut changed = rack(3, None, None);
        changed.storage.capacity = Quantity("200Gi".into());
        let new = cluster(vec![changed]);
        let scas = [autoscaler(UpdateMode::Auto, "prod")];

        let result = validate_cluster_changes(&new, &old, &scas, &cpu_resources());
        assert!(!result.allowed);
        assert!(result.message.unwrap().contains("storage"));
    }

    #[test]
    fn cpu_request_change_is_denied() {
        let old = cluster(vec![rack(3, Some("2"), None)]);
        let new = cluster(vec![rack(3, Some("3"), None)]);
        let scas = [autoscaler(UpdateMode::Auto, "prod")];

        let result = validate_cluster_changes(&new, &old, &scas, &cpu_resources());
        assert!(!result.allowed);
        assert!(result.message.unwrap().contains("requests.cpu"));
    }

    #[test]
    fn cpu_limit_change_is_denied() {
        let old = cluster(vec![rack(3, Some("2"), Some("4"))]);
        let new = cluster(vec![rack(3, Some("2"), Some("8"))]);
        let scas = [autoscaler(UpdateMode::Auto, "prod")];

        let result = validate_cluster_changes(&new, &old, &scas, &cpu_resources());
        assert!(!result.allowed);
        assert!(result.message.unwrap().contains("limits.cpu"));
    }

    #[test]
    fn equivalent_quantity_spellings_are_allowed() {
        let old = cluster(vec![rack(3, Some("1"), None)]);
        let new = cluster(vec![rack(3, Some("1000m"), None)]);
        let scas = [autoscaler(UpdateMode::Auto, "prod")];

        assert!(validate_cluster_changes(&new, &old, &scas, &cpu_resources()).allowed);
    }

    #[test]
    fn uncontrolled_resources_are_not_guarded() {
        let mut old_rack = rack(3, None, None);
        old_rack.resources.requests.insert("memory".to_string(), Quantity("8Gi".into()));
        let mut new_rack = rack(3, None, None);
        new_rack.resources.requests.insert("memory".to_string(), Quantity("16Gi".into()));
        let old = cluster(vec![old_rack]);
        let new = cluster(vec![new_rack]);
        let scas = [autoscaler(UpdateMode::Auto, "prod")];

        assert!(validate_cluster_changes(&new, &old, &scas, &cpu_resources()).allowed);
    }

    #[test]
    fn added_and_removed_racks_are_allowed() {
        let old = cluster(vec![rack(3, None, None)]);
        let mut added = rack(5, None, None);
        added.name = "rack2".to_string();
        let new = cluster(vec![rack(3, None, None), added]);
        let scas = [autoscaler(UpdateMode::Auto, "prod")];

        assert!(validate_cluster_changes(&new, &old, &scas, &cpu_resources()).allowed);

        // removal of rack1 entirely
        let new = cluster(vec![]);
        assert!(validate_cluster_changes(&new, &old, &scas, &cpu_resources()).allowed);
    }

    #[test]
    fn no_autoscalers_allows_everything() {
        let old = cluster(vec![rack(3, None, None)]);
        let new = cluster(vec![rack(30, None, None)]);
        assert!(validate_cluster_changes(&new, &old, &[], &cpu_resources()).allowed);
    }
}
