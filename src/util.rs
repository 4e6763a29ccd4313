//! Shared helpers: recommendation checksums and quantity bounding

use serde::Serialize;
use sha2::{Digest, Sha512_224};

use crate::quantity::{Quantity, QuantityError};

/// Hex-encoded SHA-512/224 digest of the serialized value.
///
/// Serialization goes through `serde_json`: struct fields keep their
/// declaration order and resource maps are `BTreeMap`s, so the digest is
/// stable across re-marshals of the same logical recommendation. The
/// Updater relies on that stability for its idempotence gate.
pub fn checksum<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    Ok(hex::encode(Sha512_224::digest(&bytes)))
}

/// The smaller of two quantities by semantic comparison.
pub fn min_quantity(x: Quantity, y: Quantity) -> Result<Quantity, QuantityError> {
    Ok(if x.cmp_value(&y)?.is_lt() { x } else { y })
}

/// The larger of two quantities by semantic comparison.
pub fn max_quantity(x: Quantity, y: Quantity) -> Result<Quantity, QuantityError> {
    Ok(if x.cmp_value(&y)?.is_gt() { x } else { y })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crd::{ClusterRecommendations, DatacenterRecommendations, RackRecommendations};

    fn recommendations(members: i32) -> ClusterRecommendations {
        ClusterRecommendations {
            datacenter_recommendations: vec![DatacenterRecommendations {
                name: "dc1".to_string(),
                rack_recommendations: vec![RackRecommendations {
                    name: "rack1".to_string(),
                    members: Some(members),
                    resources: None,
                }],
            }],
        }
    }

    #[test]
    fn checksum_is_stable() {
        let a = checksum(&recommendations(3)).unwrap();
        let b = checksum(&recommendations(3)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn checksum_distinguishes_values() {
        let a = checksum(&recommendations(3)).unwrap();
        let b = checksum(&recommendations(4)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn checksum_is_hex_sha512_224() {
        let digest = checksum(&recommendations(3)).unwrap();
        assert_eq!(digest.len(), 56);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn quantity_bounds() {
        let min = min_quantity(Quantity("500m".into()), Quantity("1".into())).unwrap();
        assert_eq!(min.0, "500m");
        let max = max_quantity(Quantity("500m".into()), Quantity("1".into())).unwrap();
        assert_eq!(max.0, "1");
    }
}
