//! Human-readable durations in CRD fields
//!
//! Durations in the autoscaler API (`for`, `step`, `updateCooldown`,
//! `recommendationExpirationTime`) serialize as humantime strings such as
//! `"30s"`, `"5m"` or `"1h 30m"`.

use std::fmt;
use std::time::Duration;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ApiDuration(pub Duration);

impl From<Duration> for ApiDuration {
    fn from(d: Duration) -> Self {
        ApiDuration(d)
    }
}

impl fmt::Display for ApiDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        humantime::format_duration(self.0).fmt(f)
    }
}

impl Serialize for ApiDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(self.0))
    }
}

impl<'de> Deserialize<'de> for ApiDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DurationVisitor;

        impl Visitor<'_> for DurationVisitor {
            type Value = ApiDuration;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a duration string such as \"30s\" or \"5m\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                humantime::parse_duration(v)
                    .map(ApiDuration)
                    .map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(DurationVisitor)
    }
}

impl schemars::JsonSchema for ApiDuration {
    fn schema_name() -> String {
        "Duration".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        String::json_schema(gen)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let d = ApiDuration(Duration::from_secs(90));
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, "\"1m 30s\"");
        let back: ApiDuration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn parses_compound_durations() {
        let d: ApiDuration = serde_json::from_str("\"20m\"").unwrap();
        assert_eq!(d.0, Duration::from_secs(20 * 60));
        let d: ApiDuration = serde_json::from_str("\"1h 5s\"").unwrap();
        assert_eq!(d.0, Duration::from_secs(3605));
    }

    #[test]
    fn rejects_bare_numbers() {
        assert!(serde_json::from_str::<ApiDuration>("30").is_err());
    }
}
