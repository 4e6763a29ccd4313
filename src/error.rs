//! Error types shared by the autoscaler components

use thiserror::Error;

use crate::metrics::MetricsError;
use crate::quantity::QuantityError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error(transparent)]
    Quantity(#[from] QuantityError),

    #[error("datacenter {0:?} not found")]
    DatacenterNotFound(String),

    #[error("rack {0:?} not found")]
    RackNotFound(String),

    #[error("rule {name:?}: {source}")]
    Rule {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("cpu requests undefined")]
    CpuRequestsUndefined,
}

impl Error {
    /// Attach the name of the scaling rule that failed.
    pub fn for_rule(self, name: &str) -> Self {
        Error::Rule {
            name: name.to_string(),
            source: Box::new(self),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
