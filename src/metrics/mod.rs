//! Metric query capability used by the Recommender
//!
//! A [`Provider`] answers boolean questions about metric expressions: an
//! instant query is truthy when the first sample of the result vector is
//! non-zero, a ranged query when every sample of the first series in the
//! result matrix is non-zero. [`PrometheusProvider`] is the production
//! implementation; tests inject [`mock::MockProvider`].

pub mod mock;
mod prometheus;

pub use prometheus::PrometheusProvider;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Hard cap on samples per ranged query; the step is widened to stay under
/// it. Matches the Prometheus server-side resolution limit.
pub const MAX_SAMPLES_PER_RANGE: u64 = 11_000;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("metrics request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("metrics query rejected: {0}")]
    Api(String),

    #[error("expected {expected} result, got {got}")]
    UnexpectedResultType {
        expected: &'static str,
        got: &'static str,
    },

    #[error("empty query result")]
    EmptyResult,

    #[error("empty series in query result")]
    EmptySeries,

    #[error("unparseable sample value {0:?}")]
    BadSample(String),

    #[error("metrics service discovery failed: {0}")]
    Discovery(#[source] kube::Error),

    #[error("no metrics service matches the configured selector")]
    NoMetricsService,
}

/// Boolean evaluation of metric expressions, instant or over a window.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Evaluate `expression` at the current instant.
    async fn query(&self, expression: &str) -> Result<bool, MetricsError>;

    /// Evaluate `expression` over the trailing `duration`, sampling every
    /// `step` (provider default when `None`). Truthy only if every sample
    /// is non-zero.
    async fn ranged_query(
        &self,
        expression: &str,
        duration: Duration,
        step: Option<Duration>,
    ) -> Result<bool, MetricsError>;
}
