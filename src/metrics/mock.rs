//! Canned metrics provider for tests

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use super::{MetricsError, Provider};

/// Provider returning scripted results per expression; unknown expressions
/// fail the query.
#[derive(Default)]
pub struct MockProvider {
    results: HashMap<String, bool>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, expression: &str, result: bool) -> Self {
        self.results.insert(expression.to_string(), result);
        self
    }

    fn lookup(&self, expression: &str) -> Result<bool, MetricsError> {
        self.results
            .get(expression)
            .copied()
            .ok_or_else(|| MetricsError::Api(format!("unknown expression {expression:?}")))
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn query(&self, expression: &str) -> Result<bool, MetricsError> {
        self.lookup(expression)
    }

    async fn ranged_query(
        &self,
        expression: &str,
        _duration: Duration,
        _step: Option<Duration>,
    ) -> Result<bool, MetricsError> {
        self.lookup(expression)
    }
}
