//! Health server for Kubernetes probes and Prometheus metrics
//!
//! Provides HTTP endpoints for:
//! - `/healthz` - Liveness probe (is the process alive?)
//! - `/readyz` - Readiness probe (is the component ready to serve?)
//! - `/metrics` - Prometheus metrics

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Labels for per-component run metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct RunLabels {
    pub component: String,
}

impl prometheus_client::encoding::EncodeLabelSet for RunLabels {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("component", self.component.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics state
pub struct Metrics {
    /// Completed passes
    pub runs_total: Family<RunLabels, Counter>,
    /// Failed passes
    pub run_errors_total: Family<RunLabels, Counter>,
    /// Duration of a pass
    pub run_duration_seconds: Family<RunLabels, Histogram>,

    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let runs_total = Family::<RunLabels, Counter>::default();
        registry.register(
            "scylla_autoscaler_runs",
            "Total number of completed passes",
            runs_total.clone(),
        );

        let run_errors_total = Family::<RunLabels, Counter>::default();
        registry.register(
            "scylla_autoscaler_run_errors",
            "Total number of failed passes",
            run_errors_total.clone(),
        );

        let run_duration_seconds = Family::<RunLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.001, 2.0, 15))
        });
        registry.register(
            "scylla_autoscaler_run_duration_seconds",
            "Duration of a pass in seconds",
            run_duration_seconds.clone(),
        );

        Self {
            runs_total,
            run_errors_total,
            run_duration_seconds,
            registry,
        }
    }

    /// Record a successful pass
    pub fn record_run(&self, component: &str, duration_secs: f64) {
        let labels = RunLabels {
            component: component.to_string(),
        };
        self.runs_total.get_or_create(&labels).inc();
        self.run_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed pass
    pub fn record_error(&self, component: &str) {
        let labels = RunLabels {
            component: component.to_string(),
        };
        self.run_errors_total.get_or_create(&labels).inc();
    }

    /// Encode metrics to Prometheus text format
    ///
    /// Returns an empty string if encoding fails (should never happen with
    /// valid metrics).
    fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the component is ready (connected to the apiserver)
    pub ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
        }
    }

    /// Mark the component as ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the component is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Run the health server
pub async fn run_health_server(
    state: Arc<HealthState>,
    addr: SocketAddr,
) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Health server listening on {addr}");

    axum::serve(listener, app).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        metrics.record_run("recommender", 0.5);
        metrics.record_error("recommender");

        let encoded = metrics.encode();
        assert!(encoded.contains("scylla_autoscaler_runs"));
        assert!(encoded.contains("scylla_autoscaler_run_errors"));
        assert!(encoded.contains("scylla_autoscaler_run_duration_seconds"));
    }

    #[tokio::test]
    async fn test_health_state() {
        let state = HealthState::new();
        assert!(!state.is_ready().await);

        state.set_ready(true).await;
        assert!(state.is_ready().await);
    }
}
