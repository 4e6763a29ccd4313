//! Prometheus-backed metrics provider
//!
//! Speaks the Prometheus HTTP API (`/api/v1/query`, `/api/v1/query_range`).
//! The server is found by listing Services with a configured label
//! selector and taking the first match; its cluster-internal DNS name
//! becomes the base URL.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::ListParams;
use kube::{Api, Client};
use serde::Deserialize;
use tracing::debug;

use super::{MetricsError, Provider, MAX_SAMPLES_PER_RANGE};

/// Port the metrics service is assumed to listen on.
const METRICS_PORT: u16 = 9090;

pub struct PrometheusProvider {
    client: reqwest::Client,
    base_url: String,
    default_step: Duration,
}

impl PrometheusProvider {
    /// Provider against an explicit base URL.
    pub fn new(
        base_url: impl Into<String>,
        default_step: Duration,
        query_timeout: Duration,
    ) -> Result<Self, MetricsError> {
        let client = reqwest::Client::builder().timeout(query_timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            default_step,
        })
    }

    /// Provider against the first Service matching `selector`.
    pub async fn discover(
        kube_client: Client,
        selector: &BTreeMap<String, String>,
        default_step: Duration,
        query_timeout: Duration,
    ) -> Result<Self, MetricsError> {
        let services: Api<Service> = Api::all(kube_client);
        let labels = selector
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        let list = services
            .list(&ListParams::default().labels(&labels))
            .await
            .map_err(MetricsError::Discovery)?;

        let svc = list
            .items
            .into_iter()
            .next()
            .ok_or(MetricsError::NoMetricsService)?;
        let name = svc.metadata.name.unwrap_or_default();
        let namespace = svc.metadata.namespace.unwrap_or_default();
        let base_url = format!("http://{name}.{namespace}.svc.cluster.local:{METRICS_PORT}");
        debug!(%base_url, "discovered metrics service");

        Self::new(base_url, default_step, query_timeout)
    }

    /// Widen the step so `duration / step` stays under the sample cap.
    fn effective_step(&self, duration: Duration, step: Option<Duration>) -> Duration {
        let step = step.unwrap_or(self.default_step).max(Duration::from_secs(1));
        if duration.as_secs() / step.as_secs() > MAX_SAMPLES_PER_RANGE {
            Duration::from_secs(duration.as_secs() / MAX_SAMPLES_PER_RANGE + 1)
        } else {
            step
        }
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<QueryData, MetricsError> {
        let url = format!("{}{path}", self.base_url);
        let response = self.client.get(&url).query(params).send().await?;
        let http_error = response.error_for_status_ref().err();
        let body: ApiResponse = match response.json().await {
            Ok(body) => body,
            // no JSON error envelope to report, fall back to the HTTP status
            Err(json_error) => return Err(http_error.unwrap_or(json_error).into()),
        };

        if body.status != "success" {
            return Err(MetricsError::Api(
                body.error.unwrap_or_else(|| body.status.clone()),
            ));
        }
        body.data
            .ok_or_else(|| MetricsError::Api("response carries no data".to_string()))
    }
}

#[async_trait]
impl Provider for PrometheusProvider {
    async fn query(&self, expression: &str) -> Result<bool, MetricsError> {
        let now = unix_now();
        let data = self
            .get(
                "/api/v1/query",
                &[
                    ("query", expression.to_string()),
                    ("time", format!("{}", now.as_secs_f64())),
                ],
            )
            .await?;

        match data {
            QueryData::Vector(samples) => {
                let first = samples.first().ok_or(MetricsError::EmptyResult)?;
                first.value.is_nonzero()
            }
            other => Err(MetricsError::UnexpectedResultType {
                expected: "vector",
                got: other.kind(),
            }),
        }
    }

    async fn ranged_query(
        &self,
        expression: &str,
        duration: Duration,
        step: Option<Duration>,
    ) -> Result<bool, MetricsError> {
        let step = self.effective_step(duration, step);
        let end = unix_now();
        let start = end.saturating_sub(duration);

        let data = self
            .get(
                "/api/v1/query_range",
                &[
                    ("query", expression.to_string()),
                    ("start", format!("{}", start.as_secs_f64())),
                    ("end", format!("{}", end.as_secs_f64())),
                    ("step", format!("{}", step.as_secs())),
                ],
            )
            .await?;

        match data {
            QueryData::Matrix(series) => {
                let first = series.first().ok_or(MetricsError::EmptyResult)?;
                if first.values.is_empty() {
                    return Err(MetricsError::EmptySeries);
                }
                for sample in &first.values {
                    if !sample.is_nonzero()? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            other => Err(MetricsError::UnexpectedResultType {
                expected: "matrix",
                got: other.kind(),
            }),
        }
    }
}

fn unix_now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

#[derive(Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum QueryData {
    Vector(Vec<VectorSample>),
    Matrix(Vec<MatrixSeries>),
    Scalar(serde_json::Value),
    #[serde(rename = "string")]
    Str(serde_json::Value),
}

impl QueryData {
    fn kind(&self) -> &'static str {
        match self {
            QueryData::Vector(_) => "vector",
            QueryData::Matrix(_) => "matrix",
            QueryData::Scalar(_) => "scalar",
            QueryData::Str(_) => "string",
        }
    }
}

#[derive(Deserialize)]
struct VectorSample {
    value: Sample,
}

#[derive(Deserialize)]
struct MatrixSeries {
    values: Vec<Sample>,
}

/// A `[timestamp, "value"]` pair as the Prometheus API encodes samples.
#[derive(Deserialize)]
struct Sample(#[allow(dead_code)] f64, String);

impl Sample {
    fn is_nonzero(&self) -> Result<bool, MetricsError> {
        let value: f64 = self
            .1
            .parse()
            .map_err(|_| MetricsError::BadSample(self.1.clone()))?;
        Ok(value != 0.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn provider(url: &str) -> PrometheusProvider {
        PrometheusProvider::new(url, Duration::from_secs(60), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn query_true_on_nonzero_first_sample() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Regex("query=up".to_string()))
            .with_body(
                r#"{"status":"success","data":{"resultType":"vector",
                   "result":[{"metric":{},"value":[1715000000.0,"1"]},
                             {"metric":{},"value":[1715000000.0,"0"]}]}}"#,
            )
            .create_async()
            .await;

        assert!(provider(&server.url()).query("up").await.unwrap());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn query_false_on_zero_sample() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
                .match_query(Matcher::Any)
            .with_body(
                r#"{"status":"success","data":{"resultType":"vector",
                   "result":[{"metric":{},"value":[1715000000.0,"0"]}]}}"#,
            )
            .create_async()
            .await;

        assert!(!provider(&server.url()).query("up").await.unwrap());
    }

    #[tokio::test]
    async fn query_rejects_empty_vector() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
                .match_query(Matcher::Any)
            .with_body(r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#)
            .create_async()
            .await;

        let err = provider(&server.url()).query("up").await.unwrap_err();
        assert!(matches!(err, MetricsError::EmptyResult));
    }

    #[tokio::test]
    async fn query_rejects_matrix_result() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
                .match_query(Matcher::Any)
            .with_body(r#"{"status":"success","data":{"resultType":"matrix","result":[]}}"#)
            .create_async()
            .await;

        let err = provider(&server.url()).query("up").await.unwrap_err();
        assert!(matches!(
            err,
            MetricsError::UnexpectedResultType {
                expected: "vector",
                got: "matrix"
            }
        ));
    }

    #[tokio::test]
    async fn query_surfaces_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
                .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#)
            .create_async()
            .await;

        let err = provider(&server.url()).query("up{").await.unwrap_err();
        assert!(matches!(err, MetricsError::Api(msg) if msg == "parse error"));
    }

    #[tokio::test]
    async fn ranged_query_true_only_when_every_sample_nonzero() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query_range")
                .match_query(Matcher::Any)
            .with_body(
                r#"{"status":"success","data":{"resultType":"matrix",
                   "result":[{"metric":{},"values":[[1.0,"1"],[2.0,"2"],[3.0,"1"]]}]}}"#,
            )
            .create_async()
            .await;

        let truthy = provider(&server.url())
            .ranged_query("load", Duration::from_secs(300), None)
            .await
            .unwrap();
        assert!(truthy);
    }

    #[tokio::test]
    async fn ranged_query_false_when_any_sample_zero() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query_range")
                .match_query(Matcher::Any)
            .with_body(
                r#"{"status":"success","data":{"resultType":"matrix",
                   "result":[{"metric":{},"values":[[1.0,"1"],[2.0,"0"],[3.0,"1"]]}]}}"#,
            )
            .create_async()
            .await;

        let truthy = provider(&server.url())
            .ranged_query("load", Duration::from_secs(300), None)
            .await
            .unwrap();
        assert!(!truthy);
    }

    #[tokio::test]
    async fn ranged_query_rejects_empty_series() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query_range")
                .match_query(Matcher::Any)
            .with_body(
                r#"{"status":"success","data":{"resultType":"matrix",
                   "result":[{"metric":{},"values":[]}]}}"#,
            )
            .create_async()
            .await;

        let err = provider(&server.url())
            .ranged_query("load", Duration::from_secs(300), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MetricsError::EmptySeries));
    }

    #[tokio::test]
    async fn ranged_query_rejects_vector_result() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query_range")
                .match_query(Matcher::Any)
            .with_body(r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#)
            .create_async()
            .await;

        let err = provider(&server.url())
            .ranged_query("load", Duration::from_secs(300), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MetricsError::UnexpectedResultType {
                expected: "matrix",
                ..
            }
        ));
    }

    #[test]
    fn step_defaults_and_caps_sample_count() {
        let p = provider("http://unused");

        // explicit step passes through
        let step = p.effective_step(Duration::from_secs(600), Some(Duration::from_secs(30)));
        assert_eq!(step, Duration::from_secs(30));

        // default applies when unset
        let step = p.effective_step(Duration::from_secs(600), None);
        assert_eq!(step, Duration::from_secs(60));

        // a window of 30000s at 1s step would exceed 11000 samples
        let step = p.effective_step(Duration::from_secs(30_000), Some(Duration::from_secs(1)));
        assert_eq!(step, Duration::from_secs(30_000 / MAX_SAMPLES_PER_RANGE + 1));

        // sub-second steps are clamped before the division
        let step = p.effective_step(Duration::from_secs(60), Some(Duration::from_millis(100)));
        assert_eq!(step, Duration::from_secs(1));
    }
}
