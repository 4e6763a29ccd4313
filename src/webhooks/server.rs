//! Webhook HTTP server handlers
//!
//! Implements the ValidatingAdmissionWebhook HTTP endpoint for
//! ScyllaCluster objects.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use kube::api::ListParams;
use kube::{Api, Client};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::validator::validate_cluster_changes;
use crate::crd::{ScyllaCluster, ScyllaClusterAutoscaler};

/// Kubernetes AdmissionReview request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    pub api_version: String,
    pub kind: String,
    pub request: Option<AdmissionRequest>,
}

/// AdmissionRequest contains the details of the admission request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    pub operation: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub object: Option<serde_json::Value>,
    pub old_object: Option<serde_json::Value>,
    pub user_info: Option<UserInfo>,
}

/// Identity of the client submitting the request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub username: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// AdmissionReview response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewResponse {
    pub api_version: String,
    pub kind: String,
    pub response: AdmissionResponse,
}

/// AdmissionResponse contains the result
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionStatus {
    pub code: i32,
    pub message: String,
}

/// Identity the Updater runs under; requests from it bypass validation
pub const DEFAULT_UPDATER_USERNAME: &str =
    "system:serviceaccount:scylla-autoscaler-system:scylla-autoscaler-updater";

/// Admission-controller settings
#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub updater_service_account_username: String,
    pub scaled_resources: Vec<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            updater_service_account_username: DEFAULT_UPDATER_USERNAME.to_string(),
            scaled_resources: vec!["cpu".to_string()],
        }
    }
}

/// Shared state for webhook handlers
pub(crate) struct WebhookState {
    pub client: Client,
    pub config: WebhookConfig,
}

/// Webhook path for the ScyllaCluster validating webhook
pub const VALIDATE_PATH: &str = "/validate-scylla-scylladb-com-v1-scyllacluster";

/// Create the webhook router
pub(crate) fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(VALIDATE_PATH, post(validate_scylla_cluster))
        .with_state(state)
}

/// Validate ScyllaCluster admission webhook handler
pub(crate) async fn validate_scylla_cluster(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview>,
) -> impl IntoResponse {
    let request = match review.request {
        Some(req) => req,
        None => {
            error!("Admission review missing request");
            return (
                StatusCode::BAD_REQUEST,
                Json(create_response(
                    "",
                    false,
                    400,
                    "Missing request in AdmissionReview",
                )),
            );
        }
    };

    let uid = request.uid.clone();
    info!(
        uid = %uid,
        operation = %request.operation,
        namespace = ?request.namespace,
        name = ?request.name,
        "Processing admission request"
    );

    // The Updater is the only trusted mutator of controlled fields
    if is_trusted_identity(&request, &state.config) {
        debug!(uid = %uid, "Skipping validation for updater request");
        return (StatusCode::OK, Json(create_response(&uid, true, 0, "")));
    }

    // Controlled fields are guarded against changes only; CREATE and
    // DELETE carry nothing to compare
    let (Some(object), Some(old_object)) = (request.object, request.old_object) else {
        return (StatusCode::OK, Json(create_response(&uid, true, 0, "")));
    };

    let cluster: ScyllaCluster = match serde_json::from_value(object) {
        Ok(cluster) => cluster,
        Err(e) => {
            error!(uid = %uid, error = %e, "Failed to decode ScyllaCluster");
            return (
                StatusCode::OK,
                Json(create_response(
                    &uid,
                    false,
                    400,
                    &format!("Failed to decode object: {e}"),
                )),
            );
        }
    };
    let old_cluster: ScyllaCluster = match serde_json::from_value(old_object) {
        Ok(cluster) => cluster,
        Err(e) => {
            error!(uid = %uid, error = %e, "Failed to decode previous ScyllaCluster");
            return (
                StatusCode::OK,
                Json(create_response(
                    &uid,
                    false,
                    400,
                    &format!("Failed to decode old object: {e}"),
                )),
            );
        }
    };

    let autoscalers: Api<ScyllaClusterAutoscaler> = Api::all(state.client.clone());
    let list = match autoscalers.list(&ListParams::default()).await {
        Ok(list) => list,
        Err(e) => {
            error!(uid = %uid, error = %e, "Failed to list autoscalers");
            return (
                StatusCode::OK,
                Json(create_response(
                    &uid,
                    false,
                    500,
                    &format!("Failed to list autoscalers: {e}"),
                )),
            );
        }
    };
    debug!(uid = %uid, autoscalers = list.items.len(), "Autoscalers fetched");

    let result = validate_cluster_changes(
        &cluster,
        &old_cluster,
        &list.items,
        &state.config.scaled_resources,
    );

    if result.allowed {
        info!(uid = %uid, "Admission request allowed");
        (StatusCode::OK, Json(create_response(&uid, true, 0, "")))
    } else {
        let message = result
            .message
            .unwrap_or_else(|| "Validation failed".to_string());
        warn!(uid = %uid, %message, "Admission request denied");
        (
            StatusCode::OK,
            Json(create_response(&uid, false, 403, &message)),
        )
    }
}

/// Whether the request comes from the Updater's service account.
pub fn is_trusted_identity(request: &AdmissionRequest, config: &WebhookConfig) -> bool {
    request
        .user_info
        .as_ref()
        .and_then(|u| u.username.as_deref())
        .is_some_and(|username| username == config.updater_service_account_username)
}

/// Create an AdmissionReview response
fn create_response(uid: &str, allowed: bool, code: i32, message: &str) -> AdmissionReviewResponse {
    AdmissionReviewResponse {
        api_version: "admission.k8s.io/v1".to_string(),
        kind: "AdmissionReview".to_string(),
        response: AdmissionResponse {
            uid: uid.to_string(),
            allowed,
            status: if allowed {
                None
            } else {
                Some(AdmissionStatus {
                    code,
                    message: message.to_string(),
                })
            },
        },
    }
}

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 8443;

/// Run the webhook server with TLS
///
/// Binds to 0.0.0.0:8443 and serves the validation endpoint. TLS
/// certificates are loaded from the paths specified.
pub async fn run_webhook_server(
    client: Client,
    config: WebhookConfig,
    cert_path: &str,
    key_path: &str,
) -> Result<(), WebhookError> {
    use axum_server::tls_rustls::RustlsConfig;
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let state = Arc::new(WebhookState { client, config });
    let app = create_webhook_router(state);

    let tls = RustlsConfig::from_pem_file(PathBuf::from(cert_path), PathBuf::from(key_path))
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], WEBHOOK_PORT));
    info!("Webhook server listening on {} with TLS", addr);

    axum_server::bind_rustls(addr, tls)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}

/// Errors that can occur when running the webhook server
#[derive(Debug)]
pub enum WebhookError {
    /// TLS configuration error
    TlsConfig(String),
    /// Server error
    Server(String),
}

impl std::fmt::Display for WebhookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookError::TlsConfig(msg) => write!(f, "TLS configuration error: {}", msg),
            WebhookError::Server(msg) => write!(f, "Webhook server error: {}", msg),
        }
    }
}

impl std::error::Error for WebhookError {}
