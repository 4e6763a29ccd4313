//! Admission webhooks for ScyllaCluster validation
//!
//! Implements the ValidatingAdmissionWebhook that keeps
//! autoscaler-controlled fields (members, storage capacity, scaled
//! resources) out of reach of everyone but the Updater.

mod server;
mod validator;

pub use server::{
    AdmissionRequest, AdmissionReview, DEFAULT_UPDATER_USERNAME, UserInfo, VALIDATE_PATH,
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookConfig, WebhookError,
    is_trusted_identity, run_webhook_server,
};
pub use validator::{ValidationResult, validate_cluster_changes};
