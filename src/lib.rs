//! Rule-driven autoscaler for ScyllaDB clusters on Kubernetes
//!
//! Three components cooperate through the apiserver:
//!
//! - [`Recommender`] evaluates user-supplied scaling rules against a
//!   Prometheus-compatible metrics service and records per-rack member and
//!   CPU recommendations in ScyllaClusterAutoscaler status.
//! - [`Updater`] applies recommendations to the target ScyllaCluster spec
//!   behind expiration, cooldown, checksum-idempotence and readiness gates.
//! - The admission webhook ([`webhooks`]) rejects edits to
//!   autoscaler-controlled fields from anyone but the Updater.

pub mod crd;
pub mod error;
pub mod health;
pub mod metrics;
pub mod quantity;
pub mod recommender;
pub mod updater;
pub mod util;
pub mod webhooks;

pub use error::{Error, Result};
pub use recommender::Recommender;
pub use updater::Updater;
pub use webhooks::{
    DEFAULT_UPDATER_USERNAME, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WebhookConfig,
    run_webhook_server,
};
