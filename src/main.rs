use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use kube::Client;
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use scylla_autoscaler::health::{HealthState, run_health_server};
use scylla_autoscaler::metrics::{PrometheusProvider, Provider};
use scylla_autoscaler::webhooks::DEFAULT_UPDATER_USERNAME;
use scylla_autoscaler::{
    Recommender, Updater, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WebhookConfig, run_webhook_server,
};

#[derive(Parser)]
#[command(
    name = "scylla-autoscaler",
    version,
    about = "Autoscaler for ScyllaDB clusters on Kubernetes"
)]
struct Cli {
    /// Address for the health and metrics endpoints
    #[arg(long, global = true, default_value = "0.0.0.0:8080")]
    health_address: SocketAddr,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Periodically evaluate scaling rules and publish recommendations
    Recommender(RecommenderArgs),
    /// Periodically apply recommendations to target clusters
    Updater(UpdaterArgs),
    /// Serve the admission webhook guarding autoscaler-controlled fields
    AdmissionController(AdmissionControllerArgs),
}

#[derive(Args)]
struct RecommenderArgs {
    /// Tick period between evaluation passes
    #[arg(long, default_value = "1m", value_parser = humantime::parse_duration)]
    interval: Duration,

    /// Labels selecting the metrics service, as key=value pairs
    #[arg(long = "metrics-selector-set", value_name = "KEY=VALUE", value_delimiter = ',', value_parser = parse_key_value)]
    metrics_selector_set: Vec<(String, String)>,

    /// Default step for ranged queries
    #[arg(long, default_value = "1m", value_parser = humantime::parse_duration)]
    metrics_default_step: Duration,

    /// Explicit metrics server base URL, bypassing service discovery
    #[arg(long)]
    metrics_address: Option<String>,
}

#[derive(Args)]
struct UpdaterArgs {
    /// Tick period between apply passes
    #[arg(long, default_value = "1m", value_parser = humantime::parse_duration)]
    interval: Duration,
}

#[derive(Args)]
struct AdmissionControllerArgs {
    /// Identity allowed to mutate autoscaler-controlled fields
    #[arg(long, default_value = DEFAULT_UPDATER_USERNAME)]
    updater_service_account_username: String,

    /// Resource names guarded as scaled resources
    #[arg(long = "scaled-resources", value_delimiter = ',', default_value = "cpu")]
    scaled_resources: Vec<String>,

    /// Path to the TLS certificate in PEM format
    #[arg(long, default_value = WEBHOOK_CERT_PATH)]
    tls_cert: String,

    /// Path to the TLS private key in PEM format
    #[arg(long, default_value = WEBHOOK_KEY_PATH)]
    tls_key: String,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install the TLS crypto provider before any TLS operations
    // Note: install_default() may fail if called multiple times (e.g., in tests),
    // but a single failure during startup is fatal since TLS won't work
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        // Check if a provider is already installed (common in test scenarios)
        if rustls::crypto::CryptoProvider::get_default().is_none() {
            return Err(
                "Failed to install rustls crypto provider and no provider is available".into(),
            );
        }
        // A provider is already installed, which is fine
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("scylla_autoscaler=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    info!("Starting scylla-autoscaler");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Start health server immediately (probes should work before the first tick)
    let health_state = Arc::new(HealthState::new());
    let health_handle = {
        let health_state = health_state.clone();
        let addr = cli.health_address;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, addr).await {
                error!("Health server error: {}", e);
            }
        })
    };
    health_state.set_ready(true).await;

    match cli.command {
        Command::Recommender(args) => run_recommender(client, health_state.clone(), args).await?,
        Command::Updater(args) => run_updater(client, health_state.clone(), args).await?,
        Command::AdmissionController(args) => {
            run_admission_controller(client, health_state.clone(), args).await?
        }
    }

    health_state.set_ready(false).await;
    health_handle.abort();
    info!("Autoscaler stopped");
    Ok(())
}

async fn run_recommender(
    client: Client,
    health_state: Arc<HealthState>,
    args: RecommenderArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let selector: BTreeMap<String, String> = args.metrics_selector_set.into_iter().collect();
    // A single query must never eat a whole tick
    let query_timeout = args.interval / 4;

    let provider: Arc<dyn Provider> = match args.metrics_address {
        Some(address) => Arc::new(PrometheusProvider::new(
            address,
            args.metrics_default_step,
            query_timeout,
        )?),
        None => Arc::new(
            PrometheusProvider::discover(
                client.clone(),
                &selector,
                args.metrics_default_step,
                query_timeout,
            )
            .await?,
        ),
    };

    let recommender = Recommender::new(client, provider);
    info!(interval = ?args.interval, "Recommender started");

    let mut ticker = tokio::time::interval(args.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let started = Instant::now();
                match recommender.run_once().await {
                    Ok(()) => health_state
                        .metrics
                        .record_run("recommender", started.elapsed().as_secs_f64()),
                    Err(error) => {
                        error!(%error, "Recommender pass failed");
                        health_state.metrics.record_error("recommender");
                    }
                }
            }
            _ = shutdown_signal() => {
                info!("Received shutdown signal, stopping recommender");
                break;
            }
        }
    }

    Ok(())
}

async fn run_updater(
    client: Client,
    health_state: Arc<HealthState>,
    args: UpdaterArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let updater = Updater::new(client);
    info!(interval = ?args.interval, "Updater started");

    let mut ticker = tokio::time::interval(args.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let started = Instant::now();
                match updater.run_once().await {
                    Ok(()) => health_state
                        .metrics
                        .record_run("updater", started.elapsed().as_secs_f64()),
                    Err(error) => {
                        error!(%error, "Updater pass failed");
                        health_state.metrics.record_error("updater");
                    }
                }
            }
            _ = shutdown_signal() => {
                info!("Received shutdown signal, stopping updater");
                break;
            }
        }
    }

    Ok(())
}

async fn run_admission_controller(
    client: Client,
    _health_state: Arc<HealthState>,
    args: AdmissionControllerArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(&args.tls_cert).exists() || !Path::new(&args.tls_key).exists() {
        return Err(format!(
            "TLS material missing at {} and {}",
            args.tls_cert, args.tls_key
        )
        .into());
    }

    let config = WebhookConfig {
        updater_service_account_username: args.updater_service_account_username,
        scaled_resources: args.scaled_resources,
    };

    tokio::select! {
        result = run_webhook_server(client, config, &args.tls_cert, &args.tls_key) => {
            result?;
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping admission controller");
        }
    }

    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
