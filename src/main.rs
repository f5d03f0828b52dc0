//! node-sidecar-controller - injects the node sidecar into labelled Deployments

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use kube::Client;

use node_sidecar_controller::controller::Context;
use node_sidecar_controller::controller_runner::build_controller;
use node_sidecar_controller::leader_election::LeaderElector;
use node_sidecar_controller::metrics::Metrics;
use node_sidecar_controller::server;
use node_sidecar_controller::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use node_sidecar_controller::{DEFAULT_LEASE_NAME, DEFAULT_METRICS_ADDR};

/// Injects the node-sidecar container into Deployments labelled node-sidecar=true
#[derive(Parser, Debug)]
#[command(name = "node-sidecar-controller", version, about, long_about = None)]
struct Cli {
    /// Address the metrics and health endpoints bind to
    #[arg(long, env = "METRICS_ADDR", default_value = DEFAULT_METRICS_ADDR)]
    metrics_addr: SocketAddr,

    /// Enable leader election so only one replica reconciles at a time
    #[arg(long, env = "ENABLE_LEADER_ELECTION")]
    enable_leader_election: bool,

    /// Name of the Lease used for leader election
    #[arg(long, default_value = DEFAULT_LEASE_NAME)]
    leader_election_id: String,

    /// Namespace holding the leader election Lease
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    leader_election_namespace: String,

    /// Identity recorded as the Lease holder (falls back to HOSTNAME)
    #[arg(long, env = "POD_NAME")]
    pod_name: Option<String>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        log_format: cli.log_format,
        ..Default::default()
    })?;

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let metrics = Arc::new(Metrics::new()?);

    let listener = server::bind(cli.metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics server on {}", cli.metrics_addr))?;
    let mut server = tokio::spawn(server::run(listener, metrics.clone()));

    let ctx = Arc::new(Context::new(client.clone(), metrics));

    if !cli.enable_leader_election {
        tracing::info!("Starting controller without leader election");
        tokio::select! {
            _ = build_controller(client, ctx) => {}
            res = &mut server => return Err(server_exited(res)),
        }
        tracing::info!("Controller stopped");
        return Ok(());
    }

    let identity = cli
        .pod_name
        .or_else(|| std::env::var("HOSTNAME").ok())
        .context("leader election needs an identity: set --pod-name, POD_NAME or HOSTNAME")?;

    let elector = Arc::new(LeaderElector::new(
        client.clone(),
        &cli.leader_election_id,
        &cli.leader_election_namespace,
        &identity,
    ));
    let mut guard = tokio::select! {
        guard = elector.acquire() => guard,
        res = &mut server => return Err(server_exited(res)),
    };

    tracing::info!("Starting controller as leader");
    let lost = tokio::select! {
        _ = build_controller(client, ctx) => false,
        _ = guard.lost() => true,
        res = &mut server => return Err(server_exited(res)),
    };

    if lost {
        anyhow::bail!("leadership lost, exiting so a fresh replica can take over");
    }

    tracing::info!("Controller stopped, releasing leadership");
    if let Err(e) = guard.release().await {
        tracing::warn!(error = %e, "Failed to release lease");
    }
    Ok(())
}

/// Turn the metrics server task's exit into the process error
fn server_exited(
    res: Result<node_sidecar_controller::Result<()>, tokio::task::JoinError>,
) -> anyhow::Error {
    match res {
        Ok(Ok(())) => anyhow::anyhow!("metrics server stopped unexpectedly"),
        Ok(Err(e)) => anyhow::Error::new(e).context("metrics server failed"),
        Err(e) => anyhow::Error::new(e).context("metrics server task failed"),
    }
}
