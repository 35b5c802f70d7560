//! Beacon Relay Service
//!
//! Assembles sync committee period updates and submits them to the relay
//! contract in order, with a status API and Prometheus metrics.

mod api;
mod relayer;
mod state;
mod submitter;

use crate::submitter::UpdateSubmitter;
use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use relay_proof::{BeaconClient, ForkSchedule, Network, UpdateAssembler};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "relay-service")]
#[command(about = "Ordered sync committee update relayer")]
struct Args {
    /// Beacon node URL
    #[arg(long, env = "BEACON_URL", default_value = "http://localhost:9596")]
    beacon_url: String,

    /// Execution RPC URL
    #[arg(long, env = "RPC_URL", default_value = "http://localhost:8545")]
    rpc_url: String,

    /// Relay contract address
    #[arg(long, env = "CONTRACT_ADDRESS")]
    contract_address: Option<String>,

    /// Private key for transaction signing (hex)
    #[arg(long, env = "PRIVATE_KEY")]
    private_key: Option<String>,

    /// Network whose fork schedule scopes signing domains
    #[arg(long, env = "NETWORK", default_value = "mainnet")]
    network: Network,

    /// JSON fork schedule (genesis through deneb) overriding the network's
    #[arg(long, env = "FORK_CONFIG")]
    fork_config: Option<PathBuf>,

    /// First period to submit; read from the contract when omitted
    #[arg(long, env = "START_PERIOD")]
    start_period: Option<u64>,

    /// Seconds between polls
    #[arg(long, default_value = "60")]
    poll_interval_secs: u64,

    /// Deadline for one update assembly, in seconds
    #[arg(long, default_value = "30")]
    assemble_timeout_secs: u64,

    /// Confirmations to wait for per submission
    #[arg(long, default_value = "1")]
    confirmations: u64,

    /// API listen address
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// Metrics listen address
    #[arg(long, default_value = "0.0.0.0:9090")]
    metrics_listen: SocketAddr,
}

fn load_forks(args: &Args) -> Result<ForkSchedule> {
    match &args.fork_config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&raw).context("Invalid fork schedule")
        }
        None => Ok(args.network.forks()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    tracing::info!("Starting beacon relay service");
    tracing::info!(beacon_url = %args.beacon_url, network = ?args.network, "Beacon node");
    tracing::info!(listen = %args.listen, "API server");

    PrometheusBuilder::new()
        .with_http_listener(args.metrics_listen)
        .install()
        .context("Failed to install metrics exporter")?;

    let forks = load_forks(&args)?;
    let poll_interval = Duration::from_secs(args.poll_interval_secs);
    let client = BeaconClient::new(args.beacon_url.clone());

    let submitter = match (&args.contract_address, &args.private_key) {
        (Some(contract_address), Some(_)) => Some(submitter::RelaySubmitter::with_signer(
            submitter::SubmitterConfig {
                rpc_url: args.rpc_url.clone(),
                contract_address: contract_address.clone(),
                private_key: args.private_key.clone(),
                confirmations: args.confirmations,
            },
        )?),
        _ => {
            tracing::warn!("No contract address or private key configured, submission disabled");
            None
        }
    };

    let start_period = match (args.start_period, &submitter) {
        (Some(period), _) => period,
        (None, Some(submitter)) => submitter
            .next_period()
            .await
            .context("Failed to read relay state from contract")?,
        (None, None) => 0,
    };

    let app_state = state::AppState::new(start_period);

    let api_handle = tokio::spawn(api::run_server(args.listen.clone(), app_state.clone()));
    let head_handle = tokio::spawn(relayer::track_head(
        client.clone(),
        app_state.clone(),
        poll_interval,
    ));

    let relay_handle = submitter.map(|submitter| {
        let relayer = relayer::Relayer::new(
            relayer::RelayerConfig {
                poll_interval,
                assemble_timeout: Duration::from_secs(args.assemble_timeout_secs),
            },
            UpdateAssembler::new(client, forks),
            submitter,
            app_state.clone(),
        );
        tokio::spawn(async move { relayer.run().await })
    });

    let relay_done = async {
        match relay_handle {
            Some(handle) => handle.await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
        result = api_handle => {
            if let Err(e) = result {
                tracing::error!(error = %e, "API server error");
            }
        }
        result = relay_done => {
            match result {
                Ok(Err(e)) => tracing::error!(error = %e, "Relayer stopped, API remains up"),
                Err(e) => tracing::error!(error = %e, "Relayer task failed"),
                Ok(Ok(())) => {}
            }
            // Keep serving status after a halt
            tokio::signal::ctrl_c().await?;
        }
    }

    head_handle.abort();
    Ok(())
}
