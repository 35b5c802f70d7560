//! Fetch Update
//!
//! Assembles the relay update for one period from a live beacon node and
//! writes it as JSON, optionally with the contract's constructor parameters.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use relay_proof::types::preset::SECONDS_PER_SLOT;
use relay_proof::{BeaconClient, ChainRelayUpdate, Network, RelayInit, UpdateAssembler};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fetch-update")]
#[command(about = "Assemble a relay update from a live beacon node")]
struct Args {
    /// Beacon node URL
    #[arg(long, env = "BEACON_URL", default_value = "http://localhost:9596")]
    beacon_url: String,

    /// Network whose fork schedule scopes the signing domain
    #[arg(long, env = "NETWORK", default_value = "mainnet")]
    network: Network,

    /// Sync committee period to assemble
    #[arg(long, conflicts_with = "epoch")]
    period: Option<u64>,

    /// Epoch whose period to assemble
    #[arg(long)]
    epoch: Option<u64>,

    /// Also emit relay constructor parameters with this signature threshold
    #[arg(long)]
    init_threshold: Option<u64>,

    /// Trusting period for the constructor parameters, in seconds
    #[arg(long, default_value = "1209600")]
    trusting_period_secs: u64,

    /// Slot of the last validator set change; defaults to the start of the latest period
    #[arg(long)]
    validator_set_change_slot: Option<u64>,

    /// Output file
    #[arg(short, long, default_value = "relay_update.json")]
    output: PathBuf,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    beacon_node: String,
    latest_slot_time: Option<String>,
    update: ChainRelayUpdate,
    #[serde(skip_serializing_if = "Option::is_none")]
    init: Option<RelayInit>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let client = BeaconClient::new(args.beacon_url.clone());
    let genesis = client
        .get_genesis()
        .await
        .context("Failed to fetch genesis")?;

    let assembler = UpdateAssembler::new(client, args.network.forks())
        .with_genesis_validators_root(genesis.genesis_validators_root);
    let update = match (args.period, args.epoch) {
        (Some(period), _) => assembler.assemble(period).await,
        (None, Some(epoch)) => assembler.assemble_for_epoch(epoch).await,
        (None, None) => bail!("Either --period or --epoch is required"),
    }
    .context("Failed to assemble update")?;

    let slot_time = genesis.genesis_time + update.latest_slot * SECONDS_PER_SLOT;
    let latest_slot_time = i64::try_from(slot_time)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|time| time.to_rfc3339());

    tracing::info!(
        period = update.period,
        latest_slot = update.latest_slot,
        finalized_slot = update.finalized_slot,
        participants = update.participant_count(),
        latest_slot_time = latest_slot_time.as_deref().unwrap_or("unknown"),
        "Assembled update"
    );

    let init = args.init_threshold.map(|threshold| {
        RelayInit::from_update(
            &update,
            threshold,
            Duration::from_secs(args.trusting_period_secs),
            args.validator_set_change_slot,
        )
    });

    let snapshot = Snapshot {
        beacon_node: args.beacon_url,
        latest_slot_time,
        update,
        init,
    };

    std::fs::write(&args.output, serde_json::to_string_pretty(&snapshot)?)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    tracing::info!(path = %args.output.display(), "Wrote update");

    Ok(())
}
