//! Fixture Generator
//!
//! Generates JSON relay updates for contract tests: a run of consecutive
//! valid periods, the constructor parameters to bootstrap from, and invalid
//! updates for negative testing.

use anyhow::{Context, Result};
use clap::Parser;
use relay_proof::{
    ChainRelayUpdate, FixtureSource, ForkSchedule, Network, ProofKind, RelayInit, UpdateAssembler,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "generate-fixtures")]
#[command(about = "Generate relay update fixtures for contract tests")]
struct Args {
    /// Output directory for fixtures
    #[arg(short, long, default_value = "fixtures")]
    output: PathBuf,

    /// First period with a submittable update
    #[arg(long, default_value = "1")]
    first_period: u64,

    /// Number of consecutive periods to generate
    #[arg(long, default_value = "3")]
    num_periods: u64,

    /// Network whose fork schedule scopes signing domains
    #[arg(long, default_value = "mainnet")]
    network: Network,

    /// Genesis validators root (hex)
    #[arg(
        long,
        default_value = "0x4b363db94e286120d76eb905340fdd4e54bfe9f06bf33ff6cf5ad27f511bfe95"
    )]
    genesis_validators_root: String,

    /// Signature threshold for the constructor parameters
    #[arg(long, default_value = "342")]
    signature_threshold: u64,

    /// Trusting period for the constructor parameters, in seconds
    #[arg(long, default_value = "1209600")]
    trusting_period_secs: u64,
}

/// Fixture file format
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FixtureFile {
    /// Preset the slots were generated with
    preset: &'static str,
    genesis_validators_root: String,
    /// Constructor parameters, bootstrapped one period before the first update
    init: RelayInit,
    /// Valid updates in submission order
    updates: Vec<ChainRelayUpdate>,
    /// Invalid updates for negative testing
    invalid_updates: Vec<InvalidUpdate>,
}

/// An invalid update for negative testing
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvalidUpdate {
    description: String,
    /// Proof the contract is expected to reject
    expected_failure: ProofKind,
    update: ChainRelayUpdate,
}

const PRESET: &str = if cfg!(feature = "minimal") {
    "minimal"
} else {
    "mainnet"
};

fn invalid_updates(valid: &ChainRelayUpdate) -> Vec<InvalidUpdate> {
    let mut wrong_finality = valid.clone();
    wrong_finality.finalizing_branch[0] = [0u8; 32];

    let mut wrong_state_root = valid.clone();
    wrong_state_root.finalized_state_root[31] ^= 1;

    let mut wrong_slot = valid.clone();
    wrong_slot.latest_slot += 1;

    vec![
        InvalidUpdate {
            description: "finality branch with a zeroed sibling".to_string(),
            expected_failure: ProofKind::Finality,
            update: wrong_finality,
        },
        InvalidUpdate {
            description: "finalized state root with a flipped bit".to_string(),
            expected_failure: ProofKind::FinalizedStateRoot,
            update: wrong_state_root,
        },
        InvalidUpdate {
            description: "latest slot off by one".to_string(),
            expected_failure: ProofKind::LatestSlot,
            update: wrong_slot,
        },
    ]
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let genesis_validators_root: [u8; 32] =
        relay_proof::from_hex_array(&args.genesis_validators_root, "genesis_validators_root")?;

    tracing::info!(
        output = %args.output.display(),
        first_period = args.first_period,
        num_periods = args.num_periods,
        preset = PRESET,
        "Generating fixtures"
    );

    std::fs::create_dir_all(&args.output)?;

    // The prior period backs the first update's committee and the bootstrap state
    let first = args.first_period.max(1);
    let last = first + args.num_periods.saturating_sub(1);
    let source = FixtureSource::generate(genesis_validators_root, first - 1..=last)?;
    let forks: ForkSchedule = args.network.forks();
    let assembler = UpdateAssembler::new(source, forks);

    let mut updates = Vec::new();
    for period in first..=last {
        let (update, checks) = assembler
            .assemble_with_report(period)
            .await
            .with_context(|| format!("Failed to assemble period {period}"))?;
        tracing::debug!(period, checks = checks.len(), "Assembled fixture");
        updates.push(update);
    }

    let bootstrap = assembler
        .resolver()
        .source()
        .update(first - 1)
        .context("Missing bootstrap period")?;
    let init = RelayInit {
        signature_threshold: args.signature_threshold,
        trusting_period: args.trusting_period_secs,
        finalized_block_root: bootstrap.header.block_root()?,
        finalized_state_root: bootstrap.header.state_root,
        finalized_slot: bootstrap.header.slot,
        latest_slot: bootstrap.finality_header.slot,
        latest_slot_with_validator_set_change: relay_proof::committee::period_start_slot(first - 1),
    };

    let invalid = updates.first().map(invalid_updates).unwrap_or_default();
    let file = FixtureFile {
        preset: PRESET,
        genesis_validators_root: relay_proof::to_hex(genesis_validators_root),
        init,
        updates,
        invalid_updates: invalid,
    };

    let output_path = args.output.join("relay_updates.json");
    std::fs::write(&output_path, serde_json::to_string_pretty(&file)?)?;

    tracing::info!(path = %output_path.display(), "Wrote fixtures");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_updates_fail_the_named_proof() {
        let source = FixtureSource::generate([0x4b; 32], [0, 1]).unwrap();
        let valid = UpdateAssembler::new(source, ForkSchedule::mainnet())
            .assemble(1)
            .await
            .unwrap();

        for invalid in invalid_updates(&valid) {
            let failed: Vec<ProofKind> = invalid
                .update
                .verify_proofs()
                .into_iter()
                .filter(|check| !check.valid)
                .map(|check| check.proof)
                .collect();
            assert!(
                failed.contains(&invalid.expected_failure),
                "{}: {failed:?}",
                invalid.description
            );
        }
    }
}
