//! Sync Committee Period Resolution
//!
//! Decides which committee signs for a period and derives the domain its
//! signatures are scoped to.
//!
//! The committee authorized to sign during period `P` is the
//! `next_sync_committee` published in the update for `P - 1`. This module is
//! the only place that rule is encoded.

use crate::merkle::{hash_pair, Node32};
use crate::proof::{HeaderProofBuilder, ProofError, ProofKind};
use crate::source::{BeaconDataSource, SourceError};
use crate::types::{preset, SyncCommittee};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

/// Domain type of sync committee signatures
pub const DOMAIN_SYNC_COMMITTEE: [u8; 4] = [0x07, 0x00, 0x00, 0x00];

/// Errors resolving a period's committee or signing domain
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No committee update for the period before period {0}")]
    MissingPriorPeriod(u64),

    #[error("Data source unavailable: {0}")]
    DataUnavailable(#[source] SourceError),

    #[error(transparent)]
    Proof(#[from] ProofError),
}

/// Epoch of a slot
#[must_use]
pub const fn epoch_at_slot(slot: u64) -> u64 {
    slot / preset::SLOTS_PER_EPOCH
}

/// Sync committee period of an epoch
#[must_use]
pub const fn sync_committee_period_at_epoch(epoch: u64) -> u64 {
    epoch / preset::EPOCHS_PER_SYNC_COMMITTEE_PERIOD
}

/// Sync committee period of a slot
#[must_use]
pub const fn sync_committee_period_at_slot(slot: u64) -> u64 {
    sync_committee_period_at_epoch(epoch_at_slot(slot))
}

/// First slot of a sync committee period
#[must_use]
pub const fn period_start_slot(period: u64) -> u64 {
    period * preset::EPOCHS_PER_SYNC_COMMITTEE_PERIOD * preset::SLOTS_PER_EPOCH
}

/// A fork activation
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Fork {
    pub epoch: u64,
    #[serde(with = "crate::types::hex_array")]
    pub fork_version: [u8; 4],
}

/// Fork schedule of a network.
///
/// Ends at Deneb, the last fork whose state keeps the 5-level Altair layout
/// the relay's gindices address. Electra deepens the state tree to 6 levels.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ForkSchedule {
    pub genesis: Fork,
    pub altair: Fork,
    pub bellatrix: Fork,
    pub capella: Fork,
    pub deneb: Fork,
}

impl ForkSchedule {
    /// Ethereum mainnet
    #[must_use]
    pub const fn mainnet() -> Self {
        Self {
            genesis: fork(0, [0x00, 0x00, 0x00, 0x00]),
            altair: fork(74_240, [0x01, 0x00, 0x00, 0x00]),
            bellatrix: fork(144_896, [0x02, 0x00, 0x00, 0x00]),
            capella: fork(194_048, [0x03, 0x00, 0x00, 0x00]),
            deneb: fork(269_568, [0x04, 0x00, 0x00, 0x00]),
        }
    }

    /// Sepolia testnet
    #[must_use]
    pub const fn sepolia() -> Self {
        Self {
            genesis: fork(0, [0x90, 0x00, 0x00, 0x69]),
            altair: fork(50, [0x90, 0x00, 0x00, 0x70]),
            bellatrix: fork(100, [0x90, 0x00, 0x00, 0x71]),
            capella: fork(56_832, [0x90, 0x00, 0x00, 0x72]),
            deneb: fork(132_608, [0x90, 0x00, 0x00, 0x73]),
        }
    }

    /// Fork version active at `epoch`
    #[must_use]
    pub fn fork_version_at_epoch(&self, epoch: u64) -> [u8; 4] {
        [
            self.deneb,
            self.capella,
            self.bellatrix,
            self.altair,
        ]
        .into_iter()
        .find(|f| epoch >= f.epoch)
        .unwrap_or(self.genesis)
        .fork_version
    }

    /// Fork version active at `slot`
    #[must_use]
    pub fn fork_version_at_slot(&self, slot: u64) -> [u8; 4] {
        self.fork_version_at_epoch(epoch_at_slot(slot))
    }
}

const fn fork(epoch: u64, fork_version: [u8; 4]) -> Fork {
    Fork {
        epoch,
        fork_version,
    }
}

/// Named networks with a built-in fork schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Sepolia,
}

impl Network {
    #[must_use]
    pub const fn forks(self) -> ForkSchedule {
        match self {
            Self::Mainnet => ForkSchedule::mainnet(),
            Self::Sepolia => ForkSchedule::sepolia(),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "sepolia" => Ok(Self::Sepolia),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

/// `hash_tree_root(ForkData { current_version, genesis_validators_root })`
#[must_use]
pub fn compute_fork_data_root(current_version: [u8; 4], genesis_validators_root: &Node32) -> Node32 {
    let mut version_chunk = [0u8; 32];
    version_chunk[..4].copy_from_slice(&current_version);
    hash_pair(&version_chunk, genesis_validators_root)
}

/// `domain_type ‖ fork_data_root[..28]`
#[must_use]
pub fn compute_domain(
    domain_type: [u8; 4],
    fork_version: [u8; 4],
    genesis_validators_root: &Node32,
) -> Node32 {
    let fork_data_root = compute_fork_data_root(fork_version, genesis_validators_root);
    let mut domain = [0u8; 32];
    domain[..4].copy_from_slice(&domain_type);
    domain[4..].copy_from_slice(&fork_data_root[..28]);
    domain
}

/// The committee authorized to sign during a period, with its inclusion proof
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommittee {
    /// Period the committee signs for
    pub period: u64,
    /// Committee members
    pub committee: SyncCommittee,
    /// Proof of the committee in the prior period's finalized state
    pub branch: Vec<Node32>,
    /// Finalized state root of the prior period's update
    pub state_root: Node32,
}

impl ResolvedCommittee {
    /// Aggregate public key of the committee
    #[must_use]
    pub fn aggregate_pubkey(&self) -> Vec<u8> {
        self.committee.aggregate_pubkey.to_vec()
    }
}

/// Resolves committees and signing domains against a data source.
///
/// The genesis validators root is fetched on first use and cached for the
/// lifetime of the resolver.
#[derive(Debug)]
pub struct SyncCommitteePeriodResolver<D> {
    source: D,
    forks: ForkSchedule,
    genesis_validators_root: OnceCell<Node32>,
}

impl<D: BeaconDataSource> SyncCommitteePeriodResolver<D> {
    /// Create a resolver over `source` using `forks` for domain computation
    pub fn new(source: D, forks: ForkSchedule) -> Self {
        Self {
            source,
            forks,
            genesis_validators_root: OnceCell::new(),
        }
    }

    /// Seed the genesis validators root so the source is never asked for it
    #[must_use]
    pub fn with_genesis_validators_root(mut self, root: Node32) -> Self {
        self.genesis_validators_root = OnceCell::from(root);
        self
    }

    /// The underlying data source
    pub fn source(&self) -> &D {
        &self.source
    }

    /// The fork schedule used for domains
    pub fn forks(&self) -> &ForkSchedule {
        &self.forks
    }

    /// Committee that signs during `period`, verified against the prior
    /// period's finalized state root.
    ///
    /// # Errors
    /// Returns [`ResolveError::MissingPriorPeriod`] when `period` is 0 or the
    /// source has no update for `period - 1`.
    pub async fn committee_for_period(&self, period: u64) -> Result<ResolvedCommittee, ResolveError> {
        let mut builder = HeaderProofBuilder::new();
        self.committee_for_period_with(period, &mut builder).await
    }

    /// Like [`Self::committee_for_period`], recording the proof check in `builder`.
    ///
    /// # Errors
    /// See [`Self::committee_for_period`].
    #[instrument(skip(self, builder))]
    pub async fn committee_for_period_with(
        &self,
        period: u64,
        builder: &mut HeaderProofBuilder,
    ) -> Result<ResolvedCommittee, ResolveError> {
        let prior_period = period
            .checked_sub(1)
            .ok_or(ResolveError::MissingPriorPeriod(period))?;

        let prior = match self.source.get_committee_update(prior_period).await {
            Ok(update) => update,
            Err(SourceError::NotFound(_)) => return Err(ResolveError::MissingPriorPeriod(period)),
            Err(e) => return Err(ResolveError::DataUnavailable(e)),
        };

        let state_root = prior.header.state_root;
        builder.check_sync_committee(
            ProofKind::PriorSyncCommittee,
            &prior.next_sync_committee,
            &prior.next_sync_committee_branch,
            state_root,
        )?;

        debug!(prior_period, slot = prior.header.slot, "Resolved signing committee");

        Ok(ResolvedCommittee {
            period,
            committee: prior.next_sync_committee,
            branch: prior.next_sync_committee_branch,
            state_root,
        })
    }

    /// Genesis validators root, fetched once
    ///
    /// # Errors
    /// Returns [`ResolveError::DataUnavailable`] if the first fetch fails.
    pub async fn genesis_validators_root(&self) -> Result<Node32, ResolveError> {
        let root = self
            .genesis_validators_root
            .get_or_try_init(|| async {
                let root = self.source.get_genesis_validators_root().await?;
                info!(genesis_validators_root = %crate::types::to_hex(root), "Fetched genesis validators root");
                Ok::<_, SourceError>(root)
            })
            .await
            .map_err(ResolveError::DataUnavailable)?;
        Ok(*root)
    }

    /// Sync committee signing domain at `slot`
    ///
    /// # Errors
    /// Returns [`ResolveError::DataUnavailable`] if the genesis validators
    /// root cannot be fetched.
    pub async fn signing_domain(&self, slot: u64) -> Result<Node32, ResolveError> {
        let genesis_validators_root = self.genesis_validators_root().await?;
        let fork_version = self.forks.fork_version_at_slot(slot);
        Ok(compute_domain(
            DOMAIN_SYNC_COMMITTEE,
            fork_version,
            &genesis_validators_root,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::UpdateAssembler;
    use crate::fixture::FixtureSource;
    use crate::types::CommitteeUpdate;
    use async_trait::async_trait;
    use ssz_rs::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fixture source that counts genesis root lookups
    struct CountingSource {
        inner: FixtureSource,
        genesis_fetches: AtomicUsize,
    }

    #[async_trait]
    impl BeaconDataSource for CountingSource {
        async fn get_committee_update(&self, period: u64) -> Result<CommitteeUpdate, SourceError> {
            self.inner.get_committee_update(period).await
        }

        async fn get_block_root(&self, slot: u64) -> Result<Node32, SourceError> {
            self.inner.get_block_root(slot).await
        }

        async fn get_genesis_validators_root(&self) -> Result<Node32, SourceError> {
            self.genesis_fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.get_genesis_validators_root().await
        }
    }

    #[tokio::test]
    async fn test_genesis_validators_root_fetched_once() {
        let gvr = [0x4b; 32];
        let source = CountingSource {
            inner: FixtureSource::generate(gvr, [0, 1, 2]).unwrap(),
            genesis_fetches: AtomicUsize::new(0),
        };
        let assembler = UpdateAssembler::new(source, ForkSchedule::mainnet());

        assembler.assemble(1).await.unwrap();
        assembler.assemble(2).await.unwrap();
        let slot = period_start_slot(2);
        let domain = assembler.resolver().signing_domain(slot).await.unwrap();

        let forks = ForkSchedule::mainnet();
        assert_eq!(
            domain,
            compute_domain(DOMAIN_SYNC_COMMITTEE, forks.fork_version_at_slot(slot), &gvr)
        );
        assert_eq!(
            assembler.resolver().source().genesis_fetches.load(Ordering::SeqCst),
            1
        );
    }

    #[derive(Debug, Default, SimpleSerialize)]
    struct ForkData {
        current_version: [u8; 4],
        genesis_validators_root: [u8; 32],
    }

    #[tokio::test]
    async fn test_seeded_genesis_validators_root_skips_the_source() {
        let source = CountingSource {
            inner: FixtureSource::generate([0x4b; 32], [0, 1]).unwrap(),
            genesis_fetches: AtomicUsize::new(0),
        };
        let assembler = UpdateAssembler::new(source, ForkSchedule::mainnet())
            .with_genesis_validators_root([0x4b; 32]);

        assembler.assemble(1).await.unwrap();
        assert_eq!(
            assembler.resolver().genesis_validators_root().await.unwrap(),
            [0x4b; 32]
        );
        assert_eq!(
            assembler.resolver().source().genesis_fetches.load(Ordering::SeqCst),
            0
        );
    }

    #[test]
    fn test_fork_data_root_matches_ssz_rs() {
        let data = ForkData {
            current_version: [0x02, 0x00, 0x00, 0x00],
            genesis_validators_root: [0x4b; 32],
        };
        let expected: [u8; 32] = data.hash_tree_root().unwrap().into();
        assert_eq!(
            compute_fork_data_root(data.current_version, &data.genesis_validators_root),
            expected
        );
    }

    #[test]
    fn test_compute_domain_layout() {
        let gvr = [0x11; 32];
        let domain = compute_domain(DOMAIN_SYNC_COMMITTEE, [0x03, 0, 0, 0], &gvr);
        assert_eq!(&domain[..4], &DOMAIN_SYNC_COMMITTEE);
        assert_eq!(
            &domain[4..],
            &compute_fork_data_root([0x03, 0, 0, 0], &gvr)[..28]
        );
    }

    #[test]
    fn test_mainnet_fork_versions() {
        let forks = ForkSchedule::mainnet();
        assert_eq!(forks.fork_version_at_epoch(0), [0, 0, 0, 0]);
        assert_eq!(forks.fork_version_at_epoch(74_239), [0, 0, 0, 0]);
        assert_eq!(forks.fork_version_at_epoch(74_240), [1, 0, 0, 0]);
        assert_eq!(forks.fork_version_at_epoch(200_000), [3, 0, 0, 0]);
        assert_eq!(forks.fork_version_at_epoch(u64::MAX), [4, 0, 0, 0]);
    }

    #[test]
    fn test_fork_schedule_rejects_unknown_forks() {
        let mut value = serde_json::to_value(ForkSchedule::mainnet()).unwrap();
        value["electra"] = serde_json::json!({ "epoch": 364_032, "fork_version": "0x05000000" });
        assert!(serde_json::from_value::<ForkSchedule>(value).is_err());
    }

    #[test]
    fn test_network_from_str() {
        assert_eq!("Mainnet".parse::<Network>(), Ok(Network::Mainnet));
        assert_eq!("sepolia".parse::<Network>(), Ok(Network::Sepolia));
        assert!("goerli".parse::<Network>().is_err());
    }

    #[test]
    fn test_fork_schedule_json_roundtrip() {
        let json = serde_json::to_string(&ForkSchedule::sepolia()).unwrap();
        assert!(json.contains("\"0x90000069\""));
        let decoded: ForkSchedule = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, ForkSchedule::sepolia());
    }

    #[test]
    #[cfg(not(feature = "minimal"))]
    fn test_period_arithmetic_mainnet() {
        assert_eq!(epoch_at_slot(63), 1);
        assert_eq!(sync_committee_period_at_epoch(255), 0);
        assert_eq!(sync_committee_period_at_epoch(256), 1);
        assert_eq!(sync_committee_period_at_slot(8192), 1);
        assert_eq!(period_start_slot(2), 16_384);
    }
}
