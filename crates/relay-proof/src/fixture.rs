//! In-memory Beacon Data Source
//!
//! Serves committee updates, block roots and the genesis validators root from
//! memory. `FixtureSource::generate` builds a chain of internally consistent
//! periods: every header, state root and branch in it verifies, so tests can
//! break exactly one thing at a time.

use crate::committee::{epoch_at_slot, period_start_slot};
use crate::gindex::{FINALIZED_ROOT_INDEX, NEXT_SYNC_COMMITTEE_INDEX};
use crate::merkle::Node32;
use crate::proof::{GindexProver, ProofError};
use crate::source::{BeaconDataSource, SourceError};
use crate::state_prover::{StateProver, BEACON_STATE_FIELD_COUNT};
use crate::types::{
    preset, BeaconBlockHeader, Checkpoint, CommitteeUpdate, SyncCommittee, PUBKEY_LEN,
    SIGNATURE_LEN, SYNC_COMMITTEE_SIZE,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// Deterministic beacon data held in memory.
#[derive(Debug, Clone, Default)]
pub struct FixtureSource {
    updates: BTreeMap<u64, CommitteeUpdate>,
    block_roots: HashMap<u64, Node32>,
    genesis_validators_root: Node32,
}

impl FixtureSource {
    /// Empty source for a chain with the given genesis validators root
    #[must_use]
    pub fn new(genesis_validators_root: Node32) -> Self {
        Self {
            genesis_validators_root,
            ..Self::default()
        }
    }

    /// Source with a consistent update for every period in `periods`.
    ///
    /// # Errors
    /// Returns an error if a generated state cannot be proven.
    pub fn generate(
        genesis_validators_root: Node32,
        periods: impl IntoIterator<Item = u64>,
    ) -> Result<Self, ProofError> {
        let mut source = Self::new(genesis_validators_root);
        for period in periods {
            source.insert_update(period, committee_update(period)?)?;
        }
        Ok(source)
    }

    /// Register `update` for `period`, along with the canonical root of its
    /// finalized header.
    ///
    /// # Errors
    /// Returns an error if the header root cannot be computed.
    pub fn insert_update(&mut self, period: u64, update: CommitteeUpdate) -> Result<(), ProofError> {
        let header = &update.header;
        self.block_roots.insert(header.slot, header.block_root()?);
        self.updates.insert(period, update);
        Ok(())
    }

    /// Override the canonical block root reported for `slot`
    pub fn set_block_root(&mut self, slot: u64, root: Node32) {
        self.block_roots.insert(slot, root);
    }

    /// Drop the update for `period`
    pub fn remove_update(&mut self, period: u64) -> Option<CommitteeUpdate> {
        self.updates.remove(&period)
    }

    #[must_use]
    pub fn update(&self, period: u64) -> Option<&CommitteeUpdate> {
        self.updates.get(&period)
    }

    pub fn update_mut(&mut self, period: u64) -> Option<&mut CommitteeUpdate> {
        self.updates.get_mut(&period)
    }

    /// Periods with an update, ascending
    pub fn periods(&self) -> impl Iterator<Item = u64> + '_ {
        self.updates.keys().copied()
    }
}

#[async_trait]
impl BeaconDataSource for FixtureSource {
    async fn get_committee_update(&self, period: u64) -> Result<CommitteeUpdate, SourceError> {
        self.updates
            .get(&period)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(format!("committee update for period {period}")))
    }

    async fn get_block_root(&self, slot: u64) -> Result<Node32, SourceError> {
        self.block_roots
            .get(&slot)
            .copied()
            .ok_or_else(|| SourceError::NotFound(format!("block root for slot {slot}")))
    }

    async fn get_genesis_validators_root(&self) -> Result<Node32, SourceError> {
        Ok(self.genesis_validators_root)
    }
}

/// Deterministic committee for `period`; every key is distinct.
///
/// # Errors
/// Never fails for generated keys; the `Result` mirrors `SyncCommittee::from_bytes`.
pub fn committee_for(period: u64) -> Result<SyncCommittee, ProofError> {
    let pubkeys: Vec<Vec<u8>> = (0..SYNC_COMMITTEE_SIZE as u64)
        .map(|i| fixture_bytes(b"pubkey", period, i, PUBKEY_LEN))
        .collect();
    let aggregate = fixture_bytes(b"aggregate", period, 0, PUBKEY_LEN);
    Ok(SyncCommittee::from_bytes(&pubkeys, &aggregate)?)
}

/// A consistent committee update for `period`.
///
/// The finalized header sits two epochs into the period and the latest
/// header two epochs after it. Its state records the finalized block root as
/// the finalized checkpoint, and the finalized state holds the committees of
/// `period` and `period + 1`.
///
/// # Errors
/// Returns an error if a generated state cannot be proven.
pub fn committee_update(period: u64) -> Result<CommitteeUpdate, ProofError> {
    let current = committee_for(period)?;
    let next = committee_for(period + 1)?;

    let finalized_slot = period_start_slot(period) + 2 * preset::SLOTS_PER_EPOCH;
    let finalized_state = StateProver::from_parts(
        filler_roots(b"finalized", period),
        Checkpoint {
            epoch: epoch_at_slot(finalized_slot).saturating_sub(2),
            root: fixture_root(b"older", period),
        },
        &current,
        &next,
    )?;
    let header = header_at(finalized_slot, finalized_state.state_root(), period);
    let finalized_block_root = header.block_root()?;

    let latest_slot = finalized_slot + 2 * preset::SLOTS_PER_EPOCH;
    let latest_state = StateProver::from_parts(
        filler_roots(b"latest", period),
        Checkpoint {
            epoch: epoch_at_slot(finalized_slot),
            root: finalized_block_root,
        },
        &current,
        &next,
    )?;
    let finality_header = header_at(latest_slot, latest_state.state_root(), period);

    let (_, finality_branch) = latest_state.prove_gindex(FINALIZED_ROOT_INDEX)?;
    let (_, next_sync_committee_branch) = finalized_state.prove_gindex(NEXT_SYNC_COMMITTEE_INDEX)?;

    let mut sync_committee_signature = [0u8; SIGNATURE_LEN];
    sync_committee_signature.copy_from_slice(&fixture_bytes(b"signature", period, 0, SIGNATURE_LEN));

    // Every fourth member abstains
    let sync_committee_bits = (0..SYNC_COMMITTEE_SIZE).map(|i| i % 4 != 3).collect();

    Ok(CommitteeUpdate {
        header,
        finality_header,
        finality_branch,
        next_sync_committee: next,
        next_sync_committee_branch,
        sync_committee_signature,
        sync_committee_bits,
    })
}

fn header_at(slot: u64, state_root: Node32, period: u64) -> BeaconBlockHeader {
    BeaconBlockHeader {
        slot,
        proposer_index: slot % 1024,
        parent_root: fixture_root(b"parent", slot),
        state_root,
        body_root: fixture_root(b"body", slot ^ period),
    }
}

fn filler_roots(tag: &[u8], period: u64) -> Vec<Node32> {
    (0..BEACON_STATE_FIELD_COUNT as u64)
        .map(|i| fixture_root(tag, (period << 8) | i))
        .collect()
}

fn fixture_root(tag: &[u8], n: u64) -> Node32 {
    Sha256::new()
        .chain_update(tag)
        .chain_update(n.to_le_bytes())
        .finalize()
        .into()
}

fn fixture_bytes(tag: &[u8], period: u64, i: u64, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut counter = 0u64;
    while out.len() < len {
        let block = Sha256::new()
            .chain_update(tag)
            .chain_update(period.to_le_bytes())
            .chain_update(i.to_le_bytes())
            .chain_update(counter.to_le_bytes())
            .finalize();
        out.extend_from_slice(&block);
        counter += 1;
    }
    out.truncate(len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::verify_gindex_branch;
    use crate::committee::sync_committee_period_at_slot;

    #[test]
    fn test_generated_update_is_consistent() {
        let update = committee_update(3).unwrap();
        let finalized_root = update.header.block_root().unwrap();

        assert!(verify_gindex_branch(
            &finalized_root,
            &update.finality_branch,
            FINALIZED_ROOT_INDEX,
            &update.finality_header.state_root
        )
        .unwrap());
        assert!(verify_gindex_branch(
            &update.next_sync_committee.root().unwrap(),
            &update.next_sync_committee_branch,
            NEXT_SYNC_COMMITTEE_INDEX,
            &update.header.state_root
        )
        .unwrap());
        assert_eq!(sync_committee_period_at_slot(update.header.slot), 3);
        assert_eq!(sync_committee_period_at_slot(update.finality_header.slot), 3);
    }

    #[test]
    fn test_committees_differ_per_period() {
        let a = committee_for(1).unwrap();
        let b = committee_for(2).unwrap();
        assert_ne!(a.root().unwrap(), b.root().unwrap());
        assert_eq!(a, committee_for(1).unwrap());
    }

    #[tokio::test]
    async fn test_source_reports_not_found() {
        let source = FixtureSource::generate([1u8; 32], [5]).unwrap();
        assert!(source.get_committee_update(5).await.is_ok());
        assert!(matches!(
            source.get_committee_update(4).await,
            Err(SourceError::NotFound(_))
        ));
        assert!(matches!(
            source.get_block_root(0).await,
            Err(SourceError::NotFound(_))
        ));
        assert_eq!(source.get_genesis_validators_root().await.unwrap(), [1u8; 32]);
        assert_eq!(source.periods().collect::<Vec<_>>(), vec![5]);
    }
}
