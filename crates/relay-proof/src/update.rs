//! Relay Update Records
//!
//! `ChainRelayUpdate` is the record submitted to the relay contract for one
//! sync committee period. `RelayInit` holds the contract's constructor
//! parameters, derived from the first update a relay is bootstrapped with.

use crate::committee::{period_start_slot, sync_committee_period_at_slot};
use crate::gindex::{FINALIZED_ROOT_INDEX, SLOT_INDEX, STATE_ROOT_INDEX};
use crate::merkle::{uint64_chunk, verify_gindex_branch, Node32};
use crate::proof::{ProofCheck, ProofKind};
use crate::types::{hex_array, hex_bytes, hex_bytes32_vec, hex_bytes_vec, SIGNATURE_LEN};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A complete, self-verified update for one sync committee period.
///
/// The latest header is the finalizing one; its state records the finalized
/// header's block root. `sync_committee*` is the committee that signs during
/// `period`, taken from the prior period's update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainRelayUpdate {
    /// Sync committee period this update is for
    pub period: u64,
    /// Aggregate BLS signature over the latest block root
    #[serde(with = "hex_array")]
    pub signature: [u8; SIGNATURE_LEN],
    /// Participation flags, one per committee member
    pub participants: Vec<bool>,
    #[serde(with = "hex_array")]
    pub latest_block_root: Node32,
    /// Domain the signature is scoped to
    #[serde(with = "hex_array")]
    pub signing_domain: Node32,
    /// State root of the latest header
    #[serde(with = "hex_array")]
    pub state_root: Node32,
    #[serde(with = "hex_bytes32_vec")]
    pub state_root_branch: Vec<Node32>,
    pub latest_slot: u64,
    #[serde(with = "hex_bytes32_vec")]
    pub latest_slot_branch: Vec<Node32>,
    #[serde(with = "hex_array")]
    pub finalized_block_root: Node32,
    /// Proof of `finalized_block_root` in the latest state
    #[serde(with = "hex_bytes32_vec")]
    pub finalizing_branch: Vec<Node32>,
    pub finalized_slot: u64,
    #[serde(with = "hex_bytes32_vec")]
    pub finalized_slot_branch: Vec<Node32>,
    #[serde(with = "hex_array")]
    pub finalized_state_root: Node32,
    #[serde(with = "hex_bytes32_vec")]
    pub finalized_state_root_branch: Vec<Node32>,
    /// Member public keys of the signing committee
    #[serde(with = "hex_bytes_vec")]
    pub sync_committee: Vec<Vec<u8>>,
    #[serde(with = "hex_bytes")]
    pub sync_committee_aggregate: Vec<u8>,
    /// Proof of the signing committee in the prior period's finalized state
    #[serde(with = "hex_bytes32_vec")]
    pub sync_committee_branch: Vec<Node32>,
}

impl ChainRelayUpdate {
    /// Re-run every check whose root is carried in the record.
    ///
    /// The committee branch is rooted in the prior period's finalized state,
    /// which the record does not carry; it is checked during assembly.
    #[must_use]
    pub fn verify_proofs(&self) -> Vec<ProofCheck> {
        let slot_leaf = uint64_chunk(self.latest_slot);
        let finalized_slot_leaf = uint64_chunk(self.finalized_slot);

        [
            (
                ProofKind::LatestSlot,
                &slot_leaf,
                &self.latest_slot_branch,
                SLOT_INDEX,
                &self.latest_block_root,
            ),
            (
                ProofKind::LatestStateRoot,
                &self.state_root,
                &self.state_root_branch,
                STATE_ROOT_INDEX,
                &self.latest_block_root,
            ),
            (
                ProofKind::FinalizedSlot,
                &finalized_slot_leaf,
                &self.finalized_slot_branch,
                SLOT_INDEX,
                &self.finalized_block_root,
            ),
            (
                ProofKind::FinalizedStateRoot,
                &self.finalized_state_root,
                &self.finalized_state_root_branch,
                STATE_ROOT_INDEX,
                &self.finalized_block_root,
            ),
            (
                ProofKind::Finality,
                &self.finalized_block_root,
                &self.finalizing_branch,
                FINALIZED_ROOT_INDEX,
                &self.state_root,
            ),
        ]
        .into_iter()
        .map(|(proof, leaf, branch, gindex, root)| ProofCheck {
            proof,
            valid: verify_gindex_branch(leaf, branch, gindex, root).unwrap_or(false),
        })
        .collect()
    }

    /// Whether every carried proof verifies
    #[must_use]
    pub fn proofs_valid(&self) -> bool {
        self.verify_proofs().iter().all(|check| check.valid)
    }

    /// Number of committee members that signed
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.participants.iter().filter(|p| **p).count()
    }
}

/// Constructor parameters of the relay contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayInit {
    /// Minimum number of participating committee members
    pub signature_threshold: u64,
    /// How long a finalized header may be relied on, in seconds
    pub trusting_period: u64,
    #[serde(with = "hex_array")]
    pub finalized_block_root: Node32,
    #[serde(with = "hex_array")]
    pub finalized_state_root: Node32,
    pub finalized_slot: u64,
    pub latest_slot: u64,
    pub latest_slot_with_validator_set_change: u64,
}

impl RelayInit {
    /// Bootstrap parameters from an assembled update.
    ///
    /// `validator_set_change_slot` defaults to the first slot of the sync
    /// committee period containing the latest slot.
    #[must_use]
    pub fn from_update(
        update: &ChainRelayUpdate,
        signature_threshold: u64,
        trusting_period: Duration,
        validator_set_change_slot: Option<u64>,
    ) -> Self {
        let latest_slot_with_validator_set_change = validator_set_change_slot.unwrap_or_else(|| {
            period_start_slot(sync_committee_period_at_slot(update.latest_slot))
        });

        Self {
            signature_threshold,
            trusting_period: trusting_period.as_secs(),
            finalized_block_root: update.finalized_block_root,
            finalized_state_root: update.finalized_state_root,
            finalized_slot: update.finalized_slot,
            latest_slot: update.latest_slot,
            latest_slot_with_validator_set_change,
        }
    }
}
