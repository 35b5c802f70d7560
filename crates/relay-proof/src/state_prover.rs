//! State-level Proof Generator
//!
//! Generates Merkle proofs for Altair beacon state fields from the state's
//! 24 field roots. Only the containers a relay update reaches into
//! (`finalized_checkpoint`, the sync committees) are expanded; every other
//! field is carried as its root, so the full state is never materialized.

use crate::gindex::{GindexCalculator, GindexError};
use crate::merkle::{merkleize_chunks, prove_gindex_in_chunks, uint64_chunk, Node32};
use crate::proof::{GindexProver, ProofError};
use crate::types::{Checkpoint, SyncCommittee};

/// Number of fields in the Altair BeaconState
pub const BEACON_STATE_FIELD_COUNT: usize = 24;

/// `finalized_checkpoint` field index in BeaconState
const FINALIZED_CHECKPOINT_FIELD_INDEX: usize = 20;

/// `current_sync_committee` field index in BeaconState
const CURRENT_SYNC_COMMITTEE_FIELD_INDEX: usize = 22;

/// `next_sync_committee` field index in BeaconState
const NEXT_SYNC_COMMITTEE_FIELD_INDEX: usize = 23;

/// Checkpoint container depth (epoch, root)
const CHECKPOINT_TREE_DEPTH: u32 = 1;

/// A sparse proof generator over an Altair state's field roots.
#[derive(Debug, Clone)]
pub struct StateProver {
    field_roots: Vec<Node32>,
    finalized_checkpoint: Checkpoint,
}

impl StateProver {
    /// Create a new `StateProver` from pre-computed field roots.
    ///
    /// # Errors
    /// Returns an error if there are not exactly 24 roots, or if the
    /// `finalized_checkpoint` root does not match `finalized_checkpoint`.
    pub fn new(
        field_roots: Vec<Node32>,
        finalized_checkpoint: Checkpoint,
    ) -> Result<Self, ProofError> {
        if field_roots.len() != BEACON_STATE_FIELD_COUNT {
            return Err(ProofError::FieldCount {
                expected: BEACON_STATE_FIELD_COUNT,
                got: field_roots.len(),
            });
        }

        if field_roots[FINALIZED_CHECKPOINT_FIELD_INDEX] != checkpoint_root(&finalized_checkpoint) {
            return Err(ProofError::CheckpointMismatch);
        }

        Ok(Self {
            field_roots,
            finalized_checkpoint,
        })
    }

    /// Create a `StateProver` whose relay-relevant fields are given by value.
    ///
    /// `other_roots` supplies the remaining fields; entries at the checkpoint
    /// and committee positions are overwritten.
    ///
    /// # Errors
    /// Returns an error on a field count mismatch or a merkleization failure.
    pub fn from_parts(
        mut other_roots: Vec<Node32>,
        finalized_checkpoint: Checkpoint,
        current_sync_committee: &SyncCommittee,
        next_sync_committee: &SyncCommittee,
    ) -> Result<Self, ProofError> {
        if other_roots.len() != BEACON_STATE_FIELD_COUNT {
            return Err(ProofError::FieldCount {
                expected: BEACON_STATE_FIELD_COUNT,
                got: other_roots.len(),
            });
        }

        other_roots[FINALIZED_CHECKPOINT_FIELD_INDEX] = checkpoint_root(&finalized_checkpoint);
        other_roots[CURRENT_SYNC_COMMITTEE_FIELD_INDEX] = current_sync_committee.root()?;
        other_roots[NEXT_SYNC_COMMITTEE_FIELD_INDEX] = next_sync_committee.root()?;

        Self::new(other_roots, finalized_checkpoint)
    }

    /// Compute the state root from the field roots.
    #[must_use]
    pub fn state_root(&self) -> Node32 {
        merkleize_chunks(&self.field_roots, GindexCalculator::state_tree_depth())
    }

    /// The finalized checkpoint recorded in this state
    #[must_use]
    pub fn finalized_checkpoint(&self) -> &Checkpoint {
        &self.finalized_checkpoint
    }

    fn prove_in_fields(&self, gindex: u64) -> Result<(Node32, Vec<Node32>), ProofError> {
        prove_gindex_in_chunks(
            &self.field_roots,
            GindexCalculator::state_tree_depth(),
            gindex,
        )?
        .ok_or(ProofError::UnsupportedGindex(gindex))
    }
}

impl GindexProver for StateProver {
    fn tree_root(&self) -> Result<Node32, ProofError> {
        Ok(self.state_root())
    }

    fn prove_gindex(&self, gindex: u64) -> Result<(Node32, Vec<Node32>), ProofError> {
        let (depth, _) = GindexCalculator::from_gindex(gindex)?;
        let state_depth = GindexCalculator::state_tree_depth();
        if depth <= state_depth {
            return self.prove_in_fields(gindex);
        }

        // Below the field layer only the finalized checkpoint is expanded
        let below = depth - state_depth;
        let field_gindex = gindex >> below;
        if field_gindex != GindexCalculator::finalized_checkpoint_gindex()
            || below > CHECKPOINT_TREE_DEPTH
        {
            return Err(ProofError::UnsupportedGindex(gindex));
        }

        let inner_gindex = (gindex & ((1 << below) - 1)) | (1 << below);
        let chunks = [
            uint64_chunk(self.finalized_checkpoint.epoch),
            self.finalized_checkpoint.root,
        ];
        let (leaf, mut branch) = prove_gindex_in_chunks(&chunks, CHECKPOINT_TREE_DEPTH, inner_gindex)?
            .ok_or(ProofError::Gindex(GindexError::InvalidIndex(inner_gindex)))?;
        let (_, outer) = self.prove_in_fields(field_gindex)?;
        branch.extend(outer);

        Ok((leaf, branch))
    }
}

/// Hash tree root of a checkpoint container
fn checkpoint_root(checkpoint: &Checkpoint) -> Node32 {
    merkleize_chunks(
        &[uint64_chunk(checkpoint.epoch), checkpoint.root],
        CHECKPOINT_TREE_DEPTH,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gindex::{FINALIZED_ROOT_INDEX, NEXT_SYNC_COMMITTEE_INDEX};
    use crate::merkle::verify_gindex_branch;
    use crate::proof::{HeaderProofBuilder, ProofKind};
    use crate::types::{PUBKEY_LEN, SYNC_COMMITTEE_SIZE};
    use ssz_rs::prelude::*;

    fn committee(seed: u8) -> SyncCommittee {
        let keys = vec![vec![seed; PUBKEY_LEN]; SYNC_COMMITTEE_SIZE];
        SyncCommittee::from_bytes(&keys, &[seed; PUBKEY_LEN]).unwrap()
    }

    fn other_roots() -> Vec<Node32> {
        (0..BEACON_STATE_FIELD_COUNT as u8).map(|i| [i; 32]).collect()
    }

    fn prover() -> StateProver {
        let checkpoint = Checkpoint {
            epoch: 10,
            root: [0xaa; 32],
        };
        StateProver::from_parts(other_roots(), checkpoint, &committee(1), &committee(2)).unwrap()
    }

    #[test]
    fn test_checkpoint_root_matches_ssz_rs() {
        let checkpoint = Checkpoint {
            epoch: 77,
            root: [0x11; 32],
        };
        let expected: [u8; 32] = checkpoint.hash_tree_root().unwrap().into();
        assert_eq!(checkpoint_root(&checkpoint), expected);
    }

    #[test]
    fn test_next_sync_committee_proof_verifies_against_state_root() {
        let prover = prover();
        let (leaf, branch) = prover.prove_gindex(NEXT_SYNC_COMMITTEE_INDEX).unwrap();

        assert_eq!(leaf, committee(2).root().unwrap());
        assert_eq!(branch.len(), 5);
        assert!(verify_gindex_branch(&leaf, &branch, NEXT_SYNC_COMMITTEE_INDEX, &prover.state_root()).unwrap());
    }

    #[test]
    fn test_finalized_root_proof_descends_into_checkpoint() {
        let prover = prover();
        let (leaf, branch) = prover.prove_gindex(FINALIZED_ROOT_INDEX).unwrap();

        assert_eq!(leaf, [0xaa; 32]);
        assert_eq!(branch.len(), 6);
        // first sibling is the epoch chunk of the checkpoint
        assert_eq!(branch[0], uint64_chunk(10));

        let mut builder = HeaderProofBuilder::new();
        builder.prove(ProofKind::Finality, &prover).unwrap();
    }

    #[test]
    fn test_unsupported_deep_gindex() {
        let prover = prover();
        // below current_sync_committee (field 22 → gindex 54)
        assert!(matches!(
            prover.prove_gindex(54 * 2),
            Err(ProofError::UnsupportedGindex(108))
        ));
        // two levels below the checkpoint
        assert!(matches!(
            prover.prove_gindex(FINALIZED_ROOT_INDEX * 2),
            Err(ProofError::UnsupportedGindex(210))
        ));
    }

    #[test]
    fn test_rejects_wrong_field_count() {
        let err = StateProver::new(vec![[0u8; 32]; 5], Checkpoint::default()).unwrap_err();
        assert!(matches!(
            err,
            ProofError::FieldCount {
                expected: 24,
                got: 5
            }
        ));
    }

    #[test]
    fn test_rejects_inconsistent_checkpoint() {
        let err = StateProver::new(other_roots(), Checkpoint::default()).unwrap_err();
        assert!(matches!(err, ProofError::CheckpointMismatch));
    }
}
