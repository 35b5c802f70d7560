//! Merkle proof generation and self-verification for relay updates.
//!
//! This module derives and checks the structural proofs a relay update needs:
//! 1. `slot` and `state_root` of the latest header, against its block root
//! 2. `slot` and `state_root` of the finalized header, against its block root
//! 3. `next_sync_committee` in the finalized state
//! 4. `finalized_checkpoint.root` in the latest state
//!
//! Every branch is verified as soon as it is produced, so an inconsistent
//! header/state pair from the data source fails here instead of on-chain.

use crate::gindex::{
    GindexCalculator, GindexError, FINALIZED_ROOT_INDEX, NEXT_SYNC_COMMITTEE_INDEX, SLOT_INDEX,
    STATE_ROOT_INDEX,
};
use crate::merkle::{prove_gindex_in_chunks, verify_gindex_branch, Node32};
use crate::types::{BeaconBlockHeader, SyncCommittee, TypeError};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur during proof generation.
#[derive(Error, Debug)]
pub enum ProofError {
    #[error("{proof} proof did not validate")]
    Invalid { proof: ProofKind },

    #[error(transparent)]
    Gindex(#[from] GindexError),

    #[error("Generalized index {0} is not provable in this tree")]
    UnsupportedGindex(u64),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("Expected {expected} state field roots, got {got}")]
    FieldCount { expected: usize, got: usize },

    #[error("Finalized checkpoint does not match its state field root")]
    CheckpointMismatch,
}

/// The proofs a relay update carries or depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofKind {
    /// `slot` of the latest header
    LatestSlot,
    /// `state_root` of the latest header
    LatestStateRoot,
    /// `slot` of the finalized header
    FinalizedSlot,
    /// `state_root` of the finalized header
    FinalizedStateRoot,
    /// `next_sync_committee` in the finalized state of the target period
    NextSyncCommittee,
    /// finalized block root in the latest state
    Finality,
    /// `next_sync_committee` in the finalized state of the prior period
    PriorSyncCommittee,
}

impl ProofKind {
    /// Generalized index the proof is taken at
    #[must_use]
    pub const fn gindex(self) -> u64 {
        match self {
            Self::LatestSlot | Self::FinalizedSlot => SLOT_INDEX,
            Self::LatestStateRoot | Self::FinalizedStateRoot => STATE_ROOT_INDEX,
            Self::NextSyncCommittee | Self::PriorSyncCommittee => NEXT_SYNC_COMMITTEE_INDEX,
            Self::Finality => FINALIZED_ROOT_INDEX,
        }
    }

    /// Name used in logs and revert-style messages
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::LatestSlot => "latest slot",
            Self::LatestStateRoot => "latest state root",
            Self::FinalizedSlot => "finalized slot",
            Self::FinalizedStateRoot => "finalized state root",
            Self::NextSyncCommittee => "next sync committee",
            Self::Finality => "finality",
            Self::PriorSyncCommittee => "prior sync committee",
        }
    }
}

impl fmt::Display for ProofKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one self-check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofCheck {
    pub proof: ProofKind,
    pub valid: bool,
}

/// A tree that can produce single-node inclusion proofs by generalized index.
pub trait GindexProver {
    /// Root of the tree
    ///
    /// # Errors
    /// Returns an error if the root cannot be computed.
    fn tree_root(&self) -> Result<Node32, ProofError>;

    /// `(node, branch)` for the node at `gindex`, branch ordered leaf to root
    ///
    /// # Errors
    /// Returns an error if `gindex` is not addressable in this tree.
    fn prove_gindex(&self, gindex: u64) -> Result<(Node32, Vec<Node32>), ProofError>;
}

impl GindexProver for BeaconBlockHeader {
    fn tree_root(&self) -> Result<Node32, ProofError> {
        Ok(self.block_root()?)
    }

    fn prove_gindex(&self, gindex: u64) -> Result<(Node32, Vec<Node32>), ProofError> {
        prove_gindex_in_chunks(
            &self.field_chunks(),
            GindexCalculator::header_tree_depth(),
            gindex,
        )?
        .ok_or(ProofError::UnsupportedGindex(gindex))
    }
}

/// A branch that has passed verification against `root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedBranch {
    pub proof: ProofKind,
    pub leaf: Node32,
    pub branch: Vec<Node32>,
    pub root: Node32,
}

/// Builds relay proofs and records the outcome of every check.
#[derive(Debug, Clone, Default)]
pub struct HeaderProofBuilder {
    checks: Vec<ProofCheck>,
}

impl HeaderProofBuilder {
    /// Create a new builder with an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prove `proof` in `tree` and verify it against the tree's own root.
    ///
    /// # Errors
    /// Returns [`ProofError::Invalid`] if the branch does not verify.
    pub fn prove<T: GindexProver>(
        &mut self,
        proof: ProofKind,
        tree: &T,
    ) -> Result<VerifiedBranch, ProofError> {
        let root = tree.tree_root()?;
        self.prove_against(proof, tree, root)
    }

    /// Prove `proof` in `tree` and verify it against an externally supplied root.
    ///
    /// Used when the root is authoritative (e.g. the canonical block root for
    /// a slot), so a header that does not hash to it is caught.
    ///
    /// # Errors
    /// Returns [`ProofError::Invalid`] if the branch does not verify.
    pub fn prove_against<T: GindexProver>(
        &mut self,
        proof: ProofKind,
        tree: &T,
        root: Node32,
    ) -> Result<VerifiedBranch, ProofError> {
        let (leaf, branch) = tree.prove_gindex(proof.gindex())?;
        self.check(proof, leaf, branch, root)
    }

    /// Verify a branch produced elsewhere (e.g. by the beacon node).
    ///
    /// # Errors
    /// Returns [`ProofError::Invalid`] if the branch does not verify.
    pub fn check(
        &mut self,
        proof: ProofKind,
        leaf: Node32,
        branch: Vec<Node32>,
        root: Node32,
    ) -> Result<VerifiedBranch, ProofError> {
        let valid = verify_gindex_branch(&leaf, &branch, proof.gindex(), &root)?;
        self.checks.push(ProofCheck { proof, valid });

        if !valid {
            warn!(%proof, gindex = proof.gindex(), "Proof failed self-verification");
            return Err(ProofError::Invalid { proof });
        }

        debug!(%proof, depth = branch.len(), "Proof verified");
        Ok(VerifiedBranch {
            proof,
            leaf,
            branch,
            root,
        })
    }

    /// Verify a sync committee branch against a state root.
    ///
    /// # Errors
    /// Returns [`ProofError::Invalid`] if the branch does not verify.
    pub fn check_sync_committee(
        &mut self,
        proof: ProofKind,
        committee: &SyncCommittee,
        branch: &[Node32],
        state_root: Node32,
    ) -> Result<VerifiedBranch, ProofError> {
        let leaf = committee.root()?;
        self.check(proof, leaf, branch.to_vec(), state_root)
    }

    /// Verify that `finalized_block_root` is the finalized checkpoint root
    /// recorded in the state at `state_root`.
    ///
    /// # Errors
    /// Returns [`ProofError::Invalid`] if the branch does not verify.
    pub fn check_finality(
        &mut self,
        finalized_block_root: Node32,
        branch: &[Node32],
        state_root: Node32,
    ) -> Result<VerifiedBranch, ProofError> {
        self.check(
            ProofKind::Finality,
            finalized_block_root,
            branch.to_vec(),
            state_root,
        )
    }

    /// Checks performed so far, in order
    #[must_use]
    pub fn checks(&self) -> &[ProofCheck] {
        &self.checks
    }

    /// Consume the builder, returning its report
    #[must_use]
    pub fn into_checks(self) -> Vec<ProofCheck> {
        self.checks
    }
}
