//! Generalized Index Computation
//!
//! Computes generalized indices (gindices) for the header and state proofs
//! carried in a relay update, and converts them into the `(depth, index)`
//! coordinates the relay contract's branch verifier takes.
//! These must match the Solidity contract's hardcoded constants.

use thiserror::Error;

/// Errors from generalized index arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GindexError {
    #[error("Invalid generalized index {0}: the root (1) and 0 have no branch")]
    InvalidIndex(u64),
}

/// `slot` field of a `BeaconBlockHeader`
pub const SLOT_INDEX: u64 = 8;

/// `state_root` field of a `BeaconBlockHeader`
pub const STATE_ROOT_INDEX: u64 = 11;

/// `current_sync_committee` field of an Altair `BeaconState`
pub const CURRENT_SYNC_COMMITTEE_INDEX: u64 = 54;

/// `next_sync_committee` field of an Altair `BeaconState`
pub const NEXT_SYNC_COMMITTEE_INDEX: u64 = 55;

/// `finalized_checkpoint.root` of an Altair `BeaconState`
pub const FINALIZED_ROOT_INDEX: u64 = 105;

/// Calculator for generalized indices in the header and beacon state trees
#[derive(Debug, Clone, Copy)]
pub struct GindexCalculator;

impl GindexCalculator {
    // BeaconBlockHeader structure constants
    // Header has 5 fields, tree depth 3 (2^3 = 8 >= 5)
    const HEADER_TREE_DEPTH: u32 = 3;
    const HEADER_BASE_GINDEX: u64 = 8; // 2^3

    const SLOT_FIELD_INDEX: u64 = 0;
    const STATE_ROOT_FIELD_INDEX: u64 = 3;

    // BeaconState structure constants
    // Altair BeaconState has 24 fields, giving a tree depth of 5 (2^5 = 32 >= 24)
    const BEACON_STATE_TREE_DEPTH: u32 = 5;
    const BEACON_STATE_BASE_GINDEX: u64 = 32; // 2^5

    const FINALIZED_CHECKPOINT_FIELD_INDEX: u64 = 20;
    const CURRENT_SYNC_COMMITTEE_FIELD_INDEX: u64 = 22;
    const NEXT_SYNC_COMMITTEE_FIELD_INDEX: u64 = 23;

    // Checkpoint has 2 fields (epoch, root), tree depth 1
    const CHECKPOINT_BASE_GINDEX: u64 = 2;
    const CHECKPOINT_ROOT_FIELD_INDEX: u64 = 1;

    /// Gindex of `slot` within a header
    #[must_use]
    pub const fn header_slot_gindex() -> u64 {
        Self::HEADER_BASE_GINDEX + Self::SLOT_FIELD_INDEX
    }

    /// Gindex of `state_root` within a header
    #[must_use]
    pub const fn header_state_root_gindex() -> u64 {
        Self::HEADER_BASE_GINDEX + Self::STATE_ROOT_FIELD_INDEX
    }

    /// Gindex of `current_sync_committee` within the state
    #[must_use]
    pub const fn current_sync_committee_gindex() -> u64 {
        Self::BEACON_STATE_BASE_GINDEX + Self::CURRENT_SYNC_COMMITTEE_FIELD_INDEX
    }

    /// Gindex of `next_sync_committee` within the state
    #[must_use]
    pub const fn next_sync_committee_gindex() -> u64 {
        Self::BEACON_STATE_BASE_GINDEX + Self::NEXT_SYNC_COMMITTEE_FIELD_INDEX
    }

    /// Gindex of the `finalized_checkpoint` container within the state
    #[must_use]
    pub const fn finalized_checkpoint_gindex() -> u64 {
        Self::BEACON_STATE_BASE_GINDEX + Self::FINALIZED_CHECKPOINT_FIELD_INDEX
    }

    /// Gindex of `finalized_checkpoint.root` within the state
    ///
    /// Path: state → finalized_checkpoint → root
    #[must_use]
    pub fn finalized_root_gindex() -> u64 {
        Self::concat_gindices(&[
            Self::finalized_checkpoint_gindex(),
            Self::CHECKPOINT_BASE_GINDEX + Self::CHECKPOINT_ROOT_FIELD_INDEX,
        ])
    }

    /// Depth of the header container tree
    #[must_use]
    pub const fn header_tree_depth() -> u32 {
        Self::HEADER_TREE_DEPTH
    }

    /// Depth of the Altair state container tree
    #[must_use]
    pub const fn state_tree_depth() -> u32 {
        Self::BEACON_STATE_TREE_DEPTH
    }

    /// Concatenate generalized indices along a path
    ///
    /// Given a sequence of gindices representing a path through nested structures,
    /// compute the final gindex from the outermost root. Entries below 2
    /// add no step to the path.
    #[must_use]
    pub fn concat_gindices(gindices: &[u64]) -> u64 {
        let mut result = 1_u64; // Start at root

        for &gindex in gindices.iter().filter(|&&g| g >= 2) {
            let depth = Self::gindex_depth(gindex);
            result = (result << depth) | (gindex ^ (1_u64 << depth));
        }

        result
    }

    /// Compute the depth (number of proof elements) for a given gindex.
    /// 0 is not a tree position and reports depth 0.
    #[must_use]
    pub const fn gindex_depth(gindex: u64) -> u32 {
        match gindex.checked_ilog2() {
            Some(depth) => depth,
            None => 0,
        }
    }

    /// Split a gindex into `(depth, index_at_depth)`.
    ///
    /// The depth is the integer bit length minus one, so no floating point
    /// rounding is involved for large trees.
    ///
    /// # Errors
    /// Returns [`GindexError::InvalidIndex`] for `gindex < 2`.
    pub const fn from_gindex(gindex: u64) -> Result<(u32, u64), GindexError> {
        if gindex < 2 {
            return Err(GindexError::InvalidIndex(gindex));
        }
        let depth = Self::gindex_depth(gindex);
        Ok((depth, gindex ^ (1_u64 << depth)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_relay_gindices() {
        assert_eq!(GindexCalculator::from_gindex(SLOT_INDEX), Ok((3, 0)));
        assert_eq!(GindexCalculator::from_gindex(STATE_ROOT_INDEX), Ok((3, 3)));
        assert_eq!(
            GindexCalculator::from_gindex(NEXT_SYNC_COMMITTEE_INDEX),
            Ok((5, 23))
        );
        assert_eq!(
            GindexCalculator::from_gindex(FINALIZED_ROOT_INDEX),
            Ok((6, 41))
        );
    }

    #[test]
    fn test_constants_match_layout() {
        assert_eq!(GindexCalculator::header_slot_gindex(), SLOT_INDEX);
        assert_eq!(GindexCalculator::header_state_root_gindex(), STATE_ROOT_INDEX);
        assert_eq!(
            GindexCalculator::current_sync_committee_gindex(),
            CURRENT_SYNC_COMMITTEE_INDEX
        );
        assert_eq!(
            GindexCalculator::next_sync_committee_gindex(),
            NEXT_SYNC_COMMITTEE_INDEX
        );
        assert_eq!(GindexCalculator::finalized_root_gindex(), FINALIZED_ROOT_INDEX);
    }

    #[test]
    fn test_root_and_zero_are_invalid() {
        assert_eq!(
            GindexCalculator::from_gindex(0),
            Err(GindexError::InvalidIndex(0))
        );
        assert_eq!(
            GindexCalculator::from_gindex(1),
            Err(GindexError::InvalidIndex(1))
        );
    }

    #[test]
    fn test_zero_gindex_does_not_overflow() {
        assert_eq!(GindexCalculator::gindex_depth(0), 0);
        assert_eq!(GindexCalculator::gindex_depth(1), 0);
        assert_eq!(GindexCalculator::concat_gindices(&[0]), 1);
        assert_eq!(GindexCalculator::concat_gindices(&[1, 0, SLOT_INDEX]), SLOT_INDEX);
    }

    #[test]
    fn test_from_gindex_large_values() {
        // 2^53 + 1 is where f64 log2 stops being trustworthy
        let gindex = (1_u64 << 53) + 1;
        assert_eq!(GindexCalculator::from_gindex(gindex), Ok((53, 1)));
        assert_eq!(GindexCalculator::from_gindex(u64::MAX), Ok((63, (1 << 63) - 1)));
    }

    #[test]
    fn test_concat_gindices_simple() {
        // Single gindex returns itself
        assert_eq!(GindexCalculator::concat_gindices(&[11]), 11);
        assert_eq!(GindexCalculator::concat_gindices(&[2, 3]), 5);
        assert_eq!(GindexCalculator::concat_gindices(&[52, 3]), 105);
    }

    #[test]
    fn test_gindex_depth() {
        assert_eq!(GindexCalculator::gindex_depth(1), 0); // root
        assert_eq!(GindexCalculator::gindex_depth(2), 1);
        assert_eq!(GindexCalculator::gindex_depth(7), 2);
        assert_eq!(GindexCalculator::gindex_depth(8), 3);
    }

    proptest! {
        #[test]
        fn prop_from_gindex_recomposes(gindex in 2_u64..) {
            let (depth, index) = GindexCalculator::from_gindex(gindex).unwrap();
            let first = 1_u64 << depth;
            prop_assert!(index < first);
            prop_assert_eq!(first + index, gindex);
        }
    }
}
