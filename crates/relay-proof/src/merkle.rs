//! Binary Merkle Proofs
//!
//! Builds and verifies single-node inclusion proofs over SHA-256 binary
//! Merkle trees of 32-byte chunks, the hashing used by SSZ merkleization.
//!
//! # Approach
//! Proofs are built from the leaf chunks of a container (its field roots),
//! layer by layer, with precomputed "zero hashes" standing in for empty
//! subtrees. Nodes above the leaf layer are addressed by generalized index.

use crate::gindex::{GindexCalculator, GindexError};
use sha2::{Digest, Sha256};

/// Maximum supported tree depth
const MAX_DEPTH: usize = 64;

/// A 32-byte tree node
pub type Node32 = [u8; 32];

/// Precomputed zero hashes for each depth level.
/// `ZERO_HASHES[0]` = all-zeros (the zero leaf).
/// `ZERO_HASHES[i]` = hash(ZERO_HASHES[i-1], ZERO_HASHES[i-1])
fn zero_hashes() -> Vec<Node32> {
    let mut hashes = vec![[0u8; 32]; MAX_DEPTH + 1];
    let mut hasher = Sha256::new();
    for i in 1..=MAX_DEPTH {
        hasher.update(hashes[i - 1]);
        hasher.update(hashes[i - 1]);
        hashes[i] = hasher.finalize_reset().into();
    }
    hashes
}

/// SHA-256 hash of two 32-byte nodes
#[must_use]
pub fn hash_pair(left: &Node32, right: &Node32) -> Node32 {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// SSZ chunk of a `uint64`: little-endian, right-padded to 32 bytes.
#[must_use]
pub fn uint64_chunk(value: u64) -> Node32 {
    let mut chunk = [0u8; 32];
    chunk[..8].copy_from_slice(&value.to_le_bytes());
    chunk
}

/// Verify that `leaf` sits at `index` of a depth-`depth` tree rooted at `root`.
///
/// At level `i`, bit `i` of `index` selects whether the running node is the
/// left (0) or right (1) child. A branch whose length differs from `depth`
/// fails verification. The loop always performs `depth` hashes and the final
/// comparison inspects every byte.
#[must_use]
pub fn verify_merkle_branch(
    leaf: &Node32,
    branch: &[Node32],
    depth: u32,
    index: u64,
    root: &Node32,
) -> bool {
    if depth as usize > MAX_DEPTH || branch.len() != depth as usize {
        return false;
    }
    if depth < 64 && index >> depth != 0 {
        return false;
    }

    let mut value = *leaf;
    for (level, sibling) in branch.iter().enumerate() {
        value = if (index >> level) & 1 == 0 {
            hash_pair(&value, sibling)
        } else {
            hash_pair(sibling, &value)
        };
    }

    nodes_equal(&value, root)
}

/// Verify a branch addressed by generalized index.
///
/// # Errors
/// Returns [`GindexError::InvalidIndex`] if `gindex < 2`.
pub fn verify_gindex_branch(
    leaf: &Node32,
    branch: &[Node32],
    gindex: u64,
    root: &Node32,
) -> Result<bool, GindexError> {
    let (depth, index) = GindexCalculator::from_gindex(gindex)?;
    Ok(verify_merkle_branch(leaf, branch, depth, index, root))
}

fn nodes_equal(a: &Node32, b: &Node32) -> bool {
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Generate a Merkle proof for `leaf_chunks[index]` in a tree of depth `depth`.
///
/// `leaf_chunks` contains the actual (non-zero) leaves, and `depth` is the
/// total tree depth (i.e., the tree has `2^depth` leaf slots).
/// For leaves beyond `leaf_chunks.len()`, zero hashes are used.
///
/// Returns `(proof, root)` where `proof` is the list of sibling hashes
/// from leaf to root (length = depth).
///
/// # Panics
/// Panics if `index` does not fit in a tree of depth `depth`.
#[must_use]
pub fn prove_against_leaf_chunks(
    leaf_chunks: &[Node32],
    index: usize,
    depth: u32,
) -> (Vec<Node32>, Node32) {
    let zh = zero_hashes();
    let leaf_count = 1usize << depth;
    assert!(index < leaf_count, "index {index} out of range for depth {depth}");

    let mut proof = Vec::with_capacity(depth as usize);
    let mut pos = index;

    // At level `level` each node covers 2^level leaves; the sibling of the
    // target's ancestor is the root of the subtree starting at
    // `sibling_pos * 2^level`.
    for level in 0..depth {
        let sibling_pos = pos ^ 1;
        let start = sibling_pos << level;
        proof.push(compute_subtree_root(leaf_chunks, start, level as usize, &zh));
        pos /= 2;
    }

    let mut current = get_leaf(leaf_chunks, index);
    for (level, sibling) in proof.iter().enumerate() {
        current = if (index >> level) & 1 == 0 {
            hash_pair(&current, sibling)
        } else {
            hash_pair(sibling, &current)
        };
    }

    (proof, current)
}

/// Root of a tree of depth `depth` over `leaf_chunks`, zero-padded.
#[must_use]
pub fn merkleize_chunks(leaf_chunks: &[Node32], depth: u32) -> Node32 {
    let zh = zero_hashes();
    compute_subtree_root(leaf_chunks, 0, depth as usize, &zh)
}

/// Prove the node at `gindex` of a depth-`depth` tree over `leaf_chunks`.
///
/// Unlike [`prove_against_leaf_chunks`] the target may be an inner node: its
/// value is the root of the subtree it covers.
///
/// Returns `(node, proof)`, or `None` if `gindex` lies below the leaf layer.
///
/// # Errors
/// Returns [`GindexError::InvalidIndex`] if `gindex < 2`.
pub fn prove_gindex_in_chunks(
    leaf_chunks: &[Node32],
    depth: u32,
    gindex: u64,
) -> Result<Option<(Node32, Vec<Node32>)>, GindexError> {
    let (node_depth, node_index) = GindexCalculator::from_gindex(gindex)?;
    if node_depth > depth {
        return Ok(None);
    }

    let below = depth - node_depth;
    let Ok(first_leaf) = usize::try_from(node_index << below) else {
        return Ok(None);
    };

    let zh = zero_hashes();
    let node = compute_subtree_root(leaf_chunks, first_leaf, below as usize, &zh);
    let (proof, _) = prove_against_leaf_chunks(leaf_chunks, first_leaf, depth);

    Ok(Some((node, proof[below as usize..].to_vec())))
}

/// Get a leaf value, returning zero hash if out of bounds
fn get_leaf(leaf_chunks: &[Node32], index: usize) -> Node32 {
    leaf_chunks.get(index).copied().unwrap_or([0u8; 32])
}

/// Compute the root of a subtree starting at leaf index `start` with depth `depth`.
/// Uses zero hashes for missing leaves.
fn compute_subtree_root(
    leaf_chunks: &[Node32],
    start: usize,
    depth: usize,
    zh: &[Node32],
) -> Node32 {
    if depth == 0 {
        return get_leaf(leaf_chunks, start);
    }

    // If all leaves in this subtree are beyond our data, use precomputed zero hash
    if start >= leaf_chunks.len() {
        return zh[depth];
    }

    let half = 1usize << (depth - 1);
    let left = compute_subtree_root(leaf_chunks, start, depth - 1, zh);
    let right = compute_subtree_root(leaf_chunks, start + half, depth - 1, zh);
    hash_pair(&left, &right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_hashes() {
        let zh = zero_hashes();
        assert_eq!(zh[0], [0u8; 32]);
        assert_eq!(zh[1], hash_pair(&[0u8; 32], &[0u8; 32]));
        assert_eq!(zh[2], hash_pair(&zh[1], &zh[1]));
    }

    #[test]
    fn test_prove_two_leaves() {
        let leaves = vec![[1u8; 32], [2u8; 32]];
        let (proof, root) = prove_against_leaf_chunks(&leaves, 0, 1);
        assert_eq!(proof, vec![[2u8; 32]]);
        assert_eq!(root, hash_pair(&[1u8; 32], &[2u8; 32]));

        let (proof, root2) = prove_against_leaf_chunks(&leaves, 1, 1);
        assert_eq!(proof, vec![[1u8; 32]]);
        assert_eq!(root2, root);
    }

    #[test]
    fn test_prove_with_virtual_padding() {
        // 3 actual leaves in a depth-2 tree (4 leaf slots)
        let leaves = vec![[1u8; 32], [2u8; 32], [3u8; 32]];
        let (proof, root) = prove_against_leaf_chunks(&leaves, 0, 2);
        assert_eq!(proof[0], [2u8; 32]);
        assert_eq!(proof[1], hash_pair(&[3u8; 32], &[0u8; 32]));
        assert_eq!(root, merkleize_chunks(&leaves, 2));
    }

    #[test]
    fn test_verify_accepts_generated_proof() {
        let leaves: Vec<Node32> = (1..=5u8).map(|i| [i; 32]).collect();
        let (proof, root) = prove_against_leaf_chunks(&leaves, 3, 3);
        assert!(verify_merkle_branch(&leaves[3], &proof, 3, 3, &root));
        // gindex 8 + 3
        assert_eq!(verify_gindex_branch(&leaves[3], &proof, 11, &root), Ok(true));
    }

    #[test]
    fn test_verify_rejects_wrong_position() {
        let leaves: Vec<Node32> = (1..=4u8).map(|i| [i; 32]).collect();
        let (proof, root) = prove_against_leaf_chunks(&leaves, 2, 2);
        assert!(!verify_merkle_branch(&leaves[2], &proof, 2, 1, &root));
        assert!(!verify_merkle_branch(&leaves[1], &proof, 2, 2, &root));
    }

    #[test]
    fn test_verify_length_mismatch_is_false() {
        let leaves: Vec<Node32> = (1..=4u8).map(|i| [i; 32]).collect();
        let (mut proof, root) = prove_against_leaf_chunks(&leaves, 0, 2);
        assert!(!verify_merkle_branch(&leaves[0], &proof, 3, 0, &root));
        proof.pop();
        assert!(!verify_merkle_branch(&leaves[0], &proof, 2, 0, &root));
    }

    #[test]
    fn test_verify_index_out_of_range_is_false() {
        let leaves = vec![[7u8; 32], [8u8; 32]];
        let (proof, root) = prove_against_leaf_chunks(&leaves, 0, 1);
        assert!(!verify_merkle_branch(&leaves[0], &proof, 1, 2, &root));
    }

    #[test]
    fn test_verify_gindex_rejects_root() {
        assert_eq!(
            verify_gindex_branch(&[0u8; 32], &[], 1, &[0u8; 32]),
            Err(GindexError::InvalidIndex(1))
        );
    }

    #[test]
    fn test_prove_inner_node() {
        let leaves: Vec<Node32> = (1..=8u8).map(|i| [i; 32]).collect();
        let root = merkleize_chunks(&leaves, 3);

        // gindex 3 is the right half of the tree
        let (node, proof) = prove_gindex_in_chunks(&leaves, 3, 3).unwrap().unwrap();
        assert_eq!(node, merkleize_chunks(&leaves[4..], 2));
        assert_eq!(proof.len(), 1);
        assert!(verify_gindex_branch(&node, &proof, 3, &root).unwrap());

        // below the leaf layer
        assert!(prove_gindex_in_chunks(&leaves, 3, 16).unwrap().is_none());
    }

    #[test]
    fn test_uint64_chunk() {
        let chunk = uint64_chunk(0x0102);
        assert_eq!(chunk[0], 0x02);
        assert_eq!(chunk[1], 0x01);
        assert!(chunk[2..].iter().all(|b| *b == 0));
    }

    proptest! {
        #[test]
        fn prop_single_byte_flip_breaks_branch(
            seeds in proptest::collection::vec(any::<u8>(), 1..16),
            depth in 1_u32..6,
            index_seed in any::<u64>(),
            element_seed in any::<usize>(),
            byte in 0_usize..32,
            mask in 1_u8..,
        ) {
            let leaves: Vec<Node32> = seeds.iter().map(|s| [*s; 32]).collect();
            let index = index_seed % (1_u64 << depth);
            let (mut proof, root) = prove_against_leaf_chunks(&leaves, index as usize, depth);
            let leaf = leaves.get(index as usize).copied().unwrap_or([0u8; 32]);

            prop_assert!(verify_merkle_branch(&leaf, &proof, depth, index, &root));

            let element = element_seed % proof.len();
            proof[element][byte] ^= mask;
            prop_assert!(!verify_merkle_branch(&leaf, &proof, depth, index, &root));
        }
    }
}
