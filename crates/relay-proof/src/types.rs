//! Beacon Chain Types
//!
//! SSZ-compatible header and sync committee types, plus the per-period
//! `CommitteeUpdate` the data source hands to the assembler.
//! SSZ types derive `ssz_rs` traits for hash tree roots.

use crate::merkle::{uint64_chunk, Node32};
use ssz_rs::prelude::*;
use thiserror::Error;

/// Preset constants - `minimal` overrides the mainnet timings
#[cfg(not(feature = "minimal"))]
pub mod preset {
    /// Slots per epoch on mainnet
    pub const SLOTS_PER_EPOCH: u64 = 32;
    /// Epochs per sync committee period on mainnet
    pub const EPOCHS_PER_SYNC_COMMITTEE_PERIOD: u64 = 256;
    /// Seconds per slot on mainnet
    pub const SECONDS_PER_SLOT: u64 = 12;
}

#[cfg(feature = "minimal")]
pub mod preset {
    /// Slots per epoch in minimal preset
    pub const SLOTS_PER_EPOCH: u64 = 8;
    /// Epochs per sync committee period in minimal preset
    pub const EPOCHS_PER_SYNC_COMMITTEE_PERIOD: u64 = 8;
    /// Seconds per slot in minimal preset
    pub const SECONDS_PER_SLOT: u64 = 6;
}

/// Committee size the relay contract is built for
pub const SYNC_COMMITTEE_SIZE: usize = 512;

/// Compressed BLS public key length
pub const PUBKEY_LEN: usize = 48;

/// Compressed BLS signature length
pub const SIGNATURE_LEN: usize = 96;

/// Compressed BLS public key
pub type BlsPublicKey = Vector<u8, PUBKEY_LEN>;

/// Errors converting raw bytes into beacon types.
#[derive(Debug, Error)]
pub enum TypeError {
    #[error("Invalid length for {field}: expected {expected}, got {got}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Invalid hex for {field}: {reason}")]
    InvalidHex { field: &'static str, reason: String },

    #[error("SSZ merkleization error: {0}")]
    Merkleization(String),
}

/// Beacon block header
#[derive(Debug, Clone, Default, PartialEq, Eq, SimpleSerialize)]
pub struct BeaconBlockHeader {
    /// Slot number
    pub slot: u64,
    /// Proposer validator index
    pub proposer_index: u64,
    /// Root of the parent block
    pub parent_root: [u8; 32],
    /// Root of the beacon state
    pub state_root: [u8; 32],
    /// Root of the block body
    pub body_root: [u8; 32],
}

impl BeaconBlockHeader {
    /// Number of fields in the container
    pub const FIELD_COUNT: usize = 5;

    /// Field roots in declaration order; the leaves of the header tree.
    #[must_use]
    pub fn field_chunks(&self) -> [Node32; Self::FIELD_COUNT] {
        [
            uint64_chunk(self.slot),
            uint64_chunk(self.proposer_index),
            self.parent_root,
            self.state_root,
            self.body_root,
        ]
    }

    /// The block root (hash tree root of the header).
    ///
    /// # Errors
    /// Returns an error if SSZ merkleization fails.
    pub fn block_root(&self) -> Result<Node32, TypeError> {
        let root = self
            .hash_tree_root()
            .map_err(|e| TypeError::Merkleization(format!("{e:?}")))?;
        Ok(root.into())
    }
}

/// Finality checkpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, SimpleSerialize)]
pub struct Checkpoint {
    pub epoch: u64,
    pub root: [u8; 32],
}

/// Sync committee (Altair+)
#[derive(Debug, Clone, PartialEq, Eq, SimpleSerialize)]
pub struct SyncCommittee {
    pub pubkeys: Vector<BlsPublicKey, SYNC_COMMITTEE_SIZE>,
    pub aggregate_pubkey: BlsPublicKey,
}

impl Default for SyncCommittee {
    fn default() -> Self {
        Self {
            pubkeys: Default::default(),
            aggregate_pubkey: Vector::default(),
        }
    }
}

impl SyncCommittee {
    /// Build a committee from raw compressed keys.
    ///
    /// # Errors
    /// Returns an error unless there are exactly 512 keys of 48 bytes each.
    pub fn from_bytes(pubkeys: &[Vec<u8>], aggregate_pubkey: &[u8]) -> Result<Self, TypeError> {
        if pubkeys.len() != SYNC_COMMITTEE_SIZE {
            return Err(TypeError::InvalidLength {
                field: "pubkeys",
                expected: SYNC_COMMITTEE_SIZE,
                got: pubkeys.len(),
            });
        }

        let keys = pubkeys
            .iter()
            .map(|key| bls_pubkey(key, "pubkeys"))
            .collect::<Result<Vec<_>, _>>()?;
        let pubkeys = Vector::try_from(keys).map_err(|_| TypeError::InvalidLength {
            field: "pubkeys",
            expected: SYNC_COMMITTEE_SIZE,
            got: pubkeys.len(),
        })?;

        Ok(Self {
            pubkeys,
            aggregate_pubkey: bls_pubkey(aggregate_pubkey, "aggregate_pubkey")?,
        })
    }

    /// Hash tree root; the leaf of a sync committee inclusion proof.
    ///
    /// # Errors
    /// Returns an error if SSZ merkleization fails.
    pub fn root(&self) -> Result<Node32, TypeError> {
        let root = self
            .hash_tree_root()
            .map_err(|e| TypeError::Merkleization(format!("{e:?}")))?;
        Ok(root.into())
    }

    /// Member keys as raw bytes, in committee order.
    #[must_use]
    pub fn pubkey_bytes(&self) -> Vec<Vec<u8>> {
        self.pubkeys.iter().map(|key| key.to_vec()).collect()
    }
}

fn bls_pubkey(bytes: &[u8], field: &'static str) -> Result<BlsPublicKey, TypeError> {
    Vector::try_from(bytes.to_vec()).map_err(|_| TypeError::InvalidLength {
        field,
        expected: PUBKEY_LEN,
        got: bytes.len(),
    })
}

/// One light-client committee update, as published for a sync committee period.
///
/// `header` is the finalized header; `finality_header` is the later header
/// whose state records `header` as finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitteeUpdate {
    /// Finalized header
    pub header: BeaconBlockHeader,
    /// Latest (finalizing) header
    pub finality_header: BeaconBlockHeader,
    /// Proof of the finalized root in the latest state
    pub finality_branch: Vec<Node32>,
    /// Committee for the following period
    pub next_sync_committee: SyncCommittee,
    /// Proof of `next_sync_committee` in the finalized state
    pub next_sync_committee_branch: Vec<Node32>,
    /// Aggregate signature of the participating members
    pub sync_committee_signature: [u8; SIGNATURE_LEN],
    /// Participation flags, one per committee member
    pub sync_committee_bits: Vec<bool>,
}

/// Unpack an SSZ bitvector (LSB-first within each byte).
#[must_use]
pub fn unpack_bits(bytes: &[u8], len: usize) -> Vec<bool> {
    (0..len)
        .map(|i| bytes.get(i / 8).is_some_and(|byte| (byte >> (i % 8)) & 1 == 1))
        .collect()
}

/// Encode bytes as `0x`-prefixed lowercase hex
#[must_use]
pub fn to_hex(bytes: impl AsRef<[u8]>) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decode `0x`-prefixed (or bare) hex
///
/// # Errors
/// Returns an error on invalid hex.
pub fn from_hex(s: &str, field: &'static str) -> Result<Vec<u8>, TypeError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| TypeError::InvalidHex {
        field,
        reason: e.to_string(),
    })
}

/// Decode hex into a fixed-size array
///
/// # Errors
/// Returns an error on invalid hex or a length mismatch.
pub fn from_hex_array<const N: usize>(s: &str, field: &'static str) -> Result<[u8; N], TypeError> {
    let bytes = from_hex(s, field)?;
    let got = bytes.len();
    bytes.try_into().map_err(|_| TypeError::InvalidLength {
        field,
        expected: N,
        got,
    })
}

// Hex encoding helpers for serde
pub(crate) mod hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::to_hex(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::from_hex_array(&s, "bytes").map_err(serde::de::Error::custom)
    }
}

/// Custom serde for `Vec<[u8; 32]>` as hex strings
pub(crate) mod hex_bytes32_vec {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S>(data: &Vec<[u8; 32]>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let hex_strings: Vec<String> = data.iter().map(super::to_hex).collect();
        hex_strings.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<[u8; 32]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex_strings: Vec<String> = Vec::deserialize(deserializer)?;
        hex_strings
            .iter()
            .map(|s| super::from_hex_array(s, "bytes32").map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Custom serde for variable-length byte strings as hex
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::to_hex(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::from_hex(&s, "bytes").map_err(serde::de::Error::custom)
    }
}

/// Custom serde for lists of variable-length byte strings as hex
pub(crate) mod hex_bytes_vec {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S>(data: &Vec<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let hex_strings: Vec<String> = data.iter().map(super::to_hex).collect();
        hex_strings.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex_strings: Vec<String> = Vec::deserialize(deserializer)?;
        hex_strings
            .iter()
            .map(|s| super::from_hex(s, "bytes").map_err(serde::de::Error::custom))
            .collect()
    }
}
