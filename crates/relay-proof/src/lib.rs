//! # Relay Proof Library
//!
//! Assembles and self-verifies the update record that advances an on-chain
//! beacon chain light-client relay by one sync committee period:
//! - slot and state root proofs of the latest and finalized headers
//! - the next sync committee proof in the finalized state
//! - the finality proof of the finalized block root in the latest state
//! - the signing committee, taken from the prior period's update
//! - the sync committee signing domain

pub mod assembler;
pub mod beacon_client;
pub mod committee;
pub mod fixture;
pub mod gindex;
pub mod merkle;
pub mod proof;
pub mod source;
pub mod state_prover;
pub mod types;
pub mod update;

pub use assembler::{AssembleError, UpdateAssembler};
pub use beacon_client::BeaconClient;
pub use committee::{ForkSchedule, Network, ResolveError, ResolvedCommittee, SyncCommitteePeriodResolver};
pub use fixture::FixtureSource;
pub use gindex::GindexCalculator;
pub use proof::{HeaderProofBuilder, ProofCheck, ProofError, ProofKind};
pub use source::{BeaconDataSource, SourceError};
pub use state_prover::StateProver;
pub use types::*;
pub use update::{ChainRelayUpdate, RelayInit};
