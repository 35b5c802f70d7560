//! Beacon Data Source
//!
//! The read-only capability the assembler pulls consensus objects through.
//! `BeaconClient` serves it over the Beacon API; `FixtureSource` serves it
//! from memory for tests and fixture generation.

use crate::merkle::Node32;
use crate::types::{CommitteeUpdate, TypeError};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors from beacon data source queries
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<TypeError> for SourceError {
    fn from(e: TypeError) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}

/// Typed queries against a beacon chain data provider.
#[async_trait]
pub trait BeaconDataSource: Send + Sync {
    /// Committee update published for sync committee `period`
    async fn get_committee_update(&self, period: u64) -> Result<CommitteeUpdate, SourceError>;

    /// Canonical block root at `slot`
    async fn get_block_root(&self, slot: u64) -> Result<Node32, SourceError>;

    /// Genesis validators root of the chain
    async fn get_genesis_validators_root(&self) -> Result<Node32, SourceError>;
}

#[async_trait]
impl<T: BeaconDataSource + ?Sized> BeaconDataSource for Arc<T> {
    async fn get_committee_update(&self, period: u64) -> Result<CommitteeUpdate, SourceError> {
        (**self).get_committee_update(period).await
    }

    async fn get_block_root(&self, slot: u64) -> Result<Node32, SourceError> {
        (**self).get_block_root(slot).await
    }

    async fn get_genesis_validators_root(&self) -> Result<Node32, SourceError> {
        (**self).get_genesis_validators_root().await
    }
}
