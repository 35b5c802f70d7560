//! Beacon API HTTP Client
//!
//! Fetches committee updates, block roots and genesis data from a beacon node.

use crate::merkle::Node32;
use crate::source::{BeaconDataSource, SourceError};
use crate::types::{
    from_hex, from_hex_array, unpack_bits, BeaconBlockHeader, CommitteeUpdate, SyncCommittee,
    SYNC_COMMITTEE_SIZE,
};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::instrument;

/// Chain genesis as reported by the beacon node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Genesis {
    /// Unix timestamp of slot 0
    pub genesis_time: u64,
    pub genesis_validators_root: Node32,
    pub genesis_fork_version: [u8; 4],
}

/// Client for interacting with the Beacon API
#[derive(Debug, Clone)]
pub struct BeaconClient {
    client: Client,
    base_url: String,
}

impl BeaconClient {
    /// Create a new beacon client
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the beacon node (e.g., `http://localhost:9596`)
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Create a client reusing a configured `reqwest::Client`
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fetch beacon block header
    ///
    /// # Arguments
    /// * `block_id` - Block identifier (slot number, "head", "finalized", etc.)
    ///
    /// # Errors
    /// Returns error if the request fails or header is not found
    #[instrument(skip(self))]
    pub async fn get_header(&self, block_id: &str) -> Result<BeaconBlockHeader, SourceError> {
        let url = format!("{}/eth/v1/beacon/headers/{block_id}", self.base_url);
        let response = self.client.get(&url).send().await?;
        let response = check_status(response, || format!("header {block_id}"))?;

        #[derive(Deserialize)]
        struct HeaderResponse {
            data: HeaderData,
        }

        #[derive(Deserialize)]
        struct HeaderData {
            header: HeaderMessage,
        }

        #[derive(Deserialize)]
        struct HeaderMessage {
            message: HeaderJson,
        }

        let header_resp: HeaderResponse = response.json().await?;
        header_resp.data.header.message.try_into()
    }

    /// Get current head slot
    ///
    /// # Errors
    /// Returns error if the request fails
    pub async fn get_head_slot(&self) -> Result<u64, SourceError> {
        let header = self.get_header("head").await?;
        Ok(header.slot)
    }

    /// Fetch chain genesis data
    ///
    /// # Errors
    /// Returns error if the request fails or the response is malformed
    #[instrument(skip(self))]
    pub async fn get_genesis(&self) -> Result<Genesis, SourceError> {
        let url = format!("{}/eth/v1/beacon/genesis", self.base_url);
        let response = self.client.get(&url).send().await?;
        let response = check_status(response, || "genesis".to_string())?;

        #[derive(Deserialize)]
        struct GenesisResponse {
            data: GenesisData,
        }

        #[derive(Deserialize)]
        struct GenesisData {
            genesis_time: String,
            genesis_validators_root: String,
            genesis_fork_version: String,
        }

        let resp: GenesisResponse = response.json().await?;
        Ok(Genesis {
            genesis_time: parse_u64(&resp.data.genesis_time, "genesis_time")?,
            genesis_validators_root: from_hex_array(
                &resp.data.genesis_validators_root,
                "genesis_validators_root",
            )?,
            genesis_fork_version: from_hex_array(
                &resp.data.genesis_fork_version,
                "genesis_fork_version",
            )?,
        })
    }
}

#[async_trait]
impl BeaconDataSource for BeaconClient {
    #[instrument(skip(self))]
    async fn get_committee_update(&self, period: u64) -> Result<CommitteeUpdate, SourceError> {
        let url = format!(
            "{}/eth/v1/lightclient/committee_updates?from={period}&to={period}",
            self.base_url
        );
        let response = self.client.get(&url).send().await?;
        let response = check_status(response, || format!("committee update for period {period}"))?;

        #[derive(Deserialize)]
        struct UpdatesResponse {
            data: Vec<CommitteeUpdateJson>,
        }

        let resp: UpdatesResponse = response.json().await?;
        resp.data
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::NotFound(format!("committee update for period {period}")))?
            .try_into()
    }

    #[instrument(skip(self))]
    async fn get_block_root(&self, slot: u64) -> Result<Node32, SourceError> {
        let url = format!("{}/eth/v1/beacon/blocks/{slot}/root", self.base_url);
        let response = self.client.get(&url).send().await?;
        let response = check_status(response, || format!("block root for slot {slot}"))?;

        #[derive(Deserialize)]
        struct RootResponse {
            data: RootData,
        }

        #[derive(Deserialize)]
        struct RootData {
            root: String,
        }

        let resp: RootResponse = response.json().await?;
        Ok(from_hex_array(&resp.data.root, "root")?)
    }

    async fn get_genesis_validators_root(&self) -> Result<Node32, SourceError> {
        Ok(self.get_genesis().await?.genesis_validators_root)
    }
}

fn check_status(response: Response, what: impl FnOnce() -> String) -> Result<Response, SourceError> {
    if response.status() == StatusCode::NOT_FOUND {
        return Err(SourceError::NotFound(what()));
    }

    if !response.status().is_success() {
        return Err(SourceError::InvalidResponse(format!(
            "Unexpected status: {}",
            response.status()
        )));
    }

    Ok(response)
}

fn parse_u64(s: &str, field: &str) -> Result<u64, SourceError> {
    s.parse()
        .map_err(|e| SourceError::InvalidResponse(format!("Invalid {field}: {e}")))
}

#[derive(Deserialize)]
struct HeaderJson {
    slot: String,
    proposer_index: String,
    parent_root: String,
    state_root: String,
    body_root: String,
}

impl TryFrom<HeaderJson> for BeaconBlockHeader {
    type Error = SourceError;

    fn try_from(msg: HeaderJson) -> Result<Self, Self::Error> {
        Ok(Self {
            slot: parse_u64(&msg.slot, "slot")?,
            proposer_index: parse_u64(&msg.proposer_index, "proposer_index")?,
            parent_root: from_hex_array(&msg.parent_root, "parent_root")?,
            state_root: from_hex_array(&msg.state_root, "state_root")?,
            body_root: from_hex_array(&msg.body_root, "body_root")?,
        })
    }
}

#[derive(Deserialize)]
struct SyncCommitteeJson {
    pubkeys: Vec<String>,
    aggregate_pubkey: String,
}

impl TryFrom<SyncCommitteeJson> for SyncCommittee {
    type Error = SourceError;

    fn try_from(json: SyncCommitteeJson) -> Result<Self, Self::Error> {
        let pubkeys = json
            .pubkeys
            .iter()
            .map(|key| from_hex(key, "pubkeys"))
            .collect::<Result<Vec<_>, _>>()?;
        let aggregate = from_hex(&json.aggregate_pubkey, "aggregate_pubkey")?;
        Ok(Self::from_bytes(&pubkeys, &aggregate)?)
    }
}

#[derive(Deserialize)]
struct CommitteeUpdateJson {
    header: HeaderJson,
    next_sync_committee: SyncCommitteeJson,
    next_sync_committee_branch: Vec<String>,
    finality_header: HeaderJson,
    finality_branch: Vec<String>,
    sync_committee_bits: String,
    sync_committee_signature: String,
}

impl TryFrom<CommitteeUpdateJson> for CommitteeUpdate {
    type Error = SourceError;

    fn try_from(json: CommitteeUpdateJson) -> Result<Self, Self::Error> {
        let bits = from_hex(&json.sync_committee_bits, "sync_committee_bits")?;
        if bits.len() * 8 != SYNC_COMMITTEE_SIZE {
            return Err(SourceError::InvalidResponse(format!(
                "Expected {} bytes of sync_committee_bits, got {}",
                SYNC_COMMITTEE_SIZE / 8,
                bits.len()
            )));
        }

        Ok(Self {
            header: json.header.try_into()?,
            finality_header: json.finality_header.try_into()?,
            finality_branch: parse_branch(&json.finality_branch, "finality_branch")?,
            next_sync_committee: json.next_sync_committee.try_into()?,
            next_sync_committee_branch: parse_branch(
                &json.next_sync_committee_branch,
                "next_sync_committee_branch",
            )?,
            sync_committee_signature: from_hex_array(
                &json.sync_committee_signature,
                "sync_committee_signature",
            )?,
            sync_committee_bits: unpack_bits(&bits, SYNC_COMMITTEE_SIZE),
        })
    }
}

fn parse_branch(branch: &[String], field: &'static str) -> Result<Vec<Node32>, SourceError> {
    branch
        .iter()
        .map(|node| from_hex_array(node, field).map_err(SourceError::from))
        .collect()
}
