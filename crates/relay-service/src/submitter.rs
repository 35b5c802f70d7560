//! Transaction Submitter
//!
//! Submits assembled period updates to the relay contract.

use alloy::{
    network::EthereumWallet,
    primitives::{Address, Bytes, FixedBytes, B256},
    providers::ProviderBuilder,
    signers::local::PrivateKeySigner,
    sol,
    sol_types::decode_revert_reason,
};
use async_trait::async_trait;
use relay_proof::committee::sync_committee_period_at_slot;
use relay_proof::{AssembleError, ChainRelayUpdate};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

// Generate contract bindings from ABI
sol! {
    #[sol(rpc)]
    contract Eth2ChainRelay {
        struct ChainRelayUpdate {
            bytes signature;
            bool[] participants;
            bytes32 latestBlockRoot;
            bytes32 signingDomain;
            bytes32 stateRoot;
            bytes32[] stateRootBranch;
            uint64 latestSlot;
            bytes32[] latestSlotBranch;
            bytes32 finalizedBlockRoot;
            bytes32[] finalizingBranch;
            uint64 finalizedSlot;
            bytes32[] finalizedSlotBranch;
            bytes32 finalizedStateRoot;
            bytes32[] finalizedStateRootBranch;
            bytes[] syncCommittee;
            bytes syncCommitteeAggregate;
            bytes32[] syncCommitteeBranch;
        }

        function submitUpdate(ChainRelayUpdate calldata update) external;

        function latestSlot() external view returns (uint64);
        function finalizedSlot() external view returns (uint64);
    }
}

/// Errors from relay contract interaction
#[derive(Debug, Error)]
pub enum RelayError {
    /// The contract's re-verification rejected the update; resubmitting fails identically
    #[error("Relay contract rejected update: {0}")]
    ContractRejected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Assemble(#[from] AssembleError),

    #[error("Assembly of period {period} timed out")]
    Timeout { period: u64 },
}

impl RelayError {
    /// Whether the relayer must stop instead of retrying
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ContractRejected(_) | Self::Config(_))
    }
}

impl From<alloy::contract::Error> for RelayError {
    fn from(e: alloy::contract::Error) -> Self {
        if let Some(data) = e.as_revert_data() {
            let reason = decode_revert_reason(&data)
                .unwrap_or_else(|| format!("0x{}", hex::encode(&data)));
            return Self::ContractRejected(reason);
        }
        Self::Transport(e.to_string())
    }
}

/// Outcome of a confirmed submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub period: u64,
    pub tx_hash: B256,
}

/// Destination for assembled updates.
#[async_trait]
pub trait UpdateSubmitter: Send + Sync {
    /// Submit `update` and wait until it is confirmed.
    async fn submit(&self, update: &ChainRelayUpdate) -> Result<SubmitReceipt, RelayError>;

    /// First period the relay has not accepted yet.
    async fn next_period(&self) -> Result<u64, RelayError>;
}

/// Submitter configuration
#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    /// Execution RPC URL
    pub rpc_url: String,
    /// Relay contract address
    pub contract_address: String,
    /// Private key for signing transactions (hex, with or without 0x prefix)
    pub private_key: Option<String>,
    /// Confirmations to wait for
    pub confirmations: u64,
}

/// Relay contract submitter
pub struct RelaySubmitter {
    config: SubmitterConfig,
    rpc_url: reqwest::Url,
    contract_address: Address,
    signer: Option<PrivateKeySigner>,
}

impl RelaySubmitter {
    /// Create a new submitter (read-only, no signer)
    ///
    /// # Errors
    /// Returns [`RelayError::Config`] on an invalid URL or address.
    pub fn new(config: SubmitterConfig) -> Result<Self, RelayError> {
        let contract_address: Address = config
            .contract_address
            .parse()
            .map_err(|e| RelayError::Config(format!("Invalid contract address: {e}")))?;
        let rpc_url = config
            .rpc_url
            .parse()
            .map_err(|e| RelayError::Config(format!("Invalid RPC URL: {e}")))?;

        Ok(Self {
            config,
            rpc_url,
            contract_address,
            signer: None,
        })
    }

    /// Create a submitter with a signer (can submit transactions)
    ///
    /// # Errors
    /// Returns [`RelayError::Config`] if the key is missing or invalid.
    pub fn with_signer(config: SubmitterConfig) -> Result<Self, RelayError> {
        let private_key = config
            .private_key
            .clone()
            .ok_or_else(|| RelayError::Config("Private key required for signing".to_string()))?;

        let key_bytes = private_key.strip_prefix("0x").unwrap_or(&private_key);
        let signer: PrivateKeySigner = key_bytes
            .parse()
            .map_err(|e| RelayError::Config(format!("Invalid private key: {e}")))?;

        info!(
            address = %signer.address(),
            "Submitter initialized with signer"
        );

        let mut submitter = Self::new(config)?;
        submitter.signer = Some(signer);
        Ok(submitter)
    }

    /// Get the signer address (if configured)
    pub fn signer_address(&self) -> Option<Address> {
        self.signer.as_ref().map(|s| s.address())
    }

    /// Latest slot the relay has accepted
    ///
    /// # Errors
    /// Returns an error if the call fails.
    #[instrument(skip(self))]
    pub async fn latest_slot(&self) -> Result<u64, RelayError> {
        let provider = ProviderBuilder::new().connect_http(self.rpc_url.clone());
        let contract = Eth2ChainRelay::new(self.contract_address, &provider);
        let slot: u64 = contract.latestSlot().call().await?;
        debug!(slot, "Read relay latest slot");
        Ok(slot)
    }
}

#[async_trait]
impl UpdateSubmitter for RelaySubmitter {
    #[instrument(skip(self, update), fields(period = update.period))]
    async fn submit(&self, update: &ChainRelayUpdate) -> Result<SubmitReceipt, RelayError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| RelayError::Config("Submitter not configured with signer".to_string()))?;

        let wallet = EthereumWallet::from(signer.clone());
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(self.rpc_url.clone());
        let contract = Eth2ChainRelay::new(self.contract_address, &provider);
        let call = contract.submitUpdate(to_abi(update));

        // eth_call pre-check
        call.call().await?;

        info!(
            period = update.period,
            latest_slot = update.latest_slot,
            finalized_slot = update.finalized_slot,
            "Submitting relay update"
        );

        let pending_tx = call.send().await?;
        let tx_hash = *pending_tx.tx_hash();

        info!(tx_hash = %tx_hash, "Transaction submitted");

        let receipt = pending_tx
            .with_required_confirmations(self.config.confirmations.max(1))
            .get_receipt()
            .await
            .map_err(|e| RelayError::Transport(format!("Failed to get receipt: {e}")))?;

        if !receipt.status() {
            warn!(tx_hash = %tx_hash, "Relay update reverted on-chain");
            return Err(RelayError::ContractRejected(format!(
                "transaction {tx_hash} reverted"
            )));
        }

        info!(
            tx_hash = %tx_hash,
            gas_used = receipt.gas_used,
            "Transaction confirmed"
        );

        Ok(SubmitReceipt {
            period: update.period,
            tx_hash,
        })
    }

    async fn next_period(&self) -> Result<u64, RelayError> {
        Ok(sync_committee_period_at_slot(self.latest_slot().await?) + 1)
    }
}

/// Convert an update into the contract's ABI struct
pub fn to_abi(update: &ChainRelayUpdate) -> Eth2ChainRelay::ChainRelayUpdate {
    let branch = |nodes: &[[u8; 32]]| -> Vec<B256> {
        nodes.iter().copied().map(FixedBytes::from).collect()
    };

    Eth2ChainRelay::ChainRelayUpdate {
        signature: Bytes::copy_from_slice(&update.signature),
        participants: update.participants.clone(),
        latestBlockRoot: update.latest_block_root.into(),
        signingDomain: update.signing_domain.into(),
        stateRoot: update.state_root.into(),
        stateRootBranch: branch(&update.state_root_branch),
        latestSlot: update.latest_slot,
        latestSlotBranch: branch(&update.latest_slot_branch),
        finalizedBlockRoot: update.finalized_block_root.into(),
        finalizingBranch: branch(&update.finalizing_branch),
        finalizedSlot: update.finalized_slot,
        finalizedSlotBranch: branch(&update.finalized_slot_branch),
        finalizedStateRoot: update.finalized_state_root.into(),
        finalizedStateRootBranch: branch(&update.finalized_state_root_branch),
        syncCommittee: update
            .sync_committee
            .iter()
            .map(|key| Bytes::copy_from_slice(key))
            .collect(),
        syncCommitteeAggregate: Bytes::copy_from_slice(&update.sync_committee_aggregate),
        syncCommitteeBranch: branch(&update.sync_committee_branch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::sol_types::SolCall;

    fn config(private_key: Option<&str>) -> SubmitterConfig {
        SubmitterConfig {
            rpc_url: "http://localhost:8545".to_string(),
            contract_address: "0x0000000000000000000000000000000000000001".to_string(),
            private_key: private_key.map(str::to_string),
            confirmations: 1,
        }
    }

    fn update() -> ChainRelayUpdate {
        ChainRelayUpdate {
            period: 3,
            signature: [0xaa; 96],
            participants: vec![true; 512],
            latest_block_root: [1u8; 32],
            signing_domain: [7u8; 32],
            state_root: [2u8; 32],
            state_root_branch: vec![[3u8; 32]; 3],
            latest_slot: 24_640,
            latest_slot_branch: vec![[4u8; 32]; 3],
            finalized_block_root: [5u8; 32],
            finalizing_branch: vec![[6u8; 32]; 6],
            finalized_slot: 24_640 - 64,
            finalized_slot_branch: vec![[8u8; 32]; 3],
            finalized_state_root: [9u8; 32],
            finalized_state_root_branch: vec![[10u8; 32]; 3],
            sync_committee: vec![vec![0x11; 48]; 512],
            sync_committee_aggregate: vec![0x22; 48],
            sync_committee_branch: vec![[12u8; 32]; 5],
        }
    }

    #[test]
    fn test_submitter_creation_readonly() {
        let submitter = RelaySubmitter::new(config(None)).unwrap();
        assert!(submitter.signer_address().is_none());
    }

    #[test]
    fn test_submitter_creation_with_signer() {
        // Anvil's first default private key
        let submitter = RelaySubmitter::with_signer(config(Some(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        )))
        .unwrap();

        assert_eq!(
            submitter.signer_address().unwrap(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
                .parse::<Address>()
                .unwrap()
        );
    }

    #[test]
    fn test_submitter_config_errors() {
        assert!(matches!(
            RelaySubmitter::with_signer(config(None)),
            Err(RelayError::Config(_))
        ));
        assert!(matches!(
            RelaySubmitter::with_signer(config(Some("not_a_key"))),
            Err(RelayError::Config(_))
        ));

        let mut bad_address = config(None);
        bad_address.contract_address = "not_an_address".to_string();
        assert!(matches!(
            RelaySubmitter::new(bad_address),
            Err(RelayError::Config(_))
        ));
    }

    #[test]
    fn test_abi_conversion_preserves_fields() {
        let update = update();
        let abi = to_abi(&update);

        assert_eq!(abi.signature.len(), 96);
        assert_eq!(abi.latestSlot, update.latest_slot);
        assert_eq!(abi.finalizingBranch.len(), 6);
        assert_eq!(abi.finalizedStateRoot, B256::from([9u8; 32]));
        assert_eq!(abi.syncCommittee.len(), 512);
        assert_eq!(abi.syncCommitteeBranch[0], B256::from([12u8; 32]));

        let calldata = Eth2ChainRelay::submitUpdateCall { update: abi }.abi_encode();
        assert_eq!(&calldata[..4], &Eth2ChainRelay::submitUpdateCall::SELECTOR);
    }

    #[test]
    fn test_fatal_errors() {
        assert!(RelayError::ContractRejected("proof invalid".to_string()).is_fatal());
        assert!(!RelayError::Transport("connection reset".to_string()).is_fatal());
        assert!(!RelayError::Timeout { period: 1 }.is_fatal());
    }
}
