//! Update Assembly
//!
//! Orchestrates the data source, proof builder and committee resolver into a
//! single self-verified [`ChainRelayUpdate`]. Any failed fetch or proof aborts
//! the whole assembly; a partial record is never returned.

use crate::committee::{sync_committee_period_at_epoch, ForkSchedule, ResolveError, SyncCommitteePeriodResolver};
use crate::gindex::GindexError;
use crate::merkle::Node32;
use crate::proof::{HeaderProofBuilder, ProofCheck, ProofError, ProofKind};
use crate::source::{BeaconDataSource, SourceError};
use crate::update::ChainRelayUpdate;
use thiserror::Error;
use tracing::{info, instrument};

/// Errors that abort an assembly
#[derive(Debug, Error)]
pub enum AssembleError {
    #[error(transparent)]
    InvalidIndex(#[from] GindexError),

    #[error("{proof} proof did not validate")]
    ProofInvalid { proof: ProofKind },

    #[error("No committee update for the period before period {0}")]
    MissingPriorPeriod(u64),

    #[error("Data unavailable: {0}")]
    DataUnavailable(#[source] SourceError),

    /// Local proof construction failed; retrying the same inputs fails again
    #[error("Proof construction failed: {0}")]
    Construction(#[source] ProofError),
}

impl AssembleError {
    /// Whether the same request may succeed once the data source catches up
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::MissingPriorPeriod(_) | Self::DataUnavailable(_))
    }
}

impl From<SourceError> for AssembleError {
    fn from(e: SourceError) -> Self {
        Self::DataUnavailable(e)
    }
}

impl From<ProofError> for AssembleError {
    fn from(e: ProofError) -> Self {
        match e {
            ProofError::Invalid { proof } => Self::ProofInvalid { proof },
            ProofError::Gindex(e) => Self::InvalidIndex(e),
            other => Self::Construction(other),
        }
    }
}

impl From<ResolveError> for AssembleError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::MissingPriorPeriod(period) => Self::MissingPriorPeriod(period),
            ResolveError::DataUnavailable(e) => Self::DataUnavailable(e),
            ResolveError::Proof(e) => e.into(),
        }
    }
}

/// Produces relay updates from a beacon data source.
#[derive(Debug)]
pub struct UpdateAssembler<D> {
    resolver: SyncCommitteePeriodResolver<D>,
}

impl<D: BeaconDataSource> UpdateAssembler<D> {
    /// Create an assembler over `source`
    pub fn new(source: D, forks: ForkSchedule) -> Self {
        Self {
            resolver: SyncCommitteePeriodResolver::new(source, forks),
        }
    }

    /// Use an already known genesis validators root instead of fetching it
    #[must_use]
    pub fn with_genesis_validators_root(self, root: Node32) -> Self {
        Self {
            resolver: self.resolver.with_genesis_validators_root(root),
        }
    }

    /// The committee resolver, sharing this assembler's genesis root cache
    pub fn resolver(&self) -> &SyncCommitteePeriodResolver<D> {
        &self.resolver
    }

    /// Assemble the update for `period`.
    ///
    /// # Errors
    /// Returns an error if any fetch fails or any proof does not verify.
    pub async fn assemble(&self, period: u64) -> Result<ChainRelayUpdate, AssembleError> {
        let (update, _) = self.assemble_with_report(period).await?;
        Ok(update)
    }

    /// Assemble the update for the period containing `epoch`.
    ///
    /// # Errors
    /// See [`Self::assemble`].
    pub async fn assemble_for_epoch(&self, epoch: u64) -> Result<ChainRelayUpdate, AssembleError> {
        self.assemble(sync_committee_period_at_epoch(epoch)).await
    }

    /// Assemble the update for `period` along with every proof check made.
    ///
    /// # Errors
    /// See [`Self::assemble`].
    #[instrument(skip(self))]
    pub async fn assemble_with_report(
        &self,
        period: u64,
    ) -> Result<(ChainRelayUpdate, Vec<ProofCheck>), AssembleError> {
        let source = self.resolver.source();

        // The genesis root has no dependency on the update, warm the cache alongside it
        let (update, _) = tokio::try_join!(
            async {
                source
                    .get_committee_update(period)
                    .await
                    .map_err(AssembleError::from)
            },
            async {
                self.resolver
                    .genesis_validators_root()
                    .await
                    .map_err(AssembleError::from)
            },
        )?;

        let finalized = &update.header;
        let latest = &update.finality_header;
        let finalized_block_root = source.get_block_root(finalized.slot).await?;

        let mut builder = HeaderProofBuilder::new();
        let latest_slot = builder.prove(ProofKind::LatestSlot, latest)?;
        let latest_state_root = builder.prove(ProofKind::LatestStateRoot, latest)?;
        let finalized_slot =
            builder.prove_against(ProofKind::FinalizedSlot, finalized, finalized_block_root)?;
        let finalized_state_root =
            builder.prove_against(ProofKind::FinalizedStateRoot, finalized, finalized_block_root)?;
        builder.check_sync_committee(
            ProofKind::NextSyncCommittee,
            &update.next_sync_committee,
            &update.next_sync_committee_branch,
            finalized.state_root,
        )?;
        let finality =
            builder.check_finality(finalized_block_root, &update.finality_branch, latest.state_root)?;

        let committee = self
            .resolver
            .committee_for_period_with(period, &mut builder)
            .await?;
        let signing_domain = self.resolver.signing_domain(latest.slot).await?;

        let record = ChainRelayUpdate {
            period,
            signature: update.sync_committee_signature,
            participants: update.sync_committee_bits.clone(),
            latest_block_root: latest_slot.root,
            signing_domain,
            state_root: latest.state_root,
            state_root_branch: latest_state_root.branch,
            latest_slot: latest.slot,
            latest_slot_branch: latest_slot.branch,
            finalized_block_root,
            finalizing_branch: finality.branch,
            finalized_slot: finalized.slot,
            finalized_slot_branch: finalized_slot.branch,
            finalized_state_root: finalized.state_root,
            finalized_state_root_branch: finalized_state_root.branch,
            sync_committee: committee.committee.pubkey_bytes(),
            sync_committee_aggregate: committee.aggregate_pubkey(),
            sync_committee_branch: committee.branch,
        };

        info!(
            period,
            latest_slot = record.latest_slot,
            finalized_slot = record.finalized_slot,
            participants = record.participant_count(),
            "Assembled relay update"
        );

        Ok((record, builder.into_checks()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::FixtureSource;

    const GVR: [u8; 32] = [0x4b; 32];

    fn assembler(periods: &[u64]) -> UpdateAssembler<FixtureSource> {
        let source = FixtureSource::generate(GVR, periods.iter().copied()).unwrap();
        UpdateAssembler::new(source, ForkSchedule::mainnet())
    }

    #[tokio::test]
    async fn test_report_lists_checks_in_order() {
        let (_, checks) = assembler(&[0, 1]).assemble_with_report(1).await.unwrap();
        let kinds: Vec<ProofKind> = checks.iter().map(|c| c.proof).collect();
        assert_eq!(
            kinds,
            vec![
                ProofKind::LatestSlot,
                ProofKind::LatestStateRoot,
                ProofKind::FinalizedSlot,
                ProofKind::FinalizedStateRoot,
                ProofKind::NextSyncCommittee,
                ProofKind::Finality,
                ProofKind::PriorSyncCommittee,
            ]
        );
        assert!(checks.iter().all(|c| c.valid));
    }

    #[tokio::test]
    async fn test_missing_target_period_is_data_unavailable() {
        let err = assembler(&[0, 1]).assemble(2).await.unwrap_err();
        assert!(matches!(
            err,
            AssembleError::DataUnavailable(SourceError::NotFound(_))
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_period_zero_has_no_prior_committee() {
        let err = assembler(&[0]).assemble(0).await.unwrap_err();
        assert!(matches!(err, AssembleError::MissingPriorPeriod(0)));
    }

    #[tokio::test]
    async fn test_missing_prior_period_names_the_target() {
        let err = assembler(&[1]).assemble(1).await.unwrap_err();
        assert!(matches!(err, AssembleError::MissingPriorPeriod(1)));
        assert_eq!(
            err.to_string(),
            "No committee update for the period before period 1"
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_construction_errors_are_not_retryable() {
        let unsupported = AssembleError::from(ProofError::UnsupportedGindex(105));
        assert!(matches!(
            unsupported,
            AssembleError::Construction(ProofError::UnsupportedGindex(105))
        ));
        assert!(unsupported.to_string().contains("105"));
        assert!(!unsupported.is_retryable());

        let mismatch = AssembleError::from(ResolveError::Proof(ProofError::CheckpointMismatch));
        assert!(matches!(
            mismatch,
            AssembleError::Construction(ProofError::CheckpointMismatch)
        ));
        assert!(!mismatch.is_retryable());

        let field_count = AssembleError::from(ProofError::FieldCount {
            expected: 24,
            got: 23,
        });
        assert!(!field_count.is_retryable());
    }

    #[tokio::test]
    async fn test_wrong_finalized_root_fails_on_finalized_slot() {
        let mut source = FixtureSource::generate(GVR, [0, 1]).unwrap();
        let slot = source.update(1).unwrap().header.slot;
        source.set_block_root(slot, [0xee; 32]);

        let err = UpdateAssembler::new(source, ForkSchedule::mainnet())
            .assemble(1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AssembleError::ProofInvalid {
                proof: ProofKind::FinalizedSlot
            }
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_resolve_error_conversion() {
        let err: AssembleError = ResolveError::Proof(ProofError::Invalid {
            proof: ProofKind::PriorSyncCommittee,
        })
        .into();
        assert_eq!(err.to_string(), "prior sync committee proof did not validate");
    }
}
