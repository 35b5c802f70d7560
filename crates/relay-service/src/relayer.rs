//! Period Relayer
//!
//! Assembles and submits one update per sync committee period, strictly in
//! increasing period order. The cursor advances by one only after the
//! contract confirms the current period. After a submission that ended
//! without a receipt, the contract is asked for its next period before the
//! update is sent again.

use crate::state::AppState;
use crate::submitter::{RelayError, UpdateSubmitter};
use parking_lot::Mutex;
use relay_proof::committee::sync_committee_period_at_slot;
use relay_proof::{BeaconClient, BeaconDataSource, UpdateAssembler};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};

/// Relayer configuration
#[derive(Debug, Clone)]
pub struct RelayerConfig {
    /// Delay between polls
    pub poll_interval: Duration,
    /// Deadline for one assembly
    pub assemble_timeout: Duration,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            assemble_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The period was confirmed and the cursor advanced
    Confirmed { period: u64 },
    /// The contract already held the period after an unconfirmed submission
    AlreadyRelayed { period: u64 },
    /// The period is not available from the data source yet
    Waiting { period: u64 },
}

/// Ordered period relayer
pub struct Relayer<D, S> {
    config: RelayerConfig,
    assembler: UpdateAssembler<D>,
    submitter: S,
    state: AppState,
    /// Period whose last submission ended without a confirmation
    unconfirmed: Mutex<Option<u64>>,
}

impl<D: BeaconDataSource, S: UpdateSubmitter> Relayer<D, S> {
    /// Create a new relayer
    pub fn new(
        config: RelayerConfig,
        assembler: UpdateAssembler<D>,
        submitter: S,
        state: AppState,
    ) -> Self {
        Self {
            config,
            assembler,
            submitter,
            state,
            unconfirmed: Mutex::new(None),
        }
    }

    /// Run the relayer loop until a fatal error
    ///
    /// # Errors
    /// Returns the error that halted submission.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), RelayError> {
        info!(next_period = self.state.next_period(), "Starting period relayer");

        loop {
            match self.poll_once().await {
                Ok(PollOutcome::Confirmed { .. } | PollOutcome::AlreadyRelayed { .. }) => {
                    self.state.set_error(None);
                    // No delay while catching up
                    continue;
                }
                Ok(PollOutcome::Waiting { .. }) => self.state.set_error(None),
                Err(e) if e.is_fatal() => {
                    error!(error = %e, period = self.state.next_period(), "Relayer halted");
                    self.state.halt(e.to_string());
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, "Relayer poll failed");
                    self.state.set_error(Some(e.to_string()));
                }
            }

            sleep(self.config.poll_interval).await;
        }
    }

    /// Single poll iteration for the cursor's period
    ///
    /// # Errors
    /// Returns an error if assembly fails for a non-transient reason or
    /// submission fails.
    pub async fn poll_once(&self) -> Result<PollOutcome, RelayError> {
        let period = self.state.next_period();
        metrics::gauge!("relay_next_period").set(period as f64);

        let unconfirmed = *self.unconfirmed.lock() == Some(period);
        if unconfirmed {
            let contract_next = self.submitter.next_period().await?;
            *self.unconfirmed.lock() = None;
            if contract_next > period {
                info!(period, contract_next, "Period already accepted by the relay");
                self.state.mark_relayed(period);
                self.state.advance_from(period);
                return Ok(PollOutcome::AlreadyRelayed { period });
            }
        }

        let assembled = timeout(
            self.config.assemble_timeout,
            self.assembler.assemble_with_report(period),
        )
        .await;

        let (update, checks) = match assembled {
            Err(_) => {
                metrics::counter!("relay_assembly_failures_total", "reason" => "timeout").increment(1);
                self.state.mark_failed(period, "assembly timed out".to_string());
                return Err(RelayError::Timeout { period });
            }
            Ok(Err(e)) if e.is_retryable() => {
                debug!(period, error = %e, "Period not available yet");
                self.state.mark_waiting(period, e.to_string());
                return Ok(PollOutcome::Waiting { period });
            }
            Ok(Err(e)) => {
                metrics::counter!("relay_assembly_failures_total", "reason" => "proof_invalid").increment(1);
                self.state.mark_failed(period, e.to_string());
                return Err(e.into());
            }
            Ok(Ok(assembled)) => assembled,
        };

        self.state.mark_assembled(&update, checks);

        match self.submitter.submit(&update).await {
            Ok(receipt) => {
                self.state.mark_confirmed(period, receipt.tx_hash.to_string());
                self.state.advance_from(period);
                metrics::counter!("relay_updates_confirmed_total").increment(1);
                info!(period, tx_hash = %receipt.tx_hash, "Period relayed");
                Ok(PollOutcome::Confirmed { period })
            }
            Err(e) => {
                metrics::counter!("relay_submission_failures_total").increment(1);
                if !e.is_fatal() {
                    *self.unconfirmed.lock() = Some(period);
                }
                self.state.mark_failed(period, e.to_string());
                Err(e)
            }
        }
    }
}

/// Track the beacon head for status reporting
pub async fn track_head(client: BeaconClient, state: AppState, poll_interval: Duration) {
    loop {
        match client.get_head_slot().await {
            Ok(slot) => {
                let period = sync_committee_period_at_slot(slot);
                state.set_head(slot, period);
                metrics::gauge!("relay_head_period").set(period as f64);
            }
            Err(e) => warn!(error = %e, "Failed to fetch head slot"),
        }

        sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::UpdateStatus;
    use crate::submitter::SubmitReceipt;
    use alloy::primitives::B256;
    use async_trait::async_trait;
    use relay_proof::{ChainRelayUpdate, FixtureSource, ForkSchedule};

    /// In-memory relay contract that accepts each period once
    #[derive(Default)]
    struct RecordingSubmitter {
        submitted: Mutex<Vec<u64>>,
        reject: bool,
        /// Submissions that land on-chain but whose receipt is lost
        lost_receipts: Mutex<u32>,
        /// Submissions that never reach the chain
        dropped_sends: Mutex<u32>,
    }

    fn take_one(counter: &Mutex<u32>) -> bool {
        let mut remaining = counter.lock();
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;
        true
    }

    #[async_trait]
    impl UpdateSubmitter for RecordingSubmitter {
        async fn submit(&self, update: &ChainRelayUpdate) -> Result<SubmitReceipt, RelayError> {
            if self.reject {
                return Err(RelayError::ContractRejected(
                    "next sync committee proof did not validate".to_string(),
                ));
            }
            if take_one(&self.dropped_sends) {
                return Err(RelayError::Transport("connection reset".to_string()));
            }
            {
                let mut submitted = self.submitted.lock();
                if submitted.contains(&update.period) {
                    return Err(RelayError::ContractRejected(
                        "period already relayed".to_string(),
                    ));
                }
                submitted.push(update.period);
            }
            if take_one(&self.lost_receipts) {
                return Err(RelayError::Transport("Failed to get receipt: timeout".to_string()));
            }
            Ok(SubmitReceipt {
                period: update.period,
                tx_hash: B256::repeat_byte(update.period as u8),
            })
        }

        async fn next_period(&self) -> Result<u64, RelayError> {
            Ok(self.submitted.lock().last().map_or(0, |period| period + 1))
        }
    }

    fn relayer(
        periods: &[u64],
        start: u64,
        submitter: RecordingSubmitter,
    ) -> Relayer<FixtureSource, RecordingSubmitter> {
        let source = FixtureSource::generate([0x4b; 32], periods.iter().copied()).unwrap();
        Relayer::new(
            RelayerConfig::default(),
            UpdateAssembler::new(source, ForkSchedule::mainnet()),
            submitter,
            AppState::new(start),
        )
    }

    #[tokio::test]
    async fn test_periods_submitted_in_order() {
        let relayer = relayer(&[0, 1, 2, 3], 1, RecordingSubmitter::default());

        assert_eq!(relayer.poll_once().await.unwrap(), PollOutcome::Confirmed { period: 1 });
        assert_eq!(relayer.poll_once().await.unwrap(), PollOutcome::Confirmed { period: 2 });
        assert_eq!(relayer.poll_once().await.unwrap(), PollOutcome::Confirmed { period: 3 });
        assert_eq!(relayer.poll_once().await.unwrap(), PollOutcome::Waiting { period: 4 });

        assert_eq!(*relayer.submitter.submitted.lock(), vec![1, 2, 3]);
        assert_eq!(relayer.state.next_period(), 4);
        assert_eq!(relayer.state.get_period(4).unwrap().status, UpdateStatus::Waiting);
    }

    #[tokio::test]
    async fn test_gap_in_source_blocks_the_cursor() {
        // Period 2 missing: period 3 cannot be reached by skipping
        let relayer = relayer(&[0, 1, 3], 2, RecordingSubmitter::default());

        assert_eq!(relayer.poll_once().await.unwrap(), PollOutcome::Waiting { period: 2 });
        assert_eq!(relayer.poll_once().await.unwrap(), PollOutcome::Waiting { period: 2 });
        assert!(relayer.submitter.submitted.lock().is_empty());
        assert_eq!(relayer.state.next_period(), 2);
    }

    #[tokio::test]
    async fn test_contract_rejection_halts() {
        let submitter = RecordingSubmitter {
            reject: true,
            ..RecordingSubmitter::default()
        };
        let relayer = relayer(&[0, 1], 1, submitter);

        let err = relayer.run().await.unwrap_err();
        assert!(matches!(err, RelayError::ContractRejected(_)));
        assert_eq!(relayer.state.next_period(), 1);
        assert!(relayer.state.halted().is_some());
        assert_eq!(relayer.state.get_period(1).unwrap().status, UpdateStatus::Failed);
    }

    #[tokio::test]
    async fn test_lost_receipt_reconciles_with_contract() {
        let submitter = RecordingSubmitter {
            lost_receipts: Mutex::new(1),
            ..RecordingSubmitter::default()
        };
        let relayer = relayer(&[0, 1, 2], 1, submitter);

        let err = relayer.poll_once().await.unwrap_err();
        assert!(matches!(err, RelayError::Transport(_)));
        assert!(!err.is_fatal());
        assert_eq!(relayer.state.next_period(), 1);

        assert_eq!(
            relayer.poll_once().await.unwrap(),
            PollOutcome::AlreadyRelayed { period: 1 }
        );
        assert_eq!(relayer.state.get_period(1).unwrap().status, UpdateStatus::Confirmed);
        assert_eq!(relayer.poll_once().await.unwrap(), PollOutcome::Confirmed { period: 2 });

        assert_eq!(*relayer.submitter.submitted.lock(), vec![1, 2]);
        assert!(relayer.state.halted().is_none());
        assert_eq!(relayer.state.next_period(), 3);
    }

    #[tokio::test]
    async fn test_dropped_send_is_resubmitted() {
        let submitter = RecordingSubmitter {
            dropped_sends: Mutex::new(1),
            ..RecordingSubmitter::default()
        };
        let relayer = relayer(&[0, 1], 1, submitter);

        assert!(matches!(
            relayer.poll_once().await.unwrap_err(),
            RelayError::Transport(_)
        ));
        assert_eq!(relayer.poll_once().await.unwrap(), PollOutcome::Confirmed { period: 1 });
        assert_eq!(*relayer.submitter.submitted.lock(), vec![1]);
        assert_eq!(relayer.state.next_period(), 2);
    }

    #[tokio::test]
    async fn test_invalid_proof_does_not_advance() {
        let mut source = FixtureSource::generate([0x4b; 32], [0, 1]).unwrap();
        source.update_mut(1).unwrap().finality_branch[0] = [0u8; 32];
        let relayer = Relayer::new(
            RelayerConfig::default(),
            UpdateAssembler::new(source, ForkSchedule::mainnet()),
            RecordingSubmitter::default(),
            AppState::new(1),
        );

        let err = relayer.poll_once().await.unwrap_err();
        assert!(matches!(err, RelayError::Assemble(_)));
        assert!(!err.is_fatal());
        assert_eq!(relayer.state.next_period(), 1);
    }
}
