//! Deposit state machine.
//!
//! `Created -> LeafComputed -> Committed -> AwaitingFunding -> Funded`, or
//! `Failed` from any step. Nothing is retried here; re-running a deposit
//! with the same secret is up to the caller.

use std::time::Duration;

use ethers::types::{Address, TransactionReceipt, TxHash};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::{
    codec::CommitmentCodec,
    error::{MixerError, Result},
    events::EventWatcher,
    ledger::MixerLedger,
    relayer::{Relayer, RelayerGateway},
    types::{ensure_address, FundingEvent, Leaf, Secret},
};

/// What a depositor asks for.
#[derive(Clone, Debug)]
pub struct DepositRequest {
    pub secret: Secret,
    /// Address the commitment binds to; the later withdrawal pays here.
    pub recipient: Address,
    /// Account the relayer charges for placing the commitment.
    pub funder: Address,
    /// First block the funding watch looks at.
    pub from_block: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DepositState {
    Created,
    LeafComputed(Leaf),
    Committed { leaf: Leaf, tx_hash: TxHash },
    AwaitingFunding { leaf: Leaf },
    Funded(FundingEvent),
    Failed(MixerError),
}

impl DepositState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DepositState::Funded(_) | DepositState::Failed(_))
    }
}

/// Lifecycle notifications. A failure before the commit left the client is
/// reported as `Submitted(Err)`, later ones on the step that failed.
#[derive(Clone, Debug)]
pub enum DepositEvent {
    Submitted(Result<TxHash>),
    Mined(Result<TransactionReceipt>),
    Funded(Result<FundingEvent>),
}

/// Drives one [`DepositRequest`] to a terminal state.
pub struct DepositCoordinator<L, R> {
    request: DepositRequest,
    codec: CommitmentCodec<L>,
    relayer: RelayerGateway<R, L>,
    watcher: EventWatcher<L>,
    poll_interval: Duration,
    state: DepositState,
    history: Vec<DepositState>,
    events: Option<mpsc::UnboundedSender<DepositEvent>>,
}

impl<L: MixerLedger, R: Relayer> DepositCoordinator<L, R> {
    pub fn new(
        request: DepositRequest,
        codec: CommitmentCodec<L>,
        relayer: RelayerGateway<R, L>,
        watcher: EventWatcher<L>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            request,
            codec,
            relayer,
            watcher,
            poll_interval,
            state: DepositState::Created,
            history: vec![DepositState::Created],
            events: None,
        }
    }

    /// Publish lifecycle events on `sender`.
    pub fn with_events(mut self, sender: mpsc::UnboundedSender<DepositEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn state(&self) -> &DepositState {
        &self.state
    }

    /// Every state visited so far, starting with `Created`.
    pub fn history(&self) -> &[DepositState] {
        &self.history
    }

    pub fn request(&self) -> &DepositRequest {
        &self.request
    }

    /// Run the deposit. Flipping `shutdown` to `true` abandons the funding
    /// watch; the committed leaf stays on the ledger.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> Result<FundingEvent> {
        if self.state != DepositState::Created {
            return Err(MixerError::InternalError(format!(
                "deposit already run, state is {:?}",
                self.state
            )));
        }

        let leaf = match self.compute_leaf().await {
            Ok(leaf) => leaf,
            Err(e) => return Err(self.fail(e, DepositEvent::Submitted)),
        };
        self.transition(DepositState::LeafComputed(leaf));

        let submission = self.relayer.commit(leaf, self.request.funder);
        let tx_hash = match submission.submitted.wait().await {
            Ok(tx_hash) => tx_hash,
            Err(e) => return Err(self.fail(e, DepositEvent::Submitted)),
        };
        self.transition(DepositState::Committed { leaf, tx_hash });
        self.emit(DepositEvent::Submitted(Ok(tx_hash)));

        let receipt = match submission.mined.wait().await {
            Ok(receipt) => receipt,
            Err(e) => return Err(self.fail(e, DepositEvent::Mined)),
        };
        self.emit(DepositEvent::Mined(Ok(receipt)));
        self.transition(DepositState::AwaitingFunding { leaf });

        let funded = self
            .watcher
            .watch(leaf, self.request.from_block, self.poll_interval, shutdown)
            .await;
        match funded {
            Ok(event) => {
                self.transition(DepositState::Funded(event));
                self.emit(DepositEvent::Funded(Ok(event)));
                Ok(event)
            }
            Err(e) => Err(self.fail(e, DepositEvent::Funded)),
        }
    }

    async fn compute_leaf(&self) -> Result<Leaf> {
        ensure_address(self.request.funder, "funder")?;
        self.codec
            .leaf_hash(&self.request.secret, self.request.recipient)
            .await
    }

    fn transition(&mut self, next: DepositState) {
        info!("Deposit {:?} -> {:?}", self.state, next);
        self.state = next.clone();
        self.history.push(next);
    }

    fn fail<T, F>(&mut self, err: MixerError, event: F) -> MixerError
    where
        F: FnOnce(Result<T>) -> DepositEvent,
    {
        error!("Deposit failed in {:?}: {}", self.state, err);
        self.transition(DepositState::Failed(err.clone()));
        self.emit(event(Err(err.clone())));
        err
    }

    fn emit(&self, event: DepositEvent) {
        if let Some(events) = &self.events {
            // A dropped receiver only means nobody is listening.
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;

    #[test]
    fn test_terminal_states() {
        assert!(!DepositState::Created.is_terminal());
        assert!(!DepositState::AwaitingFunding { leaf: Leaf::from(U256::one()) }.is_terminal());
        assert!(DepositState::Funded(FundingEvent { block_number: 1, leaf_index: 0 }).is_terminal());
        assert!(DepositState::Failed(MixerError::Cancelled("watch".into())).is_terminal());
    }
}
