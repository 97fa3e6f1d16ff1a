//! Withdrawal state machine.
//!
//! Steps run strictly in order and the first failure aborts the whole
//! withdrawal. The spent check sits right after the nullifier is known so a
//! nullifier the ledger already holds never reaches the prover.

use ethers::types::{Address, TransactionReceipt, TxHash};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::{
    error::{MixerError, Result},
    ledger::MixerLedger,
    prover::{Proof, Prover, ProverGateway},
    relayer::{Relayer, RelayerGateway},
    types::{ensure_address, MerkleRoot, Nullifier, Secret},
    witness::WitnessBuilder,
};

#[derive(Clone, Debug)]
pub struct WithdrawalRequest {
    pub secret: Secret,
    /// Must be the recipient the deposit's leaf was bound to.
    pub recipient: Address,
    pub leaf_index: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WithdrawalState {
    Started,
    PathFetched,
    NullifierComputed(Nullifier),
    RootFetched(MerkleRoot),
    WitnessReady,
    ProofComputed,
    Submitted(TxHash),
    Mined(TxHash),
    Failed(MixerError),
}

impl WithdrawalState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WithdrawalState::Mined(_) | WithdrawalState::Failed(_))
    }
}

/// Lifecycle notifications. Any failure up to and including the relay is
/// `Submitted(Err)`; a failure to confirm is `Mined(Err)`.
#[derive(Clone, Debug)]
pub enum WithdrawalEvent {
    ProofComputed(Proof),
    Submitted(Result<TxHash>),
    Mined(Result<TransactionReceipt>),
}

pub struct WithdrawalCoordinator<L, R, P> {
    request: WithdrawalRequest,
    witness: WitnessBuilder<L>,
    prover: ProverGateway<P>,
    relayer: RelayerGateway<R, L>,
    verify_before_submit: bool,
    state: WithdrawalState,
    history: Vec<WithdrawalState>,
    events: Option<mpsc::UnboundedSender<WithdrawalEvent>>,
}

impl<L: MixerLedger, R: Relayer, P: Prover> WithdrawalCoordinator<L, R, P> {
    pub fn new(
        request: WithdrawalRequest,
        witness: WitnessBuilder<L>,
        prover: ProverGateway<P>,
        relayer: RelayerGateway<R, L>,
        verify_before_submit: bool,
    ) -> Self {
        Self {
            request,
            witness,
            prover,
            relayer,
            verify_before_submit,
            state: WithdrawalState::Started,
            history: vec![WithdrawalState::Started],
            events: None,
        }
    }

    pub fn with_events(mut self, sender: mpsc::UnboundedSender<WithdrawalEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn state(&self) -> &WithdrawalState {
        &self.state
    }

    pub fn history(&self) -> &[WithdrawalState] {
        &self.history
    }

    /// Run the withdrawal through to a mined receipt.
    pub async fn run(&mut self) -> Result<TransactionReceipt> {
        if self.state != WithdrawalState::Started {
            return Err(MixerError::InternalError(format!(
                "withdrawal already run, state is {:?}",
                self.state
            )));
        }

        let (nullifier, proof) = match self.prepare().await {
            Ok(prepared) => prepared,
            Err(e) => return Err(self.fail(e, WithdrawalEvent::Submitted)),
        };

        let submission = self
            .relayer
            .withdraw(self.request.recipient, nullifier, proof);
        let tx_hash = match submission.submitted.wait().await {
            Ok(tx_hash) => tx_hash,
            Err(e) => return Err(self.fail(e, WithdrawalEvent::Submitted)),
        };
        self.transition(WithdrawalState::Submitted(tx_hash));
        self.emit(WithdrawalEvent::Submitted(Ok(tx_hash)));

        match submission.mined.wait().await {
            Ok(receipt) => {
                self.transition(WithdrawalState::Mined(tx_hash));
                self.emit(WithdrawalEvent::Mined(Ok(receipt.clone())));
                Ok(receipt)
            }
            Err(e) => Err(self.fail(e, WithdrawalEvent::Mined)),
        }
    }

    /// Everything before the relay: witness, proof and local checks.
    async fn prepare(&mut self) -> Result<(Nullifier, Proof)> {
        let recipient = ensure_address(self.request.recipient, "recipient")?;
        let leaf_index = self.request.leaf_index;

        let path = self.witness.fetch_path(leaf_index).await?;
        self.transition(WithdrawalState::PathFetched);

        let nullifier = self.witness.compute_nullifier(&self.request.secret).await?;
        self.transition(WithdrawalState::NullifierComputed(nullifier));

        if self.witness.reader().is_nullifier_spent(&nullifier).await? {
            return Err(MixerError::NullifierAlreadySpent(nullifier));
        }

        let anchored = self.witness.anchor_root(leaf_index, path).await?;
        self.transition(WithdrawalState::RootFetched(anchored.root));

        let witness = self.witness.assemble(
            anchored,
            recipient,
            nullifier,
            self.request.secret.clone(),
            leaf_index,
        )?;
        let public_inputs = witness.public_inputs();
        self.transition(WithdrawalState::WitnessReady);

        let proof = self.prover.prove(witness).await?;
        self.transition(WithdrawalState::ProofComputed);
        self.emit(WithdrawalEvent::ProofComputed(proof.clone()));

        if self.verify_before_submit {
            if !self.prover.verify(&proof, &public_inputs).await? {
                return Err(MixerError::ProofGenerationFailed(
                    "proof failed local verification".into(),
                ));
            }
            let reader = self.witness.reader();
            if !reader.verify_on_ledger(&proof, &public_inputs).await? {
                return Err(MixerError::ProofGenerationFailed(
                    "mixer contract rejected the proof".into(),
                ));
            }
        }

        Ok((nullifier, proof))
    }

    fn transition(&mut self, next: WithdrawalState) {
        info!("Withdrawal {:?} -> {:?}", self.state, next);
        self.state = next.clone();
        self.history.push(next);
    }

    fn fail<T, F>(&mut self, err: MixerError, event: F) -> MixerError
    where
        F: FnOnce(Result<T>) -> WithdrawalEvent,
    {
        error!("Withdrawal failed in {:?}: {}", self.state, err);
        self.transition(WithdrawalState::Failed(err.clone()));
        self.emit(event(Err(err.clone())));
        err
    }

    fn emit(&self, event: WithdrawalEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}
