//! Transaction submission through a relayer.
//!
//! The relayer pays gas and broadcasts; the client learns about a
//! transaction twice: once when the relayer accepts it and once when the
//! ledger mines it. The two moments are separated by unbounded confirmation
//! latency, so each is its own [`Notification`].

mod http;

pub use http::HttpRelayer;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use ethers::types::{Address, TransactionReceipt, TxHash, U64};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{
    error::{MixerError, Result},
    ledger::MixerLedger,
    prover::Proof,
    types::{Leaf, Nullifier},
};

/// A relayer accepting commit and withdraw requests.
#[async_trait]
pub trait Relayer: Send + Sync + 'static {
    /// Ask the relayer to place `leaf` on the ledger on behalf of `funder`.
    async fn submit_commit(&self, leaf: Leaf, funder: Address) -> Result<TxHash>;

    /// Ask the relayer to withdraw to `recipient` with `proof`.
    async fn submit_withdrawal(
        &self,
        recipient: Address,
        nullifier: Nullifier,
        proof: &Proof,
    ) -> Result<TxHash>;
}

/// One-shot lifecycle notification.
#[derive(Debug)]
pub struct Notification<T> {
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T> Notification<T> {
    fn channel() -> (oneshot::Sender<Result<T>>, Self) {
        let (sender, receiver) = oneshot::channel();
        (sender, Self { receiver })
    }

    /// Wait for the outcome.
    pub async fn wait(self) -> Result<T> {
        self.receiver.await.map_err(|_| {
            MixerError::InternalError("relayer task ended without reporting".into())
        })?
    }
}

/// The two notification points of one relayed transaction.
#[derive(Debug)]
pub struct Submission {
    /// The relayer accepted and broadcast the transaction.
    pub submitted: Notification<TxHash>,
    /// The ledger mined it.
    pub mined: Notification<TransactionReceipt>,
}

/// Fire-and-forget submission with receipt tracking.
pub struct RelayerGateway<R, L> {
    relayer: Arc<R>,
    ledger: Arc<L>,
    receipt_poll_interval: Duration,
    receipt_timeout: Duration,
}

impl<R, L> Clone for RelayerGateway<R, L> {
    fn clone(&self) -> Self {
        Self {
            relayer: Arc::clone(&self.relayer),
            ledger: Arc::clone(&self.ledger),
            receipt_poll_interval: self.receipt_poll_interval,
            receipt_timeout: self.receipt_timeout,
        }
    }
}

impl<R: Relayer, L: MixerLedger> RelayerGateway<R, L> {
    pub fn new(
        relayer: Arc<R>,
        ledger: Arc<L>,
        receipt_poll_interval: Duration,
        receipt_timeout: Duration,
    ) -> Self {
        Self {
            relayer,
            ledger,
            receipt_poll_interval,
            receipt_timeout,
        }
    }

    /// Relay a commitment.
    pub fn commit(&self, leaf: Leaf, funder: Address) -> Submission {
        let relayer = Arc::clone(&self.relayer);
        self.track("commit", async move {
            info!("Relaying commit of leaf {} for funder {:?}", leaf, funder);
            relayer.submit_commit(leaf, funder).await
        })
    }

    /// Relay a withdrawal. The proof is forwarded untouched.
    pub fn withdraw(&self, recipient: Address, nullifier: Nullifier, proof: Proof) -> Submission {
        let relayer = Arc::clone(&self.relayer);
        self.track("withdraw", async move {
            info!("Relaying withdrawal of nullifier {} to {:?}", nullifier, recipient);
            relayer.submit_withdrawal(recipient, nullifier, &proof).await
        })
    }

    /// Spawn the submission and the receipt wait behind two notifications.
    fn track<F>(&self, kind: &'static str, submit: F) -> Submission
    where
        F: std::future::Future<Output = Result<TxHash>> + Send + 'static,
    {
        let (submitted_tx, submitted) = Notification::channel();
        let (mined_tx, mined) = Notification::channel();
        let ledger = Arc::clone(&self.ledger);
        let poll_interval = self.receipt_poll_interval;
        let timeout = self.receipt_timeout;

        tokio::spawn(async move {
            let tx_hash = match submit.await {
                Ok(hash) => hash,
                Err(e) => {
                    warn!("Relayer rejected {}: {}", kind, e);
                    // Receivers may already be gone; nothing left to tell.
                    let _ = submitted_tx.send(Err(e.clone()));
                    let _ = mined_tx.send(Err(e));
                    return;
                }
            };
            info!("{} transaction submitted: {:?}", kind, tx_hash);
            let _ = submitted_tx.send(Ok(tx_hash));

            let outcome = match tokio::time::timeout(
                timeout,
                await_receipt(ledger.as_ref(), tx_hash, poll_interval),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(MixerError::ContractCallFailed(format!(
                    "{kind} transaction {tx_hash:?} not mined within {}s",
                    timeout.as_secs()
                ))),
            };
            match &outcome {
                Ok(receipt) => info!(
                    "{} transaction {:?} mined in block {:?}",
                    kind, tx_hash, receipt.block_number
                ),
                Err(e) => warn!("{} transaction {:?} failed to confirm: {}", kind, tx_hash, e),
            }
            let _ = mined_tx.send(outcome);
        });

        Submission { submitted, mined }
    }
}

/// Poll the ledger until the receipt appears. RPC errors are re-polled;
/// a reverted receipt is final.
async fn await_receipt<L: MixerLedger>(
    ledger: &L,
    tx_hash: TxHash,
    poll_interval: Duration,
) -> Result<TransactionReceipt> {
    loop {
        match ledger.transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) => {
                if receipt.status == Some(U64::zero()) {
                    return Err(MixerError::ContractCallFailed(format!(
                        "transaction {tx_hash:?} reverted"
                    )));
                }
                return Ok(receipt);
            }
            Ok(None) => debug!("transaction {:?} still pending", tx_hash),
            Err(e) if e.is_transient() => warn!("Failed to fetch receipt: {}", e),
            Err(e) => return Err(e),
        }
        tokio::time::sleep(poll_interval).await;
    }
}
