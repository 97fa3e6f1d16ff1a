use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use ethers::types::{Address, TxHash};
use hopper_client::{Leaf, MixerError, Nullifier, Proof, Relayer, Result};

use crate::MockLedger;

/// Relayer that executes the mixer's `commit`/`withdraw` against a [`MockLedger`].
pub struct MockRelayer {
    ledger: Arc<MockLedger>,
    auto_fund: AtomicBool,
    revert_next: AtomicBool,
    reject: Mutex<Option<MixerError>>,
    commits: AtomicUsize,
    withdrawals: AtomicUsize,
}

impl MockRelayer {
    pub fn new(ledger: Arc<MockLedger>) -> Self {
        Self {
            ledger,
            auto_fund: AtomicBool::new(true),
            revert_next: AtomicBool::new(false),
            reject: Mutex::new(None),
            commits: AtomicUsize::new(0),
            withdrawals: AtomicUsize::new(0),
        }
    }

    /// Whether a mined commit also inserts the leaf. On by default.
    pub fn set_auto_fund(&self, auto_fund: bool) {
        self.auto_fund.store(auto_fund, Ordering::SeqCst);
    }

    /// Refuse the next request with `err` before anything is broadcast.
    pub fn reject_next(&self, err: MixerError) {
        *self.reject.lock().expect("relayer state poisoned") = Some(err);
    }

    /// Mine the next transaction with a failed status.
    pub fn revert_next(&self) {
        self.revert_next.store(true, Ordering::SeqCst);
    }

    /// Commit requests that reached the ledger.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Withdrawal requests that reached the ledger.
    pub fn withdrawals(&self) -> usize {
        self.withdrawals.load(Ordering::SeqCst)
    }

    fn take_rejection(&self) -> Result<()> {
        match self.reject.lock().expect("relayer state poisoned").take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn succeeds(&self) -> bool {
        !self.revert_next.swap(false, Ordering::SeqCst)
    }
}

#[async_trait]
impl Relayer for MockRelayer {
    async fn submit_commit(&self, leaf: Leaf, _funder: Address) -> Result<TxHash> {
        self.take_rejection()?;
        self.commits.fetch_add(1, Ordering::SeqCst);
        let success = self.succeeds();
        let tx_hash = self.ledger.record_transaction(success);
        if success && self.auto_fund.load(Ordering::SeqCst) {
            self.ledger.fund(leaf);
        }
        Ok(tx_hash)
    }

    async fn submit_withdrawal(
        &self,
        recipient: Address,
        nullifier: Nullifier,
        proof: &Proof,
    ) -> Result<TxHash> {
        self.take_rejection()?;
        if self.ledger.spent(nullifier.value()) {
            return Err(MixerError::NullifierAlreadySpent(nullifier));
        }
        if !self.ledger.accepts_proof(recipient, nullifier.value(), proof.flat()) {
            return Err(MixerError::ContractCallFailed("withdraw: invalid proof".into()));
        }
        self.withdrawals.fetch_add(1, Ordering::SeqCst);
        let success = self.succeeds();
        if success {
            self.ledger.mark_spent(nullifier.value());
        }
        Ok(self.ledger.record_transaction(success))
    }
}
