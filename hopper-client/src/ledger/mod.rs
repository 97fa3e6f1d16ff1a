//! Ledger oracle.
//!
//! [`MixerLedger`] is the typed surface of the mixer contract: one method per
//! contract operation, fixed argument and return types. [`LedgerReader`]
//! layers shape checks over the read-only queries used during withdrawal.

mod evm;

pub use evm::EvmLedger;

use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Address, Log, TransactionReceipt, TxHash, U256};
use tracing::debug;

use crate::{
    error::{MixerError, Result},
    prover::{Proof, PublicInputs},
    types::{MerklePath, MerkleRoot, Nullifier, Secret, MAX_TREE_DEPTH},
};

/// Name of the event emitted when a funded commitment enters the tree.
pub const LEAF_ADDED_EVENT: &str = "LeafAdded(uint256,uint256)";

/// Read/write oracle over the mixer contract.
///
/// Every method is a single network round trip. Implementations report
/// transport failures as [`MixerError::ContractCallFailed`] and responses of
/// the wrong shape as [`MixerError::UnexpectedDataReceived`].
#[async_trait]
pub trait MixerLedger: Send + Sync + 'static {
    /// `makeLeafHash(secret, recipient)`.
    async fn make_leaf_hash(&self, secret: &Secret, recipient: Address) -> Result<U256>;

    /// `makeNullifierHash(secret)`.
    async fn make_nullifier_hash(&self, secret: &Secret) -> Result<U256>;

    /// `getMerklePath(index)`, leaf level first.
    async fn merkle_path(&self, leaf_index: u64) -> Result<Vec<U256>>;

    /// `getRoot()`.
    async fn root(&self) -> Result<U256>;

    /// `isSpent(nullifier)`.
    async fn is_spent(&self, nullifier: U256) -> Result<bool>;

    /// `treeDepth()`.
    async fn tree_depth(&self) -> Result<usize>;

    /// `verifyProof(root, recipient, nullifier, proof)` as a view call.
    async fn verify_proof(
        &self,
        root: U256,
        recipient: Address,
        nullifier: U256,
        proof: &[U256],
    ) -> Result<bool>;

    /// Raw `LeafAdded` logs whose indexed leaf equals `leaf`, from `from_block` on.
    async fn leaf_added_logs(&self, leaf: U256, from_block: u64) -> Result<Vec<Log>>;

    /// Receipt of a mined transaction, `None` while pending.
    async fn transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<TransactionReceipt>>;

    /// Current chain height.
    async fn block_number(&self) -> Result<u64>;
}

/// Read-only queries used to assemble a withdrawal.
pub struct LedgerReader<L> {
    ledger: Arc<L>,
}

impl<L> Clone for LedgerReader<L> {
    fn clone(&self) -> Self {
        Self { ledger: Arc::clone(&self.ledger) }
    }
}

impl<L: MixerLedger> LedgerReader<L> {
    pub fn new(ledger: Arc<L>) -> Self {
        Self { ledger }
    }

    /// Fixed depth of the ledger's tree.
    pub async fn tree_depth(&self) -> Result<usize> {
        let depth = self.ledger.tree_depth().await?;
        if depth == 0 || depth > MAX_TREE_DEPTH {
            return Err(MixerError::UnexpectedDataReceived(format!(
                "tree depth {depth} outside 1..={MAX_TREE_DEPTH}"
            )));
        }
        Ok(depth)
    }

    /// Sibling path for `leaf_index`; its length always equals the tree depth.
    pub async fn merkle_path(&self, leaf_index: u64) -> Result<MerklePath> {
        let depth = self.tree_depth().await?;
        check_leaf_index(leaf_index, depth)?;

        let siblings = self.ledger.merkle_path(leaf_index).await?;
        if siblings.len() != depth {
            return Err(MixerError::UnexpectedDataReceived(format!(
                "merkle path has {} entries, tree depth is {depth}",
                siblings.len()
            )));
        }
        debug!(leaf_index, depth, "fetched merkle path");
        Ok(MerklePath::new(siblings))
    }

    pub async fn current_root(&self) -> Result<MerkleRoot> {
        let root = self.ledger.root().await?;
        debug!(root = %format_args!("{root:#x}"), "fetched merkle root");
        Ok(MerkleRoot::from(root))
    }

    pub async fn is_nullifier_spent(&self, nullifier: &Nullifier) -> Result<bool> {
        self.ledger.is_spent(nullifier.value()).await
    }

    /// Ask the contract's own verifier about `proof`, without spending anything.
    pub async fn verify_on_ledger(&self, proof: &Proof, inputs: &PublicInputs) -> Result<bool> {
        self.ledger
            .verify_proof(
                inputs.root.value(),
                inputs.recipient,
                inputs.nullifier.value(),
                proof.flat(),
            )
            .await
    }
}

/// A leaf index must address a slot inside a tree of `depth` levels.
pub(crate) fn check_leaf_index(leaf_index: u64, depth: usize) -> Result<()> {
    let capacity = 1u128 << depth;
    if u128::from(leaf_index) >= capacity {
        return Err(MixerError::InvalidParams(format!(
            "leaf index {leaf_index} out of range for a tree of depth {depth}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_index_bounds() {
        assert!(check_leaf_index(0, 1).is_ok());
        assert!(check_leaf_index(1, 1).is_ok());
        assert!(check_leaf_index(2, 1).is_err());
        assert!(check_leaf_index((1 << 15) - 1, 15).is_ok());
        assert!(check_leaf_index(1 << 15, 15).is_err());
        assert!(check_leaf_index(u64::MAX, 32).is_err());
    }
}
