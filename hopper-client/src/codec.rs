//! Commitment and nullifier derivation.
//!
//! Hashes are computed by the ledger's own hash functions rather than
//! locally, so the values are bit-exact with what on-ledger verification
//! expects.

use std::sync::Arc;

use ethers::types::Address;
use tracing::debug;

use crate::{
    error::{MixerError, Result},
    ledger::MixerLedger,
    types::{ensure_address, Leaf, Nullifier, Secret},
};

/// Maps `(secret, recipient)` to a leaf and `secret` to a nullifier.
pub struct CommitmentCodec<L> {
    ledger: Arc<L>,
}

impl<L> Clone for CommitmentCodec<L> {
    fn clone(&self) -> Self {
        Self { ledger: Arc::clone(&self.ledger) }
    }
}

impl<L: MixerLedger> CommitmentCodec<L> {
    pub fn new(ledger: Arc<L>) -> Self {
        Self { ledger }
    }

    /// `hash(secret, recipient)`.
    pub async fn leaf_hash(&self, secret: &Secret, recipient: Address) -> Result<Leaf> {
        let recipient = ensure_address(recipient, "recipient")?;
        let leaf = self
            .ledger
            .make_leaf_hash(secret, recipient)
            .await
            .map_err(|e| undecodable("makeLeafHash", e))?;
        debug!(leaf = %format_args!("{leaf:#x}"), "computed leaf hash");
        Ok(Leaf::from(leaf))
    }

    /// `hash(secret)`. Independent of where (or whether) the leaf sits in the tree.
    pub async fn nullifier_hash(&self, secret: &Secret) -> Result<Nullifier> {
        let nullifier = self
            .ledger
            .make_nullifier_hash(secret)
            .await
            .map_err(|e| undecodable("makeNullifierHash", e))?;
        Ok(Nullifier::from(nullifier))
    }
}

/// A hash call that answered with nothing usable is a failed call.
fn undecodable(call: &str, err: MixerError) -> MixerError {
    match err {
        MixerError::UnexpectedDataReceived(detail) => {
            MixerError::ContractCallFailed(format!("{call} returned no decodable value: {detail}"))
        }
        other => other,
    }
}
