//! Witness assembly.
//!
//! The three reads a proof depends on happen in a fixed order: path, then
//! nullifier, then root. The root must describe ledger state no older than
//! the path, so after the root is read the path is read once more; if a
//! leaf was inserted in between, the path changed and the pair is refetched.

use ethers::types::{Address, U256};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    codec::CommitmentCodec,
    error::{MixerError, Result},
    ledger::{check_leaf_index, LedgerReader, MixerLedger},
    prover::PublicInputs,
    types::{address_to_field, ensure_address, MerklePath, MerkleRoot, Nullifier, Secret},
};

/// The exact, ordered input tuple the prover consumes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Witness {
    root: MerkleRoot,
    recipient: Address,
    nullifier: Nullifier,
    secret: Secret,
    leaf_index: u64,
    path: MerklePath,
}

impl Witness {
    /// Assemble a witness, checking the path against the tree depth.
    pub fn new(
        root: MerkleRoot,
        recipient: Address,
        nullifier: Nullifier,
        secret: Secret,
        leaf_index: u64,
        path: MerklePath,
        tree_depth: usize,
    ) -> Result<Self> {
        ensure_address(recipient, "recipient")?;
        if path.len() != tree_depth {
            return Err(MixerError::InternalError(format!(
                "merkle path has {} entries, tree depth is {tree_depth}",
                path.len()
            )));
        }
        check_leaf_index(leaf_index, tree_depth)?;

        Ok(Self {
            root,
            recipient,
            nullifier,
            secret,
            leaf_index,
            path,
        })
    }

    pub fn root(&self) -> MerkleRoot {
        self.root
    }

    pub fn recipient(&self) -> Address {
        self.recipient
    }

    pub fn nullifier(&self) -> Nullifier {
        self.nullifier
    }

    pub fn secret(&self) -> &Secret {
        &self.secret
    }

    pub fn leaf_index(&self) -> u64 {
        self.leaf_index
    }

    pub fn path(&self) -> &MerklePath {
        &self.path
    }

    pub fn tree_depth(&self) -> usize {
        self.path.len()
    }

    /// Leaf position as tree-depth bits, least significant first.
    pub fn address_bits(&self) -> Vec<bool> {
        (0..self.tree_depth())
            .map(|level| (self.leaf_index >> level) & 1 == 1)
            .collect()
    }

    /// The values the proof exposes publicly.
    pub fn public_inputs(&self) -> PublicInputs {
        PublicInputs {
            root: self.root,
            recipient: self.recipient,
            nullifier: self.nullifier,
        }
    }

    /// JSON arguments for the external prover.
    pub fn to_prover_args(&self) -> ProverArgs {
        ProverArgs {
            root: self.root.value().to_string(),
            wallet_address: address_to_field(self.recipient).to_string(),
            nullifier: self.nullifier.value().to_string(),
            nullifier_secret: self.secret.to_decimal(),
            address: self.leaf_index,
            path: self.path.siblings().iter().map(U256::to_string).collect(),
        }
    }
}

/// Prover input document. Field elements are decimal strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProverArgs {
    pub root: String,
    pub wallet_address: String,
    pub nullifier: String,
    pub nullifier_secret: String,
    pub address: u64,
    pub path: Vec<String>,
}

/// A path together with a root it is known to be consistent with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnchoredPath {
    pub path: MerklePath,
    pub root: MerkleRoot,
}

/// Sequences the ledger reads behind a witness.
pub struct WitnessBuilder<L> {
    reader: LedgerReader<L>,
    codec: CommitmentCodec<L>,
    attempts: u32,
}

impl<L> Clone for WitnessBuilder<L> {
    fn clone(&self) -> Self {
        Self {
            reader: self.reader.clone(),
            codec: self.codec.clone(),
            attempts: self.attempts,
        }
    }
}

impl<L: MixerLedger> WitnessBuilder<L> {
    pub fn new(reader: LedgerReader<L>, codec: CommitmentCodec<L>, attempts: u32) -> Self {
        Self {
            reader,
            codec,
            attempts: attempts.max(1),
        }
    }

    /// Full build: path, nullifier, root, in that order. The first failing
    /// read is returned as is and no partial witness escapes.
    pub async fn build(&self, secret: &Secret, recipient: Address, leaf_index: u64) -> Result<Witness> {
        ensure_address(recipient, "recipient")?;
        let path = self.fetch_path(leaf_index).await?;
        let nullifier = self.compute_nullifier(secret).await?;
        let anchored = self.anchor_root(leaf_index, path).await?;
        self.assemble(anchored, recipient, nullifier, secret.clone(), leaf_index)
    }

    /// Step one.
    pub async fn fetch_path(&self, leaf_index: u64) -> Result<MerklePath> {
        self.reader.merkle_path(leaf_index).await
    }

    /// Step two.
    pub async fn compute_nullifier(&self, secret: &Secret) -> Result<Nullifier> {
        self.codec.nullifier_hash(secret).await
    }

    /// Step three: read the root, then confirm `path` still holds against it.
    pub async fn anchor_root(&self, leaf_index: u64, path: MerklePath) -> Result<AnchoredPath> {
        let mut path = path;
        for attempt in 1..=self.attempts {
            let root = self.reader.current_root().await?;
            let recheck = self.reader.merkle_path(leaf_index).await?;
            if recheck == path {
                debug!(attempt, "path and root consistent");
                return Ok(AnchoredPath { path, root });
            }
            warn!(
                "Merkle path for index {} moved while reading root (attempt {}/{})",
                leaf_index, attempt, self.attempts
            );
            path = recheck;
        }
        Err(MixerError::InternalError(format!(
            "merkle path for index {leaf_index} kept changing across {} attempts",
            self.attempts
        )))
    }

    /// Step four: validate and assemble.
    pub fn assemble(
        &self,
        anchored: AnchoredPath,
        recipient: Address,
        nullifier: Nullifier,
        secret: Secret,
        leaf_index: u64,
    ) -> Result<Witness> {
        let depth = anchored.path.len();
        Witness::new(
            anchored.root,
            recipient,
            nullifier,
            secret,
            leaf_index,
            anchored.path,
            depth,
        )
    }

    pub fn reader(&self) -> &LedgerReader<L> {
        &self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(leaf_index: u64, depth: usize) -> Result<Witness> {
        Witness::new(
            MerkleRoot::from(U256::from(11)),
            Address::repeat_byte(0x22),
            Nullifier::from(U256::from(33)),
            Secret::new(U256::from(44)).unwrap(),
            leaf_index,
            MerklePath::new(vec![U256::from(5); depth]),
            depth,
        )
    }

    #[test]
    fn test_path_length_must_match_depth() {
        let err = Witness::new(
            MerkleRoot::from(U256::one()),
            Address::repeat_byte(1),
            Nullifier::from(U256::one()),
            Secret::new(U256::one()).unwrap(),
            0,
            MerklePath::new(vec![U256::zero(); 3]),
            4,
        )
        .unwrap_err();
        assert!(matches!(err, MixerError::InternalError(_)));
    }

    #[test]
    fn test_address_bits_lsb_first() {
        let witness = sample(6, 4).unwrap();
        assert_eq!(witness.address_bits(), vec![false, true, true, false]);
    }

    #[test]
    fn test_leaf_index_out_of_range() {
        assert!(matches!(sample(16, 4), Err(MixerError::InvalidParams(_))));
    }

    #[test]
    fn test_prover_args_json_shape() {
        let witness = sample(3, 2).unwrap();
        let json = serde_json::to_value(witness.to_prover_args()).unwrap();
        assert_eq!(json["root"], "11");
        assert_eq!(json["nullifier"], "33");
        assert_eq!(json["nullifier_secret"], "44");
        assert_eq!(json["address"], 3);
        assert_eq!(json["path"], serde_json::json!(["5", "5"]));
        let wallet = U256::from_dec_str(json["wallet_address"].as_str().unwrap()).unwrap();
        assert_eq!(wallet, address_to_field(Address::repeat_byte(0x22)));
    }

    #[test]
    fn test_public_inputs_match_witness() {
        let witness = sample(1, 2).unwrap();
        let public = witness.public_inputs();
        assert_eq!(public.root, witness.root());
        assert_eq!(public.recipient, witness.recipient());
        assert_eq!(public.nullifier, witness.nullifier());
    }
}
