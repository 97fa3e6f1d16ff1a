//! In-memory mixer used by the `hopper-client` tests.
//!
//! [`MockLedger`] keeps a real fixed-depth Merkle tree over keccak-based
//! stand-in hashes, [`MockRelayer`] plays the relayer plus the contract's
//! `commit`/`withdraw` entry points, and [`MockProver`] produces proofs that
//! only verify for consistent witnesses.

mod ledger;
mod prover;
mod relayer;

pub use ledger::MockLedger;
pub use prover::MockProver;
pub use relayer::MockRelayer;

use std::sync::Arc;

use ethers::{
    abi::{self, Token},
    types::{Address, BigEndianHash, Bytes, Log, H256, U256, U64},
    utils::keccak256,
};
use hopper_client::{
    types::address_to_field, MixerClient, MixerConfig, PublicInputs, Secret, FLAT_PROOF_LEN,
    LEAF_ADDED_EVENT, SNARK_SCALAR_FIELD,
};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// Depth used unless a test asks for another.
pub const DEFAULT_DEPTH: usize = 4;

/// Block the mock chain starts at.
pub const GENESIS_BLOCK: u64 = 100;

/// keccak over the 32-byte words of `parts`, reduced into the field.
pub fn field_hash(parts: &[U256]) -> U256 {
    let mut bytes = Vec::with_capacity(parts.len() * 32);
    for part in parts {
        let mut word = [0u8; 32];
        part.to_big_endian(&mut word);
        bytes.extend_from_slice(&word);
    }
    U256::from_big_endian(&keccak256(bytes)) % SNARK_SCALAR_FIELD
}

pub fn leaf_hash(secret: &Secret, recipient: Address) -> U256 {
    field_hash(&[secret.expose(), address_to_field(recipient)])
}

pub fn nullifier_hash(secret: &Secret) -> U256 {
    field_hash(&[secret.expose()])
}

pub fn node_hash(left: U256, right: U256) -> U256 {
    field_hash(&[left, right])
}

/// Fold `siblings` up from `leaf` at `index`.
pub fn root_from_path(leaf: U256, index: u64, siblings: &[U256]) -> U256 {
    siblings.iter().enumerate().fold(leaf, |node, (level, sibling)| {
        if (index >> level) & 1 == 1 {
            node_hash(*sibling, node)
        } else {
            node_hash(node, *sibling)
        }
    })
}

/// The only flat proof the mock verifier accepts for `inputs`.
pub fn expected_proof(inputs: &PublicInputs) -> Vec<U256> {
    let [root, recipient, nullifier] = inputs.to_field_elements();
    (0..FLAT_PROOF_LEN as u64)
        .map(|i| field_hash(&[root, recipient, nullifier, U256::from(i)]))
        .collect()
}

/// A `LeafAdded` log as an EVM node would return it.
pub fn leaf_added_log(leaf: U256, leaf_index: u64, block: u64, log_index: u64) -> Log {
    Log {
        topics: vec![H256::from(keccak256(LEAF_ADDED_EVENT)), H256::from_uint(&leaf)],
        data: Bytes::from(abi::encode(&[Token::Uint(U256::from(leaf_index))])),
        block_number: Some(U64::from(block)),
        log_index: Some(U256::from(log_index)),
        removed: Some(false),
        ..Default::default()
    }
}

/// Deterministic secret per seed.
pub fn test_secret(seed: u64) -> Secret {
    Secret::random(&mut ChaCha20Rng::seed_from_u64(seed))
}

/// Deterministic non-zero address per tag.
pub fn test_address(tag: u8) -> Address {
    Address::repeat_byte(tag.max(1))
}

/// Config with one-second ticks and a short receipt timeout.
pub fn test_config() -> MixerConfig {
    MixerConfig {
        mixer_address: Some(format!("{:?}", Address::repeat_byte(0xee))),
        start_block: GENESIS_BLOCK,
        poll_interval_secs: 1,
        receipt_poll_interval_secs: 1,
        receipt_timeout_secs: 30,
        ..Default::default()
    }
}

/// Client wired to fresh in-memory collaborators.
pub struct Harness {
    pub ledger: Arc<MockLedger>,
    pub relayer: Arc<MockRelayer>,
    pub prover: Arc<MockProver>,
    pub client: MixerClient<MockLedger, MockRelayer, MockProver>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(DEFAULT_DEPTH, test_config())
    }

    pub fn with(depth: usize, config: MixerConfig) -> Self {
        let ledger = Arc::new(MockLedger::new(depth));
        let relayer = Arc::new(MockRelayer::new(Arc::clone(&ledger)));
        let prover = Arc::new(MockProver::new());
        let client = MixerClient::new(Arc::clone(&ledger), Arc::clone(&relayer), config)
            .with_prover(Arc::clone(&prover));
        Self {
            ledger,
            relayer,
            prover,
            client,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
