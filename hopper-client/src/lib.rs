//! Client-side orchestration for the hopper mixer.
//!
//! A depositor commits `hash(secret, recipient)` into the mixer's Merkle
//! tree through a relayer, then waits for the ledger's `LeafAdded` event.
//! Withdrawing reads the leaf's path and the current root, builds a witness,
//! hands it to an external prover and relays the proof together with the
//! nullifier `hash(secret)`.
//!
//! # Layout
//!
//! - [`codec`]: leaf and nullifier hashes via the ledger
//! - [`ledger`]: typed mixer contract oracle and read-side checks
//! - [`events`]: funding-event watcher
//! - [`witness`]: witness assembly with path/root consistency
//! - [`prover`]: prover capability and the CLI adapter
//! - [`relayer`]: relayed submission with submitted/mined notifications
//! - [`deposit`], [`withdrawal`]: the two state machines
//! - [`client`]: wires all of the above from a [`MixerConfig`]

pub mod client;
pub mod codec;
pub mod config;
pub mod deposit;
pub mod error;
pub mod events;
pub mod ledger;
pub mod prover;
pub mod relayer;
pub mod types;
pub mod withdrawal;
pub mod witness;

pub use client::MixerClient;
pub use codec::CommitmentCodec;
pub use config::{MixerConfig, ProverConfig};
pub use deposit::{DepositCoordinator, DepositEvent, DepositRequest, DepositState};
pub use error::{MixerError, Result};
pub use events::{select_funding_event, EventWatcher};
pub use ledger::{EvmLedger, LedgerReader, MixerLedger, LEAF_ADDED_EVENT};
pub use prover::{CliProver, Proof, Prover, ProverGateway, PublicInputs, FLAT_PROOF_LEN};
pub use relayer::{HttpRelayer, Notification, Relayer, RelayerGateway, Submission};
pub use types::{
    FundingEvent, Leaf, MerklePath, MerkleRoot, Nullifier, Secret, MAX_TREE_DEPTH,
    SNARK_SCALAR_FIELD,
};
pub use withdrawal::{WithdrawalCoordinator, WithdrawalEvent, WithdrawalRequest, WithdrawalState};
pub use witness::{Witness, WitnessBuilder};
