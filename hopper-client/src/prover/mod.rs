//! Proof construction.
//!
//! The proving system is an opaque capability behind [`Prover`]. The
//! gateway moves each call onto the blocking pool so long proofs never
//! stall polling on the coordination thread, and never looks inside a proof
//! beyond its declared public inputs.

mod cli;

pub use cli::CliProver;

use std::sync::Arc;

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::{MixerError, Result},
    types::{address_to_field, MerkleRoot, Nullifier},
    witness::Witness,
};

/// Length of a flattened Groth16 proof: `A` (2), `B` (2x2), `C` (2).
pub const FLAT_PROOF_LEN: usize = 8;

/// Public inputs a proof commits to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicInputs {
    pub root: MerkleRoot,
    pub recipient: Address,
    pub nullifier: Nullifier,
}

impl PublicInputs {
    /// As field elements in circuit order.
    pub fn to_field_elements(&self) -> [U256; 3] {
        [
            self.root.value(),
            address_to_field(self.recipient),
            self.nullifier.value(),
        ]
    }
}

/// A proof in the flattened form the mixer contract consumes, plus the
/// public inputs the prover declared for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawProof")]
pub struct Proof {
    flat: Vec<U256>,
    inputs: Vec<U256>,
}

#[derive(Deserialize)]
struct RawProof {
    flat: Vec<U256>,
    inputs: Vec<U256>,
}

impl TryFrom<RawProof> for Proof {
    type Error = MixerError;

    fn try_from(raw: RawProof) -> Result<Self> {
        Proof::new(raw.flat, raw.inputs)
    }
}

impl Proof {
    pub fn new(flat: Vec<U256>, inputs: Vec<U256>) -> Result<Self> {
        if flat.len() != FLAT_PROOF_LEN {
            return Err(MixerError::ProofGenerationFailed(format!(
                "flat proof has {} elements, expected {FLAT_PROOF_LEN}",
                flat.len()
            )));
        }
        Ok(Self { flat, inputs })
    }

    /// Proof elements, passed through to the ledger unmodified.
    pub fn flat(&self) -> &[U256] {
        &self.flat
    }

    pub fn declared_inputs(&self) -> &[U256] {
        &self.inputs
    }

    /// Whether the declared inputs are exactly `expected`, in any order.
    pub fn declares(&self, expected: &PublicInputs) -> bool {
        let mut declared = self.inputs.clone();
        let mut wanted = expected.to_field_elements().to_vec();
        declared.sort();
        wanted.sort();
        declared == wanted
    }
}

/// Prove/verify capability of the external proving system.
///
/// Calls may block for a long time; callers go through [`ProverGateway`].
pub trait Prover: Send + Sync + 'static {
    /// Build a proof for `witness`. A witness the circuit rejects is a
    /// [`MixerError::ProofGenerationFailed`], never retried.
    fn prove(&self, witness: &Witness) -> Result<Proof>;

    /// Check `proof` against `public_inputs`.
    fn verify(&self, proof: &Proof, public_inputs: &PublicInputs) -> Result<bool>;
}

/// Runs a [`Prover`] off the async executor.
pub struct ProverGateway<P> {
    prover: Arc<P>,
}

impl<P> Clone for ProverGateway<P> {
    fn clone(&self) -> Self {
        Self { prover: Arc::clone(&self.prover) }
    }
}

impl<P: Prover> ProverGateway<P> {
    pub fn new(prover: Arc<P>) -> Self {
        Self { prover }
    }

    pub async fn prove(&self, witness: Witness) -> Result<Proof> {
        let prover = Arc::clone(&self.prover);
        info!("Computing proof for leaf index {}", witness.leaf_index());
        let proof = tokio::task::spawn_blocking(move || prover.prove(&witness))
            .await
            .map_err(|e| MixerError::InternalError(format!("prover task failed: {e}")))??;
        debug!("proof computed");
        Ok(proof)
    }

    /// Local sanity check before submission. The ledger stays authoritative.
    pub async fn verify(&self, proof: &Proof, public_inputs: &PublicInputs) -> Result<bool> {
        if !proof.declares(public_inputs) {
            debug!("proof declares different public inputs");
            return Ok(false);
        }
        let prover = Arc::clone(&self.prover);
        let proof = proof.clone();
        let public_inputs = *public_inputs;
        tokio::task::spawn_blocking(move || prover.verify(&proof, &public_inputs))
            .await
            .map_err(|e| MixerError::InternalError(format!("verifier task failed: {e}")))?
    }
}
