use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use hopper_client::{MixerError, Proof, Prover, PublicInputs, Result, Witness};

use crate::{expected_proof, leaf_hash, nullifier_hash, root_from_path};

/// Prover that only succeeds for witnesses consistent with the mock hashes.
#[derive(Default)]
pub struct MockProver {
    fail: AtomicBool,
    reject_verification: AtomicBool,
    proofs: AtomicUsize,
    verifications: AtomicUsize,
}

impl MockProver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every witness.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Answer `false` to every verification.
    pub fn set_rejecting(&self, reject: bool) {
        self.reject_verification.store(reject, Ordering::SeqCst);
    }

    /// Number of `prove` calls.
    pub fn proofs(&self) -> usize {
        self.proofs.load(Ordering::SeqCst)
    }

    pub fn verifications(&self) -> usize {
        self.verifications.load(Ordering::SeqCst)
    }
}

impl Prover for MockProver {
    fn prove(&self, witness: &Witness) -> Result<Proof> {
        self.proofs.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(MixerError::ProofGenerationFailed("circuit rejected witness".into()));
        }
        if witness.nullifier().value() != nullifier_hash(witness.secret()) {
            return Err(MixerError::ProofGenerationFailed("nullifier does not match secret".into()));
        }
        let leaf = leaf_hash(witness.secret(), witness.recipient());
        let root = root_from_path(leaf, witness.leaf_index(), witness.path().siblings());
        if root != witness.root().value() {
            return Err(MixerError::ProofGenerationFailed("path does not lead to root".into()));
        }

        let inputs = witness.public_inputs();
        Proof::new(expected_proof(&inputs), inputs.to_field_elements().to_vec())
    }

    fn verify(&self, proof: &Proof, public_inputs: &PublicInputs) -> Result<bool> {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        if self.reject_verification.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(proof.flat() == expected_proof(public_inputs).as_slice())
    }
}
