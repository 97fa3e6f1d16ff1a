//! Adapter for the command-line prover (`<binary> prove_json` / `verify`).

use std::{
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use ethers::types::U256;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Proof, Prover, PublicInputs, FLAT_PROOF_LEN};
use crate::{
    config::ProverConfig,
    error::{MixerError, Result},
    types::parse_word,
    witness::Witness,
};

/// Proof document produced by the prover: affine points as hex strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofJson {
    #[serde(rename = "A")]
    pub a: [String; 2],
    #[serde(rename = "B")]
    pub b: [[String; 2]; 2],
    #[serde(rename = "C")]
    pub c: [String; 2],
    pub input: Vec<String>,
}

impl ProofJson {
    /// `[A0, A1, B00, B01, B10, B11, C0, C1]`.
    pub fn to_proof(&self) -> Result<Proof> {
        let ordered = self
            .a
            .iter()
            .chain(self.b.iter().flatten())
            .chain(self.c.iter());
        let flat = ordered
            .map(|value| parse_proof_element(value))
            .collect::<Result<Vec<_>>>()?;
        let inputs = self
            .input
            .iter()
            .map(|value| parse_proof_element(value))
            .collect::<Result<Vec<_>>>()?;
        Proof::new(flat, inputs)
    }

    /// Inverse of [`ProofJson::to_proof`], for handing a proof back to the verifier.
    pub fn from_proof(proof: &Proof) -> Self {
        let hex = |value: &U256| format!("{value:#x}");
        let flat: Vec<String> = proof.flat().iter().map(hex).collect();
        debug_assert_eq!(flat.len(), FLAT_PROOF_LEN);
        Self {
            a: [flat[0].clone(), flat[1].clone()],
            b: [
                [flat[2].clone(), flat[3].clone()],
                [flat[4].clone(), flat[5].clone()],
            ],
            c: [flat[6].clone(), flat[7].clone()],
            input: proof.declared_inputs().iter().map(hex).collect(),
        }
    }
}

/// Proof coordinates live in the base field, so only the word size is checked.
fn parse_proof_element(value: &str) -> Result<U256> {
    parse_word(value)
        .map_err(|e| MixerError::ProofGenerationFailed(format!("prover output: {e}")))
}

/// Runs an external prover binary per proof.
#[derive(Clone, Debug)]
pub struct CliProver {
    binary: PathBuf,
    proving_key: PathBuf,
    verifying_key: Option<PathBuf>,
}

impl CliProver {
    pub fn new(binary: impl Into<PathBuf>, proving_key: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            proving_key: proving_key.into(),
            verifying_key: None,
        }
    }

    pub fn with_verifying_key(mut self, verifying_key: impl Into<PathBuf>) -> Self {
        self.verifying_key = Some(verifying_key.into());
        self
    }

    pub fn from_config(config: &ProverConfig) -> Self {
        let prover = Self::new(&config.binary, &config.proving_key);
        match &config.verifying_key {
            Some(vk) => prover.with_verifying_key(vk),
            None => prover,
        }
    }

    fn run_verify(&self, verifying_key: &Path, proof_path: &Path) -> Result<bool> {
        let status = Command::new(&self.binary)
            .arg("verify")
            .arg(verifying_key)
            .arg(proof_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| {
                MixerError::ProofGenerationFailed(format!(
                    "failed to launch verifier {}: {e}",
                    self.binary.display()
                ))
            })?;
        Ok(status.success())
    }
}

impl Prover for CliProver {
    fn prove(&self, witness: &Witness) -> Result<Proof> {
        let args = serde_json::to_vec(&witness.to_prover_args())?;

        let mut child = Command::new(&self.binary)
            .arg("prove_json")
            .arg(&self.proving_key)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                MixerError::ProofGenerationFailed(format!(
                    "failed to launch prover {}: {e}",
                    self.binary.display()
                ))
            })?;

        {
            let stdin = child
                .stdin
                .as_mut()
                .ok_or_else(|| MixerError::InternalError("prover stdin unavailable".into()))?;
            stdin
                .write_all(&args)
                .map_err(|e| MixerError::ProofGenerationFailed(format!("writing prover input: {e}")))?;
        }
        // Close stdin so the prover sees EOF.
        drop(child.stdin.take());

        let output = child
            .wait_with_output()
            .map_err(|e| MixerError::ProofGenerationFailed(format!("waiting for prover: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Prover exited with {}: {}", output.status, stderr.trim());
            return Err(MixerError::ProofGenerationFailed(format!(
                "prover exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let document: ProofJson = serde_json::from_slice(&output.stdout)
            .map_err(|e| MixerError::ProofGenerationFailed(format!("unparseable proof: {e}")))?;
        debug!("prover returned {} public inputs", document.input.len());
        document.to_proof()
    }

    fn verify(&self, proof: &Proof, _public_inputs: &PublicInputs) -> Result<bool> {
        let verifying_key = self.verifying_key.as_deref().ok_or_else(|| {
            MixerError::Config("no verifying key configured for local verification".into())
        })?;

        let proof_path = std::env::temp_dir().join(format!(
            "hopper-proof-{:016x}.json",
            rand::thread_rng().gen::<u64>()
        ));
        let document = serde_json::to_vec(&ProofJson::from_proof(proof))?;
        std::fs::write(&proof_path, document)
            .map_err(|e| MixerError::InternalError(format!("writing proof file: {e}")))?;

        let result = self.run_verify(verifying_key, &proof_path);
        if let Err(e) = std::fs::remove_file(&proof_path) {
            debug!("could not remove {}: {}", proof_path.display(), e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> ProofJson {
        ProofJson {
            a: ["0x1".into(), "0x2".into()],
            b: [["0x3".into(), "0x4".into()], ["0x5".into(), "0x6".into()]],
            c: ["0x7".into(), "0x8".into()],
            input: vec!["0xa".into(), "0xb".into(), "0xc".into()],
        }
    }

    #[test]
    fn test_flatten_order() {
        let proof = sample_json().to_proof().unwrap();
        let expected: Vec<U256> = (1..=8u64).map(U256::from).collect();
        assert_eq!(proof.flat(), expected.as_slice());
        assert_eq!(proof.declared_inputs(), &[U256::from(10), U256::from(11), U256::from(12)]);
    }

    #[test]
    fn test_json_round_trip_keeps_layout() {
        let proof = sample_json().to_proof().unwrap();
        assert_eq!(ProofJson::from_proof(&proof), sample_json());
    }

    #[test]
    fn test_parses_prover_stdout() {
        let stdout = r#"{"A":["0x1","0x2"],"B":[["0x3","0x4"],["0x5","0x6"]],"C":["0x7","0x8"],"input":["0xa"]}"#;
        let document: ProofJson = serde_json::from_str(stdout).unwrap();
        assert_eq!(document.to_proof().unwrap().flat().len(), FLAT_PROOF_LEN);
    }

    #[test]
    fn test_garbage_element_is_proof_failure() {
        let mut document = sample_json();
        document.c[1] = "0xzz".into();
        assert!(matches!(document.to_proof(), Err(MixerError::ProofGenerationFailed(_))));
    }

    #[test]
    fn test_base_field_coordinates_pass_through() {
        // above the scalar modulus, below the base field modulus
        let coordinate = "0x30644e72e131a029b85045b68181585d97816a916871ca8d3c208c16d87cfd45";
        let mut document = sample_json();
        document.b[1][0] = coordinate.into();
        let proof = document.to_proof().unwrap();
        assert!(proof.flat()[4] >= crate::types::SNARK_SCALAR_FIELD);
        assert_eq!(ProofJson::from_proof(&proof).b[1][0], coordinate);
    }

    #[test]
    fn test_missing_binary_is_proof_failure() {
        let prover = CliProver::new("/nonexistent/hopper-prover", "/nonexistent/pk.raw");
        let witness = Witness::new(
            U256::from(1).into(),
            ethers::types::Address::repeat_byte(1),
            U256::from(2).into(),
            crate::types::Secret::new(U256::from(3)).unwrap(),
            0,
            crate::types::MerklePath::new(vec![U256::zero(); 2]),
            2,
        )
        .unwrap();
        assert!(matches!(prover.prove(&witness), Err(MixerError::ProofGenerationFailed(_))));
    }
}
