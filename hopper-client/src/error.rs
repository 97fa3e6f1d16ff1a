//! Error types for the mixer client.

use thiserror::Error;

use crate::types::Nullifier;

/// Result alias used throughout the client.
pub type Result<T> = std::result::Result<T, MixerError>;

/// Every failure a deposit or withdrawal can end in.
///
/// The type is `Clone` so a single failure can be delivered on both
/// notification channels of a [`Submission`](crate::relayer::Submission).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MixerError {
    /// Malformed caller input.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Ledger or relayer RPC errored or timed out.
    #[error("contract call failed: {0}")]
    ContractCallFailed(String),

    /// A response could not be decoded into the expected shape.
    #[error("unexpected data received: {0}")]
    UnexpectedDataReceived(String),

    /// Invariant violation inside the client.
    #[error("internal error: {0}")]
    InternalError(String),

    /// The prover could not produce (or locally validate) a proof.
    #[error("proof generation failed: {0}")]
    ProofGenerationFailed(String),

    /// The ledger already recorded this nullifier as spent.
    #[error("nullifier {0} already spent")]
    NullifierAlreadySpent(Nullifier),

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The operation was cancelled by the caller.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl MixerError {
    /// Whether a poll loop may silently retry after this error.
    ///
    /// Only RPC-level failures qualify; decode failures and ledger
    /// rejections are final.
    pub fn is_transient(&self) -> bool {
        matches!(self, MixerError::ContractCallFailed(_))
    }
}

impl From<serde_json::Error> for MixerError {
    fn from(err: serde_json::Error) -> Self {
        MixerError::UnexpectedDataReceived(err.to_string())
    }
}

impl From<config::ConfigError> for MixerError {
    fn from(err: config::ConfigError) -> Self {
        MixerError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;

    #[test]
    fn test_only_rpc_failures_are_transient() {
        assert!(MixerError::ContractCallFailed("timeout".into()).is_transient());
        assert!(!MixerError::UnexpectedDataReceived("bad".into()).is_transient());
        assert!(!MixerError::NullifierAlreadySpent(Nullifier::from(U256::one())).is_transient());
    }

    #[test]
    fn test_json_error_maps_to_unexpected_data() {
        let err = serde_json::from_str::<u64>("not json").unwrap_err();
        assert!(matches!(MixerError::from(err), MixerError::UnexpectedDataReceived(_)));
    }
}
