//! Client configuration.
//!
//! Built once at process start and handed to [`MixerClient`](crate::MixerClient).
//! Sources are layered: defaults, then an optional TOML file, then
//! `HOPPER_*` environment variables (nested keys use `__`, e.g.
//! `HOPPER_PROVER__BINARY`).

use std::{path::Path, path::PathBuf, time::Duration};

use ethers::types::Address;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{MixerError, Result};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "HOPPER";

/// Mixer client configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Ledger JSON-RPC endpoint.
    pub ledger_rpc_url: String,
    /// Mixer contract address.
    pub mixer_address: Option<String>,
    /// Relayer endpoint.
    pub relayer_url: String,
    /// Block the funding watch starts from.
    pub start_block: u64,
    /// Funding-event poll interval in seconds.
    pub poll_interval_secs: u64,
    /// Receipt poll interval in seconds.
    pub receipt_poll_interval_secs: u64,
    /// How long to wait for a relayed transaction to be mined.
    pub receipt_timeout_secs: u64,
    /// Attempts at reading a path/root pair that agree with each other.
    pub witness_attempts: u32,
    /// Verify the proof locally before handing it to the relayer.
    pub verify_before_submit: bool,
    /// External prover, required for withdrawals.
    pub prover: Option<ProverConfig>,
}

/// Location of the external prover and its keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProverConfig {
    pub binary: PathBuf,
    pub proving_key: PathBuf,
    pub verifying_key: Option<PathBuf>,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            ledger_rpc_url: "http://127.0.0.1:8545".to_string(),
            mixer_address: None,
            relayer_url: "http://127.0.0.1:8080".to_string(),
            start_block: 0,
            poll_interval_secs: 5,
            receipt_poll_interval_secs: 5,
            receipt_timeout_secs: 600,
            witness_attempts: 3,
            verify_before_submit: true,
            prover: None,
        }
    }
}

impl MixerConfig {
    /// Load from an optional file plus the environment, then validate.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: MixerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the environment only.
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Reject settings the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(MixerError::Config("poll_interval_secs must be positive".into()));
        }
        if self.receipt_poll_interval_secs == 0 {
            return Err(MixerError::Config(
                "receipt_poll_interval_secs must be positive".into(),
            ));
        }
        if self.receipt_timeout_secs == 0 {
            return Err(MixerError::Config("receipt_timeout_secs must be positive".into()));
        }
        if self.witness_attempts == 0 {
            return Err(MixerError::Config("witness_attempts must be positive".into()));
        }
        self.ledger_url()?;
        self.relayer_endpoint()?;
        if self.mixer_address.is_some() {
            self.mixer_address()?;
        }
        if let Some(prover) = &self.prover {
            if self.verify_before_submit && prover.verifying_key.is_none() {
                return Err(MixerError::Config(
                    "verify_before_submit needs prover.verifying_key".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn ledger_url(&self) -> Result<Url> {
        Url::parse(&self.ledger_rpc_url)
            .map_err(|e| MixerError::Config(format!("invalid ledger_rpc_url: {e}")))
    }

    pub fn relayer_endpoint(&self) -> Result<Url> {
        Url::parse(&self.relayer_url)
            .map_err(|e| MixerError::Config(format!("invalid relayer_url: {e}")))
    }

    /// The mixer contract address; required for any live ledger access.
    pub fn mixer_address(&self) -> Result<Address> {
        let raw = self
            .mixer_address
            .as_deref()
            .ok_or_else(|| MixerError::Config("mixer_address must be set".into()))?;
        raw.parse::<Address>()
            .map_err(|e| MixerError::Config(format!("invalid mixer_address {raw}: {e}")))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_secs(self.receipt_poll_interval_secs)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = MixerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = MixerConfig { poll_interval_secs: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(MixerError::Config(_))));
    }

    #[test]
    fn test_missing_mixer_address_reported() {
        let config = MixerConfig::default();
        assert!(matches!(config.mixer_address(), Err(MixerError::Config(_))));
    }

    #[test]
    fn test_bad_mixer_address_rejected() {
        let config = MixerConfig {
            mixer_address: Some("0xnot-an-address".into()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(MixerError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("hopper-config-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
ledger_rpc_url = "http://ledger.local:8545"
mixer_address = "0x78c85Fdc92A93EE75566688f97e9e532d573C853"
start_block = 3861629
poll_interval_secs = 2
verify_before_submit = false

[prover]
binary = "/usr/local/bin/mixer_cli"
proving_key = "/keys/mixer.pk.raw"
"#
        )
        .unwrap();

        let config = MixerConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.ledger_rpc_url, "http://ledger.local:8545");
        assert_eq!(config.start_block, 3_861_629);
        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.receipt_timeout_secs, 600);
        assert!(config.mixer_address().is_ok());
        let prover = config.prover.unwrap();
        assert_eq!(prover.binary, PathBuf::from("/usr/local/bin/mixer_cli"));
        assert!(prover.verifying_key.is_none());
        assert!(!config.verify_before_submit);
    }

    #[test]
    fn test_verification_without_verifying_key_rejected() {
        let prover = ProverConfig {
            binary: PathBuf::from("/usr/local/bin/mixer_cli"),
            proving_key: PathBuf::from("/keys/mixer.pk.raw"),
            verifying_key: None,
        };
        let config = MixerConfig { prover: Some(prover.clone()), ..Default::default() };
        assert!(config.verify_before_submit);
        assert!(matches!(config.validate(), Err(MixerError::Config(_))));

        let skipping = MixerConfig {
            prover: Some(prover.clone()),
            verify_before_submit: false,
            ..Default::default()
        };
        assert!(skipping.validate().is_ok());

        let with_key = MixerConfig {
            prover: Some(ProverConfig {
                verifying_key: Some(PathBuf::from("/keys/mixer.vk.raw")),
                ..prover
            }),
            ..Default::default()
        };
        assert!(with_key.validate().is_ok());
    }
}
