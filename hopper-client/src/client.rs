//! Explicit context object wiring collaborators to configuration.

use std::sync::Arc;

use tracing::info;

use crate::{
    codec::CommitmentCodec,
    config::MixerConfig,
    deposit::{DepositCoordinator, DepositRequest},
    error::{MixerError, Result},
    events::EventWatcher,
    ledger::{EvmLedger, LedgerReader, MixerLedger},
    prover::{CliProver, Prover, ProverGateway},
    relayer::{HttpRelayer, Relayer, RelayerGateway},
    withdrawal::{WithdrawalCoordinator, WithdrawalRequest},
    witness::WitnessBuilder,
};

/// Built once per process and shared by every request it starts.
pub struct MixerClient<L, R, P> {
    ledger: Arc<L>,
    relayer: Arc<R>,
    prover: Option<Arc<P>>,
    config: MixerConfig,
}

impl MixerClient<EvmLedger, HttpRelayer, CliProver> {
    /// Live stack: ethers ledger, HTTP relayer, and the CLI prover when one
    /// is configured.
    pub fn connect(config: MixerConfig) -> Result<Self> {
        config.validate()?;
        let mixer = config.mixer_address()?;
        let ledger = EvmLedger::new(&config.ledger_rpc_url, mixer)?;
        let relayer = HttpRelayer::new(config.relayer_endpoint()?);
        info!(
            "Connected to mixer {:?} via {} (relayer {})",
            mixer, config.ledger_rpc_url, config.relayer_url
        );

        let mut client = Self::new(Arc::new(ledger), Arc::new(relayer), config);
        if let Some(prover) = &client.config.prover {
            client.prover = Some(Arc::new(CliProver::from_config(prover)));
        }
        Ok(client)
    }
}

impl<L: MixerLedger, R: Relayer, P: Prover> MixerClient<L, R, P> {
    pub fn new(ledger: Arc<L>, relayer: Arc<R>, config: MixerConfig) -> Self {
        Self {
            ledger,
            relayer,
            prover: None,
            config,
        }
    }

    pub fn with_prover(mut self, prover: Arc<P>) -> Self {
        self.prover = Some(prover);
        self
    }

    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub fn codec(&self) -> CommitmentCodec<L> {
        CommitmentCodec::new(Arc::clone(&self.ledger))
    }

    pub fn reader(&self) -> LedgerReader<L> {
        LedgerReader::new(Arc::clone(&self.ledger))
    }

    pub fn watcher(&self) -> EventWatcher<L> {
        EventWatcher::new(Arc::clone(&self.ledger))
    }

    pub fn witness_builder(&self) -> WitnessBuilder<L> {
        WitnessBuilder::new(self.reader(), self.codec(), self.config.witness_attempts)
    }

    pub fn relayer_gateway(&self) -> RelayerGateway<R, L> {
        RelayerGateway::new(
            Arc::clone(&self.relayer),
            Arc::clone(&self.ledger),
            self.config.receipt_poll_interval(),
            self.config.receipt_timeout(),
        )
    }

    /// A fresh coordinator for one deposit.
    pub fn deposit(&self, request: DepositRequest) -> DepositCoordinator<L, R> {
        DepositCoordinator::new(
            request,
            self.codec(),
            self.relayer_gateway(),
            self.watcher(),
            self.config.poll_interval(),
        )
    }

    /// A fresh coordinator for one withdrawal. Needs a prover.
    pub fn withdrawal(&self, request: WithdrawalRequest) -> Result<WithdrawalCoordinator<L, R, P>> {
        let prover = self
            .prover
            .as_ref()
            .ok_or_else(|| MixerError::Config("withdrawals need a [prover] section".into()))?;
        Ok(WithdrawalCoordinator::new(
            request,
            self.witness_builder(),
            ProverGateway::new(Arc::clone(prover)),
            self.relayer_gateway(),
            self.config.verify_before_submit,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_requires_mixer_address() {
        let result = MixerClient::connect(MixerConfig::default());
        assert!(matches!(result, Err(MixerError::Config(_))));
    }

    #[test]
    fn test_connect_without_prover_refuses_withdrawals() {
        let config = MixerConfig {
            mixer_address: Some("0x78c85Fdc92A93EE75566688f97e9e532d573C853".into()),
            ..Default::default()
        };
        let client = MixerClient::connect(config).unwrap();
        let request = WithdrawalRequest {
            secret: crate::types::Secret::parse("42").unwrap(),
            recipient: ethers::types::Address::repeat_byte(1),
            leaf_index: 0,
        };
        assert!(matches!(client.withdrawal(request), Err(MixerError::Config(_))));
    }
}
