//! Funding-event watcher.
//!
//! Polls the ledger's `LeafAdded` logs for one commitment until the event
//! shows up or the caller cancels. RPC failures are re-polled on the next
//! tick; a log that cannot be parsed ends the watch.

use std::{sync::Arc, time::Duration};

use ethers::{
    abi::{self, ParamType},
    types::{BigEndianHash, Log, H256, U256},
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    error::{MixerError, Result},
    ledger::MixerLedger,
    types::{FundingEvent, Leaf},
};

/// Watches the ledger for the funding of a commitment.
pub struct EventWatcher<L> {
    ledger: Arc<L>,
}

impl<L> Clone for EventWatcher<L> {
    fn clone(&self) -> Self {
        Self { ledger: Arc::clone(&self.ledger) }
    }
}

impl<L: MixerLedger> EventWatcher<L> {
    pub fn new(ledger: Arc<L>) -> Self {
        Self { ledger }
    }

    /// Resolve with the block and tree index at which `leaf` was inserted.
    ///
    /// Polls immediately and then every `poll_interval`. Stays pending for
    /// as long as the leaf is absent; flipping `shutdown` to `true` ends the
    /// watch with [`MixerError::Cancelled`]. A dropped sender means the
    /// watch can no longer be cancelled, not that it should stop.
    pub async fn watch(
        &self,
        leaf: Leaf,
        from_block: u64,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Result<FundingEvent> {
        info!("Watching for funding of leaf {} from block {}", leaf, from_block);

        tokio::select! {
            biased;
            () = wait_for_shutdown(shutdown) => {
                info!("Funding watch for leaf {} cancelled", leaf);
                Err(MixerError::Cancelled(format!("funding watch for leaf {leaf}")))
            }
            result = self.poll_until_found(leaf, from_block, poll_interval) => result,
        }
    }

    /// One query against the ledger's logs.
    pub async fn poll_once(&self, leaf: Leaf, from_block: u64) -> Result<Option<FundingEvent>> {
        let logs = self.ledger.leaf_added_logs(leaf.value(), from_block).await?;
        select_funding_event(leaf, &logs)
    }

    async fn poll_until_found(
        &self,
        leaf: Leaf,
        from_block: u64,
        poll_interval: Duration,
    ) -> Result<FundingEvent> {
        loop {
            match self.poll_once(leaf, from_block).await {
                Ok(Some(event)) => {
                    info!(
                        "Leaf {} funded at block {} with index {}",
                        leaf, event.block_number, event.leaf_index
                    );
                    return Ok(event);
                }
                Ok(None) => debug!("No funding event yet for leaf {}", leaf),
                Err(e) if e.is_transient() => warn!("Failed to fetch funding events: {}", e),
                Err(e) => return Err(e),
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Pick the most recent matching `LeafAdded` log.
///
/// Reorged-out logs, logs for other leaves and logs without an indexed
/// leaf topic are ignored. Ordering is by
/// block number, then log index. Any remaining log with missing position
/// fields or an undecodable index fails the whole selection.
pub fn select_funding_event(leaf: Leaf, logs: &[Log]) -> Result<Option<FundingEvent>> {
    let expected_topic = H256::from_uint(&leaf.value());
    let mut latest: Option<(u64, U256, FundingEvent)> = None;

    for log in logs {
        if log.removed == Some(true) {
            continue;
        }
        if log.topics.get(1) != Some(&expected_topic) {
            continue;
        }

        let block_number = log
            .block_number
            .ok_or_else(|| MixerError::UnexpectedDataReceived("funding event without block number".into()))?
            .as_u64();
        let log_index = log
            .log_index
            .ok_or_else(|| MixerError::UnexpectedDataReceived("funding event without log index".into()))?;
        let leaf_index = decode_leaf_index(log)?;

        let event = FundingEvent { block_number, leaf_index };
        let newer = match &latest {
            Some((block, index, _)) => (block_number, log_index) > (*block, *index),
            None => true,
        };
        if newer {
            latest = Some((block_number, log_index, event));
        }
    }

    Ok(latest.map(|(_, _, event)| event))
}

fn decode_leaf_index(log: &Log) -> Result<u64> {
    let tokens = abi::decode(&[ParamType::Uint(256)], &log.data)
        .map_err(|e| MixerError::UnexpectedDataReceived(format!("funding event data: {e}")))?;
    let index = tokens
        .into_iter()
        .next()
        .and_then(|token| token.into_uint())
        .ok_or_else(|| MixerError::UnexpectedDataReceived("funding event without leaf index".into()))?;
    if index > U256::from(u64::MAX) {
        return Err(MixerError::UnexpectedDataReceived(format!(
            "leaf index {index} does not fit in 64 bits"
        )));
    }
    Ok(index.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::{
        abi::Token,
        types::{Bytes, U64},
        utils::keccak256,
    };

    fn leaf() -> Leaf {
        Leaf::from(U256::from(0xabcdu64))
    }

    fn log_at(block: u64, log_index: u64, leaf_index: u64) -> Log {
        Log {
            topics: vec![
                H256::from(keccak256(crate::ledger::LEAF_ADDED_EVENT)),
                H256::from_uint(&leaf().value()),
            ],
            data: Bytes::from(abi::encode(&[Token::Uint(U256::from(leaf_index))])),
            block_number: Some(U64::from(block)),
            log_index: Some(U256::from(log_index)),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_logs_is_pending() {
        assert_eq!(select_funding_event(leaf(), &[]).unwrap(), None);
    }

    #[test]
    fn test_single_log() {
        let event = select_funding_event(leaf(), &[log_at(120, 0, 7)]).unwrap().unwrap();
        assert_eq!(event, FundingEvent { block_number: 120, leaf_index: 7 });
    }

    #[test]
    fn test_latest_block_wins_regardless_of_order() {
        let logs = [log_at(130, 0, 9), log_at(120, 5, 7)];
        let event = select_funding_event(leaf(), &logs).unwrap().unwrap();
        assert_eq!(event.block_number, 130);
        assert_eq!(event.leaf_index, 9);
    }

    #[test]
    fn test_log_index_breaks_block_ties() {
        let logs = [log_at(120, 3, 8), log_at(120, 1, 7)];
        let event = select_funding_event(leaf(), &logs).unwrap().unwrap();
        assert_eq!(event.leaf_index, 8);
    }

    #[test]
    fn test_removed_logs_ignored() {
        let mut reorged = log_at(140, 0, 11);
        reorged.removed = Some(true);
        let event = select_funding_event(leaf(), &[log_at(120, 0, 7), reorged]).unwrap().unwrap();
        assert_eq!(event.leaf_index, 7);
    }

    #[test]
    fn test_other_leaf_ignored() {
        let mut foreign = log_at(150, 0, 3);
        foreign.topics[1] = H256::repeat_byte(0x11);
        assert_eq!(select_funding_event(leaf(), &[foreign]).unwrap(), None);
    }

    #[test]
    fn test_log_without_leaf_topic_ignored() {
        let mut bare = log_at(150, 0, 3);
        bare.topics.truncate(1);
        let event = select_funding_event(leaf(), &[log_at(120, 0, 7), bare]).unwrap().unwrap();
        assert_eq!(event, FundingEvent { block_number: 120, leaf_index: 7 });
    }

    #[test]
    fn test_missing_block_number_is_unexpected() {
        let mut pending = log_at(120, 0, 7);
        pending.block_number = None;
        assert!(matches!(
            select_funding_event(leaf(), &[pending]),
            Err(MixerError::UnexpectedDataReceived(_))
        ));
    }

    #[test]
    fn test_garbage_data_is_unexpected() {
        let mut garbled = log_at(120, 0, 7);
        garbled.data = Bytes::from(vec![1u8, 2, 3]);
        assert!(matches!(
            select_funding_event(leaf(), &[garbled]),
            Err(MixerError::UnexpectedDataReceived(_))
        ));
    }

    #[test]
    fn test_oversized_index_is_unexpected() {
        let mut huge = log_at(120, 0, 0);
        huge.data = Bytes::from(abi::encode(&[Token::Uint(U256::MAX)]));
        assert!(matches!(
            select_funding_event(leaf(), &[huge]),
            Err(MixerError::UnexpectedDataReceived(_))
        ));
    }
}
