use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use async_trait::async_trait;
use ethers::{
    types::{Address, BigEndianHash, Log, TransactionReceipt, TxHash, H256, U256, U64},
    utils::keccak256,
};
use hopper_client::{FundingEvent, Leaf, MixerError, MixerLedger, PublicInputs, Result, Secret};

use crate::{expected_proof, field_hash, leaf_added_log, node_hash, GENESIS_BLOCK};

/// In-memory mixer contract and chain.
pub struct MockLedger {
    depth: usize,
    zeros: Vec<U256>,
    state: Mutex<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
    leaves: Vec<U256>,
    known_roots: HashSet<U256>,
    block: u64,
    logs: Vec<Log>,
    spent: HashSet<U256>,
    receipts: HashMap<TxHash, TransactionReceipt>,
    tx_counter: u64,
    calls: Vec<&'static str>,
    faults: Faults,
}

#[derive(Default)]
struct Faults {
    offline: bool,
    failing_log_queries: u32,
    truncate_paths: bool,
    inserts_on_root_read: u32,
    hold_receipts: bool,
    depth_override: Option<usize>,
}

impl MockLedger {
    pub fn new(depth: usize) -> Self {
        let mut zeros = vec![U256::zero()];
        for level in 0..depth {
            zeros.push(node_hash(zeros[level], zeros[level]));
        }
        let mut state = LedgerState {
            block: GENESIS_BLOCK,
            ..Default::default()
        };
        state.known_roots.insert(zeros[depth]);
        Self {
            depth,
            zeros,
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().expect("mock ledger state poisoned")
    }

    /// Insert `leaf` in a new block and emit its `LeafAdded` log.
    pub fn fund(&self, leaf: Leaf) -> FundingEvent {
        let mut state = self.state();
        self.insert(&mut state, leaf.value())
    }

    /// Insert an unrelated leaf, as another depositor would.
    pub fn insert_foreign_leaf(&self) -> FundingEvent {
        let mut state = self.state();
        let leaf = field_hash(&[U256::from(0xf0_0000 + state.leaves.len() as u64)]);
        self.insert(&mut state, leaf)
    }

    fn insert(&self, state: &mut LedgerState, leaf: U256) -> FundingEvent {
        let leaf_index = state.leaves.len() as u64;
        assert!(leaf_index < 1 << self.depth, "mock tree is full");
        state.block += 1;
        state.leaves.push(leaf);
        let root = self.root_of(&state.leaves);
        state.known_roots.insert(root);
        let log = leaf_added_log(leaf, leaf_index, state.block, 0);
        state.logs.push(log);
        FundingEvent {
            block_number: state.block,
            leaf_index,
        }
    }

    /// Append an arbitrary log, e.g. a malformed or reorged one.
    pub fn push_log(&self, log: Log) {
        self.state().logs.push(log);
    }

    /// Mine a transaction in the next block.
    pub fn record_transaction(&self, success: bool) -> TxHash {
        let mut state = self.state();
        state.tx_counter += 1;
        state.block += 1;
        let tx_hash = H256::from(keccak256(state.tx_counter.to_be_bytes()));
        let receipt = TransactionReceipt {
            transaction_hash: tx_hash,
            block_number: Some(U64::from(state.block)),
            status: Some(U64::from(u64::from(success))),
            ..Default::default()
        };
        state.receipts.insert(tx_hash, receipt);
        tx_hash
    }

    pub fn mark_spent(&self, nullifier: U256) {
        self.state().spent.insert(nullifier);
    }

    pub fn spent(&self, nullifier: U256) -> bool {
        self.state().spent.contains(&nullifier)
    }

    /// What the contract's verifier says about a withdrawal proof.
    pub fn accepts_proof(&self, recipient: Address, nullifier: U256, flat: &[U256]) -> bool {
        let state = self.state();
        state.known_roots.iter().any(|root| {
            let inputs = PublicInputs {
                root: (*root).into(),
                recipient,
                nullifier: nullifier.into(),
            };
            expected_proof(&inputs) == flat
        })
    }

    pub fn leaf_count(&self) -> usize {
        self.state().leaves.len()
    }

    pub fn current_block(&self) -> u64 {
        self.state().block
    }

    /// Ledger calls made so far, by contract method name.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().faults.offline = offline;
    }

    /// The next `count` log queries fail like a flaky RPC node.
    pub fn fail_next_log_queries(&self, count: u32) {
        self.state().faults.failing_log_queries = count;
    }

    /// Return paths one entry short of the tree depth.
    pub fn truncate_paths(&self, truncate: bool) {
        self.state().faults.truncate_paths = truncate;
    }

    /// The next `count` root reads each see a foreign leaf land first.
    pub fn insert_on_root_reads(&self, count: u32) {
        self.state().faults.inserts_on_root_read = count;
    }

    /// Keep every receipt pending.
    pub fn hold_receipts(&self, hold: bool) {
        self.state().faults.hold_receipts = hold;
    }

    /// Report a different tree depth from the contract.
    pub fn override_depth(&self, depth: usize) {
        self.state().faults.depth_override = Some(depth);
    }

    fn root_of(&self, leaves: &[U256]) -> U256 {
        let levels = self.levels(leaves);
        self.node(&levels, self.depth, 0)
    }

    fn levels(&self, leaves: &[U256]) -> Vec<Vec<U256>> {
        let mut levels = vec![leaves.to_vec()];
        for level in 0..self.depth {
            let next = levels[level]
                .chunks(2)
                .map(|pair| node_hash(pair[0], pair.get(1).copied().unwrap_or(self.zeros[level])))
                .collect();
            levels.push(next);
        }
        levels
    }

    fn node(&self, levels: &[Vec<U256>], level: usize, index: u64) -> U256 {
        levels[level]
            .get(index as usize)
            .copied()
            .unwrap_or(self.zeros[level])
    }

    fn touch(&self, call: &'static str) -> Result<()> {
        self.enter(call).map(drop)
    }

    fn enter(&self, call: &'static str) -> Result<std::sync::MutexGuard<'_, LedgerState>> {
        let mut state = self.state();
        state.calls.push(call);
        if state.faults.offline {
            return Err(MixerError::ContractCallFailed(format!("{call}: connection refused")));
        }
        Ok(state)
    }
}

#[async_trait]
impl MixerLedger for MockLedger {
    async fn make_leaf_hash(&self, secret: &Secret, recipient: Address) -> Result<U256> {
        self.touch("makeLeafHash")?;
        Ok(crate::leaf_hash(secret, recipient))
    }

    async fn make_nullifier_hash(&self, secret: &Secret) -> Result<U256> {
        self.touch("makeNullifierHash")?;
        Ok(crate::nullifier_hash(secret))
    }

    async fn merkle_path(&self, leaf_index: u64) -> Result<Vec<U256>> {
        let state = self.enter("getMerklePath")?;
        let levels = self.levels(&state.leaves);
        let mut path: Vec<U256> = (0..self.depth)
            .map(|level| self.node(&levels, level, (leaf_index >> level) ^ 1))
            .collect();
        if state.faults.truncate_paths {
            path.pop();
        }
        Ok(path)
    }

    async fn root(&self) -> Result<U256> {
        let mut state = self.enter("getRoot")?;
        if state.faults.inserts_on_root_read > 0 {
            state.faults.inserts_on_root_read -= 1;
            let leaf = field_hash(&[U256::from(0xe0_0000 + state.leaves.len() as u64)]);
            self.insert(&mut state, leaf);
        }
        Ok(self.root_of(&state.leaves))
    }

    async fn is_spent(&self, nullifier: U256) -> Result<bool> {
        let state = self.enter("isSpent")?;
        Ok(state.spent.contains(&nullifier))
    }

    async fn tree_depth(&self) -> Result<usize> {
        let state = self.enter("treeDepth")?;
        Ok(state.faults.depth_override.unwrap_or(self.depth))
    }

    async fn verify_proof(
        &self,
        root: U256,
        recipient: Address,
        nullifier: U256,
        proof: &[U256],
    ) -> Result<bool> {
        let state = self.enter("verifyProof")?;
        let inputs = PublicInputs {
            root: root.into(),
            recipient,
            nullifier: nullifier.into(),
        };
        Ok(state.known_roots.contains(&root) && expected_proof(&inputs) == proof)
    }

    async fn leaf_added_logs(&self, leaf: U256, from_block: u64) -> Result<Vec<Log>> {
        let mut state = self.enter("getLogs")?;
        if state.faults.failing_log_queries > 0 {
            state.faults.failing_log_queries -= 1;
            return Err(MixerError::ContractCallFailed("getLogs: timed out".into()));
        }
        let topic = H256::from_uint(&leaf);
        Ok(state
            .logs
            .iter()
            .filter(|log| log.topics.get(1) == Some(&topic))
            .filter(|log| log.block_number.map_or(true, |block| block.as_u64() >= from_block))
            .cloned()
            .collect())
    }

    async fn transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<TransactionReceipt>> {
        let state = self.enter("getTransactionReceipt")?;
        if state.faults.hold_receipts {
            return Ok(None);
        }
        Ok(state.receipts.get(&tx_hash).cloned())
    }

    async fn block_number(&self) -> Result<u64> {
        let state = self.enter("blockNumber")?;
        Ok(state.block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::root_from_path;

    #[tokio::test]
    async fn test_paths_fold_to_root() {
        let ledger = MockLedger::new(3);
        let leaves: Vec<U256> = (1..=5u64).map(|i| field_hash(&[U256::from(i)])).collect();
        for leaf in &leaves {
            ledger.fund(Leaf::from(*leaf));
        }
        let root = ledger.root().await.unwrap();
        for (index, leaf) in leaves.iter().enumerate() {
            let path = ledger.merkle_path(index as u64).await.unwrap();
            assert_eq!(path.len(), 3);
            assert_eq!(root_from_path(*leaf, index as u64, &path), root);
        }
    }

    #[test]
    fn test_fund_advances_blocks_and_indices() {
        let ledger = MockLedger::new(2);
        let first = ledger.insert_foreign_leaf();
        let second = ledger.insert_foreign_leaf();
        assert_eq!(first.leaf_index, 0);
        assert_eq!(second.leaf_index, 1);
        assert_eq!(second.block_number, first.block_number + 1);
    }
}
