//! Mixer contract over an EVM JSON-RPC node.

use async_trait::async_trait;
use ethers::{
    abi::{self, Abi, ParamType, Token},
    providers::{Http, Middleware, Provider},
    types::{
        transaction::eip2718::TypedTransaction, Address, BigEndianHash, BlockNumber, Bytes,
        Filter, Log, TransactionReceipt, TransactionRequest, TxHash, H256, U256, U64,
    },
};
use tokio::sync::OnceCell;
use tracing::debug;

use super::{MixerLedger, LEAF_ADDED_EVENT};
use crate::{
    error::{MixerError, Result},
    types::Secret,
};

/// Human-readable ABI of the mixer contract calls the client makes.
const MIXER_ABI: &[&str] = &[
    "function makeLeafHash(uint256 nullifier_secret, address wallet_address) view returns (uint256)",
    "function makeNullifierHash(uint256 nullifier_secret) view returns (uint256)",
    // Returns `uint256[treeDepth]`, decoded by `decode_merkle_path`.
    "function getMerklePath(uint256 leaf_index) view",
    "function getRoot() view returns (uint256)",
    "function isSpent(uint256 nullifier) view returns (bool)",
    "function treeDepth() view returns (uint256)",
    "function verifyProof(uint256 root, address wallet_address, uint256 nullifier, uint256[8] proof) view returns (bool)",
];

/// [`MixerLedger`] backed by an `ethers` HTTP provider.
#[derive(Debug)]
pub struct EvmLedger {
    provider: Provider<Http>,
    mixer: Address,
    abi: Abi,
    depth: OnceCell<usize>,
}

impl EvmLedger {
    pub fn new(rpc_url: &str, mixer: Address) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| MixerError::Config(format!("invalid ledger rpc url {rpc_url}: {e}")))?;
        let abi = abi::parse_abi(MIXER_ABI)
            .map_err(|e| MixerError::InternalError(format!("mixer abi: {e}")))?;

        Ok(Self {
            provider,
            mixer,
            abi,
            depth: OnceCell::new(),
        })
    }

    pub fn mixer_address(&self) -> Address {
        self.mixer
    }

    /// Encode, `eth_call`, return the raw output bytes.
    async fn call(&self, name: &str, args: &[Token]) -> Result<Bytes> {
        let function = self
            .abi
            .function(name)
            .map_err(|e| MixerError::InternalError(format!("{name} missing from abi: {e}")))?;
        let calldata = function
            .encode_input(args)
            .map_err(|e| MixerError::InvalidParams(format!("{name}: {e}")))?;

        let tx: TypedTransaction = TransactionRequest::new()
            .to(self.mixer)
            .data(Bytes::from(calldata))
            .into();

        debug!("eth_call {} on {:?}", name, self.mixer);
        self.provider
            .call(&tx, None)
            .await
            .map_err(|e| MixerError::ContractCallFailed(format!("{name}: {e}")))
    }

    /// Call and decode a single-value output.
    async fn call_single(&self, name: &str, args: &[Token]) -> Result<Token> {
        let output = self.call(name, args).await?;
        let function = self
            .abi
            .function(name)
            .map_err(|e| MixerError::InternalError(format!("{name} missing from abi: {e}")))?;
        let mut tokens = function
            .decode_output(&output)
            .map_err(|e| MixerError::UnexpectedDataReceived(format!("{name}: {e}")))?;
        if tokens.len() != 1 {
            return Err(MixerError::UnexpectedDataReceived(format!(
                "{name} returned {} values",
                tokens.len()
            )));
        }
        Ok(tokens.remove(0))
    }

    async fn call_uint(&self, name: &str, args: &[Token]) -> Result<U256> {
        self.call_single(name, args)
            .await?
            .into_uint()
            .ok_or_else(|| MixerError::UnexpectedDataReceived(format!("{name} did not return a uint")))
    }

    async fn call_bool(&self, name: &str, args: &[Token]) -> Result<bool> {
        self.call_single(name, args)
            .await?
            .into_bool()
            .ok_or_else(|| MixerError::UnexpectedDataReceived(format!("{name} did not return a bool")))
    }
}

/// Decode a fixed `uint256[depth]`: exactly `depth` head words, no offset
/// or length prefix.
fn decode_merkle_path(output: &[u8], depth: usize) -> Result<Vec<U256>> {
    if output.len() != depth * 32 {
        return Err(MixerError::UnexpectedDataReceived(format!(
            "getMerklePath returned {} bytes, expected {} for depth {depth}",
            output.len(),
            depth * 32
        )));
    }
    let fixed = ParamType::FixedArray(Box::new(ParamType::Uint(256)), depth);
    let tokens = abi::decode_whole(&[fixed], output)
        .map_err(|e| MixerError::UnexpectedDataReceived(format!("getMerklePath: {e}")))?;

    match tokens.into_iter().next() {
        Some(Token::FixedArray(items)) => items
            .into_iter()
            .map(|item| {
                item.into_uint().ok_or_else(|| {
                    MixerError::UnexpectedDataReceived("getMerklePath: non-numeric sibling".into())
                })
            })
            .collect(),
        _ => Err(MixerError::UnexpectedDataReceived(
            "getMerklePath: expected an array".into(),
        )),
    }
}

#[async_trait]
impl MixerLedger for EvmLedger {
    async fn make_leaf_hash(&self, secret: &Secret, recipient: Address) -> Result<U256> {
        self.call_uint(
            "makeLeafHash",
            &[Token::Uint(secret.expose()), Token::Address(recipient)],
        )
        .await
    }

    async fn make_nullifier_hash(&self, secret: &Secret) -> Result<U256> {
        self.call_uint("makeNullifierHash", &[Token::Uint(secret.expose())])
            .await
    }

    async fn merkle_path(&self, leaf_index: u64) -> Result<Vec<U256>> {
        let depth = self.tree_depth().await?;
        let output = self
            .call("getMerklePath", &[Token::Uint(U256::from(leaf_index))])
            .await?;

        decode_merkle_path(&output, depth)
    }

    async fn root(&self) -> Result<U256> {
        self.call_uint("getRoot", &[]).await
    }

    async fn is_spent(&self, nullifier: U256) -> Result<bool> {
        self.call_bool("isSpent", &[Token::Uint(nullifier)]).await
    }

    async fn tree_depth(&self) -> Result<usize> {
        self.depth
            .get_or_try_init(|| async {
                let depth = self.call_uint("treeDepth", &[]).await?;
                if depth.bits() > 32 {
                    return Err(MixerError::UnexpectedDataReceived(format!(
                        "treeDepth {depth} too large"
                    )));
                }
                Ok(depth.low_u32() as usize)
            })
            .await
            .copied()
    }

    async fn verify_proof(
        &self,
        root: U256,
        recipient: Address,
        nullifier: U256,
        proof: &[U256],
    ) -> Result<bool> {
        let flat = proof.iter().copied().map(Token::Uint).collect();
        self.call_bool(
            "verifyProof",
            &[
                Token::Uint(root),
                Token::Address(recipient),
                Token::Uint(nullifier),
                Token::FixedArray(flat),
            ],
        )
        .await
    }

    async fn leaf_added_logs(&self, leaf: U256, from_block: u64) -> Result<Vec<Log>> {
        let filter = Filter::new()
            .address(self.mixer)
            .event(LEAF_ADDED_EVENT)
            .topic1(H256::from_uint(&leaf))
            .from_block(BlockNumber::Number(U64::from(from_block)))
            .to_block(BlockNumber::Latest);

        self.provider
            .get_logs(&filter)
            .await
            .map_err(|e| MixerError::ContractCallFailed(format!("eth_getLogs: {e}")))
    }

    async fn transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<TransactionReceipt>> {
        self.provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| MixerError::ContractCallFailed(format!("eth_getTransactionReceipt: {e}")))
    }

    async fn block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .map(|block| block.as_u64())
            .map_err(|e| MixerError::ContractCallFailed(format!("eth_blockNumber: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abi_parses_every_call() {
        let ledger = EvmLedger::new("http://127.0.0.1:8545", Address::repeat_byte(7)).unwrap();
        for name in [
            "makeLeafHash",
            "makeNullifierHash",
            "getMerklePath",
            "getRoot",
            "isSpent",
            "treeDepth",
            "verifyProof",
        ] {
            assert!(ledger.abi.function(name).is_ok(), "{name} missing");
        }
    }

    #[test]
    fn test_leaf_hash_calldata_layout() {
        let ledger = EvmLedger::new("http://127.0.0.1:8545", Address::repeat_byte(7)).unwrap();
        let function = ledger.abi.function("makeLeafHash").unwrap();
        let calldata = function
            .encode_input(&[Token::Uint(U256::from(42)), Token::Address(Address::repeat_byte(1))])
            .unwrap();
        // selector + two words
        assert_eq!(calldata.len(), 4 + 64);
        assert_eq!(&calldata[..4], &function.short_signature());
    }

    #[test]
    fn test_invalid_rpc_url_is_config_error() {
        let err = EvmLedger::new("not a url", Address::zero()).unwrap_err();
        assert!(matches!(err, MixerError::Config(_)));
    }

    fn words(values: &[u64]) -> Vec<Token> {
        values.iter().map(|v| Token::Uint(U256::from(*v))).collect()
    }

    #[test]
    fn test_decode_merkle_path_exact_depth() {
        let output = abi::encode(&[Token::FixedArray(words(&[1, 2, 3, 4]))]);
        let path = decode_merkle_path(&output, 4).unwrap();
        assert_eq!(path, vec![U256::from(1), U256::from(2), U256::from(3), U256::from(4)]);
    }

    #[test]
    fn test_decode_merkle_path_rejects_extra_sibling() {
        let output = abi::encode(&[Token::FixedArray(words(&[1, 2, 3, 4, 5]))]);
        let err = decode_merkle_path(&output, 4).unwrap_err();
        assert!(matches!(err, MixerError::UnexpectedDataReceived(_)));
    }

    #[test]
    fn test_decode_merkle_path_rejects_dynamic_array() {
        // offset word + length word + two items: four words, but not a path
        let output = abi::encode(&[Token::Array(words(&[7, 8]))]);
        assert_eq!(output.len(), 4 * 32);
        let err = decode_merkle_path(&output, 2).unwrap_err();
        assert!(matches!(err, MixerError::UnexpectedDataReceived(_)));
    }
}
