//! JSON-over-HTTP relayer client.
//!
//! `POST /commit` and `POST /withdraw` answer `200 {"tx_hash": ...}` on
//! acceptance and `{"error": ..., "code": ...}` otherwise.

use async_trait::async_trait;
use ethers::types::{Address, TxHash, U256};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Relayer;
use crate::{
    error::{MixerError, Result},
    prover::Proof,
    types::{Leaf, Nullifier},
};

/// Error code the relayer uses when the ledger already holds the nullifier.
pub const NULLIFIER_SPENT_CODE: &str = "NULLIFIER_SPENT";

/// Field element as a 32-byte big-endian `0x` word.
fn word(value: U256) -> String {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    format!("0x{}", hex::encode(bytes))
}

#[derive(Debug, Serialize)]
struct CommitRequest {
    leaf: String,
    funder: Address,
}

#[derive(Debug, Serialize)]
struct WithdrawRequest {
    recipient: Address,
    nullifier: String,
    proof: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    tx_hash: TxHash,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    code: Option<String>,
}

/// [`Relayer`] reached over HTTP.
#[derive(Clone, Debug)]
pub struct HttpRelayer {
    client: reqwest::Client,
    base: Url,
}

impl HttpRelayer {
    pub fn new(base: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.base
    }

    fn url(&self, route: &str) -> Result<Url> {
        self.base
            .join(route)
            .map_err(|e| MixerError::Config(format!("relayer route {route}: {e}")))
    }

    async fn post<B: Serialize>(&self, route: &str, body: &B, nullifier: Option<Nullifier>) -> Result<TxHash> {
        let url = self.url(route)?;
        debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| MixerError::ContractCallFailed(format!("relayer {route}: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MixerError::ContractCallFailed(format!("relayer {route}: {e}")))?;
        interpret_response(route, status, &body, nullifier)
    }
}

/// Map a relayer answer onto a transaction hash or a typed failure.
fn interpret_response(
    route: &str,
    status: StatusCode,
    body: &str,
    nullifier: Option<Nullifier>,
) -> Result<TxHash> {
    if status.is_success() {
        let accepted: SubmitResponse = serde_json::from_str(body).map_err(|e| {
            MixerError::UnexpectedDataReceived(format!("relayer {route} response: {e}"))
        })?;
        return Ok(accepted.tx_hash);
    }

    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(rejection) => match (rejection.code.as_deref(), nullifier) {
            (Some(NULLIFIER_SPENT_CODE), Some(nullifier)) => {
                Err(MixerError::NullifierAlreadySpent(nullifier))
            }
            (code, _) => Err(MixerError::ContractCallFailed(format!(
                "relayer {route} rejected ({status}, {}): {}",
                code.unwrap_or("no code"),
                rejection.error
            ))),
        },
        Err(_) => Err(MixerError::ContractCallFailed(format!(
            "relayer {route} returned {status}"
        ))),
    }
}

#[async_trait]
impl Relayer for HttpRelayer {
    async fn submit_commit(&self, leaf: Leaf, funder: Address) -> Result<TxHash> {
        let request = CommitRequest {
            leaf: word(leaf.value()),
            funder,
        };
        self.post("commit", &request, None).await
    }

    async fn submit_withdrawal(
        &self,
        recipient: Address,
        nullifier: Nullifier,
        proof: &Proof,
    ) -> Result<TxHash> {
        let request = WithdrawRequest {
            recipient,
            nullifier: word(nullifier.value()),
            proof: proof.flat().iter().copied().map(word).collect(),
        };
        self.post("withdraw", &request, Some(nullifier)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_is_padded() {
        assert_eq!(word(U256::from(0xff)), format!("0x{}ff", "0".repeat(62)));
    }

    #[test]
    fn test_accepted_response() {
        let body = format!(r#"{{"tx_hash":"{:?}"}}"#, TxHash::repeat_byte(0xab));
        let hash = interpret_response("commit", StatusCode::OK, &body, None).unwrap();
        assert_eq!(hash, TxHash::repeat_byte(0xab));
    }

    #[test]
    fn test_spent_code_maps_to_nullifier_error() {
        let nullifier = Nullifier::from(U256::from(9));
        let body = r#"{"error":"nullifier already used","code":"NULLIFIER_SPENT"}"#;
        let err = interpret_response("withdraw", StatusCode::CONFLICT, body, Some(nullifier)).unwrap_err();
        assert_eq!(err, MixerError::NullifierAlreadySpent(nullifier));
    }

    #[test]
    fn test_other_rejections_are_call_failures() {
        let body = r#"{"error":"out of gas","code":"RELAY_FAILED"}"#;
        let err = interpret_response("withdraw", StatusCode::BAD_GATEWAY, body, None).unwrap_err();
        assert!(matches!(err, MixerError::ContractCallFailed(_)));

        let err = interpret_response("commit", StatusCode::INTERNAL_SERVER_ERROR, "oops", None).unwrap_err();
        assert!(matches!(err, MixerError::ContractCallFailed(_)));
    }

    #[test]
    fn test_garbled_success_is_unexpected_data() {
        let err = interpret_response("commit", StatusCode::OK, "{}", None).unwrap_err();
        assert!(matches!(err, MixerError::UnexpectedDataReceived(_)));
    }

    #[test]
    fn test_withdraw_request_shape() {
        let request = WithdrawRequest {
            recipient: Address::repeat_byte(1),
            nullifier: word(U256::from(2)),
            proof: vec![word(U256::one()); 8],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["proof"].as_array().unwrap().len(), 8);
        assert_eq!(json["recipient"], format!("{:?}", Address::repeat_byte(1)));
    }

    #[test]
    fn test_routes_join_base() {
        let relayer = HttpRelayer::new(Url::parse("http://relayer.local:8080/api/").unwrap());
        assert_eq!(relayer.url("commit").unwrap().as_str(), "http://relayer.local:8080/api/commit");
    }
}
