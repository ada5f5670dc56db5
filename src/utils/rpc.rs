//! Node RPC access.
//!
//! [`NodeRpc`] is the seam the rewards poller depends on; [`HttpNodeRpc`]
//! talks JSON-RPC 2.0 to the platform chain endpoint of a node.

use crate::types::Id;
use crate::utils::error::{IndexerError, Result};
use crate::utils::formatting::decode_hex_checksum;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

const PLATFORM_PATH: &str = "/ext/bc/P";

/// Queries a node for data the stream does not carry.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Reward outputs paid out by staking transaction `tx_id`, one encoded
    /// output per element.
    async fn get_reward_utxos(&self, tx_id: &Id) -> Result<Vec<Vec<u8>>>;
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RewardUtxosReply {
    #[serde(rename = "numFetched", default)]
    num_fetched: String,
    #[serde(default)]
    utxos: Vec<String>,
    #[serde(default)]
    encoding: String,
}

/// [`NodeRpc`] over HTTP.
///
/// # Example
///
/// ```no_run
/// use utxo_indexer::HttpNodeRpc;
///
/// # fn example() -> utxo_indexer::Result<()> {
/// let rpc = HttpNodeRpc::new("http://127.0.0.1:9650")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpNodeRpc {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNodeRpc {
    /// Creates a client for the node at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::RpcError` if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}{PLATFORM_PATH}", base_url.trim_end_matches('/')),
        })
    }

    async fn call<P: Serialize + Send + Sync, T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: P,
    ) -> Result<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };
        let response: RpcResponse<T> = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(IndexerError::RpcError(format!(
                "{method} failed ({}): {}",
                err.code, err.message
            )));
        }
        response
            .result
            .ok_or_else(|| IndexerError::RpcError(format!("{method} returned no result")))
    }
}

#[async_trait]
impl NodeRpc for HttpNodeRpc {
    async fn get_reward_utxos(&self, tx_id: &Id) -> Result<Vec<Vec<u8>>> {
        let reply: RewardUtxosReply = self
            .call(
                "platform.getRewardUTXOs",
                json!({ "txID": tx_id.to_string(), "encoding": "hex" }),
            )
            .await?;

        if reply.encoding != "hex" {
            return Err(IndexerError::RpcError(format!(
                "expected hex encoding, node replied with '{}'",
                reply.encoding
            )));
        }
        tracing::debug!(tx_id = %tx_id, num_fetched = %reply.num_fetched, "Fetched reward UTXOs");

        reply
            .utxos
            .iter()
            .map(|utxo| decode_hex_checksum(utxo))
            .collect()
    }
}
