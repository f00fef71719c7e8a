//! Ethereum JSON-RPC client
//!
//! Transactions are signed by the node (`eth_sendTransaction` from an
//! unlocked custodial account); the bridge holds no private keys.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{ChainError, ChainRpc, IncomingTransfer, TxObservation};
use crate::config::RpcConfig;

pub struct EvmRpc {
    url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Receipt {
    block_number: Option<String>,
    status: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Block {
    transactions: Vec<BlockTransaction>,
}

#[derive(Deserialize, Debug)]
struct BlockTransaction {
    hash: String,
    from: Option<String>,
    to: Option<String>,
    value: String,
}

impl EvmRpc {
    pub fn new(config: &RpcConfig) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ChainError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            url: config.url.clone(),
            client,
        })
    }

    async fn rpc_call<T, R>(&self, method: &'static str, params: T) -> Result<Option<R>, ChainError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    ChainError::Unreachable(format!("{}: {}", method, e))
                } else {
                    ChainError::Transport(format!("{}: {}", method, e))
                }
            })?;

        let rpc_response: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| ChainError::Transport(format!("{}: unreadable response: {}", method, e)))?;

        if let Some(error) = rpc_response.error {
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(rpc_response.result)
    }

    async fn rpc_required<T, R>(&self, method: &'static str, params: T) -> Result<R, ChainError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        self.rpc_call(method, params)
            .await?
            .ok_or_else(|| ChainError::Parse(format!("{}: empty result", method)))
    }
}

fn parse_quantity(hex: &str) -> Result<u128, ChainError> {
    let digits = hex.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).map_err(|e| ChainError::Parse(format!("{}: {}", hex, e)))
}

fn parse_height(hex: &str) -> Result<u64, ChainError> {
    u64::try_from(parse_quantity(hex)?).map_err(|_| ChainError::Parse(format!("height {} out of range", hex)))
}

#[async_trait]
impl ChainRpc for EvmRpc {
    async fn latest_height(&self) -> Result<u64, ChainError> {
        let height: String = self.rpc_required("eth_blockNumber", ()).await?;
        parse_height(&height)
    }

    async fn balance(&self, address: &str) -> Result<u128, ChainError> {
        let balance: String = self
            .rpc_required("eth_getBalance", (address, "latest"))
            .await?;
        parse_quantity(&balance)
    }

    async fn broadcast(&self, from: &str, to: &str, amount: u128) -> Result<String, ChainError> {
        let tx = json!({
            "from": from,
            "to": to,
            "value": format!("0x{:x}", amount),
        });
        self.rpc_required("eth_sendTransaction", [tx]).await
    }

    async fn observe(&self, tx_hash: &str) -> Result<TxObservation, ChainError> {
        let receipt: Option<Receipt> = self
            .rpc_call("eth_getTransactionReceipt", [tx_hash])
            .await?;
        let Some(receipt) = receipt else {
            return Ok(TxObservation::NotFound);
        };
        let Some(block_number) = receipt.block_number else {
            return Ok(TxObservation::NotFound);
        };

        let included_at = parse_height(&block_number)?;
        let latest = self.latest_height().await?;
        Ok(TxObservation::Included {
            confirmations: latest.saturating_sub(included_at) + 1,
            success: receipt.status.as_deref() != Some("0x0"),
        })
    }

    async fn incoming(
        &self,
        address: &str,
        from_height: u64,
        to_height: u64,
    ) -> Result<Vec<IncomingTransfer>, ChainError> {
        let watched = address.to_ascii_lowercase();
        let mut transfers = Vec::new();

        for height in (from_height + 1)..=to_height {
            let block: Option<Block> = self
                .rpc_call("eth_getBlockByNumber", (format!("0x{:x}", height), true))
                .await?;
            let Some(block) = block else {
                debug!(height, "Block not available yet");
                break;
            };

            for tx in block.transactions {
                if let Some(to) = &tx.to
                    && to.to_ascii_lowercase() == watched
                {
                    transfers.push(IncomingTransfer {
                        tx_hash: tx.hash,
                        sender: tx.from.map(|from| from.to_ascii_lowercase()),
                        amount: parse_quantity(&tx.value)?,
                        height,
                    });
                }
            }
        }
        Ok(transfers)
    }
}
