//! bitcoind wallet RPC client
//!
//! Payouts and balances go through the node's wallet, which holds the
//! custodial keys. `bitcoincore_rpc` is blocking, so every call runs on the
//! blocking pool.

use async_trait::async_trait;
use bitcoincore_rpc::jsonrpc::{self, simple_http};
use bitcoincore_rpc::{Client, RpcApi};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{ChainError, ChainRpc, IncomingTransfer, TxObservation};
use crate::config::RpcConfig;
use crate::money;

const BTC_DECIMALS: u32 = 8;
/// "Invalid or non-wallet transaction id"
const RPC_INVALID_ADDRESS_OR_KEY: i32 = -5;

pub struct BitcoindRpc {
    client: Arc<Client>,
}

impl BitcoindRpc {
    pub fn new(config: &RpcConfig) -> Result<Self, ChainError> {
        let mut builder = simple_http::SimpleHttpTransport::builder()
            .url(&config.url)
            .map_err(|e| ChainError::Config(format!("bad bitcoind url {}: {}", config.url, e)))?
            .timeout(Duration::from_millis(config.timeout_ms));
        if let Some(user) = &config.user {
            builder = builder.auth(user.as_str(), config.password.as_deref());
        }
        let transport = jsonrpc::Client::with_transport(builder.build());
        Ok(Self {
            client: Arc::new(Client::from_jsonrpc(transport)),
        })
    }

    async fn call<T>(&self, method: &'static str, args: Vec<Value>) -> Result<T, ChainError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || client.call::<T>(method, &args))
            .await
            .map_err(|e| ChainError::Transport(format!("{}: rpc task failed: {}", method, e)))?
            .map_err(map_rpc_error)
    }

    /// Paying address of the first input, when the node has the previous transaction
    async fn sender_of(&self, txid: &str) -> Option<String> {
        let tx: Value = self
            .call("getrawtransaction", vec![json!(txid), json!(true)])
            .await
            .ok()?;
        let input = tx.get("vin")?.get(0)?;
        let prev_txid = input.get("txid")?.as_str()?;
        let prev_vout = input.get("vout")?.as_u64()?;

        let prev: Value = self
            .call("getrawtransaction", vec![json!(prev_txid), json!(true)])
            .await
            .ok()?;
        prev.get("vout")?
            .get(usize::try_from(prev_vout).ok()?)?
            .get("scriptPubKey")?
            .get("address")?
            .as_str()
            .map(str::to_string)
    }
}

fn map_rpc_error(e: bitcoincore_rpc::Error) -> ChainError {
    match e {
        bitcoincore_rpc::Error::JsonRpc(jsonrpc::error::Error::Rpc(rpc)) => ChainError::Rpc {
            code: i64::from(rpc.code),
            message: rpc.message,
        },
        bitcoincore_rpc::Error::JsonRpc(jsonrpc::error::Error::Transport(e)) => {
            let refused = e.downcast_ref::<simple_http::Error>().is_some_and(|e| {
                matches!(e, simple_http::Error::SocketError(io)
                    if io.kind() == std::io::ErrorKind::ConnectionRefused)
            });
            if refused {
                ChainError::Unreachable(e.to_string())
            } else {
                ChainError::Transport(e.to_string())
            }
        }
        other => ChainError::Parse(other.to_string()),
    }
}

fn btc_to_sats(value: &Value) -> Result<u128, ChainError> {
    let amount = money::decimal_from_json(value)?;
    if amount.is_zero() {
        return Ok(0);
    }
    Ok(money::to_base_units(amount, BTC_DECIMALS)?)
}

fn sats_to_json(amount: u128) -> Result<Value, ChainError> {
    let btc = money::from_base_units(amount, BTC_DECIMALS)?;
    serde_json::from_str(&btc.to_string()).map_err(|e| ChainError::Parse(e.to_string()))
}

/// Wallet receives into `address` confirmed in `(from_height, to_height]`
fn receives_in_window(
    listing: &Value,
    address: &str,
    from_height: u64,
    to_height: u64,
) -> Result<Vec<IncomingTransfer>, ChainError> {
    let Some(entries) = listing.get("transactions").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    let mut transfers = Vec::new();
    for entry in entries {
        if entry.get("category").and_then(Value::as_str) != Some("receive")
            || entry.get("address").and_then(Value::as_str) != Some(address)
        {
            continue;
        }
        let Some(height) = entry.get("blockheight").and_then(Value::as_u64) else {
            continue;
        };
        if height <= from_height || height > to_height {
            continue;
        }
        let Some(txid) = entry.get("txid").and_then(Value::as_str) else {
            continue;
        };
        let amount = match entry.get("amount") {
            Some(amount) => btc_to_sats(amount)?,
            None => continue,
        };
        transfers.push(IncomingTransfer {
            tx_hash: txid.to_string(),
            sender: None,
            amount,
            height,
        });
    }
    Ok(transfers)
}

#[async_trait]
impl ChainRpc for BitcoindRpc {
    async fn latest_height(&self) -> Result<u64, ChainError> {
        self.call("getblockcount", vec![]).await
    }

    async fn balance(&self, _address: &str) -> Result<u128, ChainError> {
        let balance: Value = self.call("getbalance", vec![]).await?;
        btc_to_sats(&balance)
    }

    async fn broadcast(&self, _from: &str, to: &str, amount: u128) -> Result<String, ChainError> {
        self.call("sendtoaddress", vec![json!(to), sats_to_json(amount)?])
            .await
    }

    async fn observe(&self, tx_hash: &str) -> Result<TxObservation, ChainError> {
        let tx: Value = match self.call("gettransaction", vec![json!(tx_hash)]).await {
            Ok(tx) => tx,
            Err(ChainError::Rpc { code, .. }) if code == i64::from(RPC_INVALID_ADDRESS_OR_KEY) => {
                return Ok(TxObservation::NotFound);
            }
            Err(e) => return Err(e),
        };
        let confirmations = tx
            .get("confirmations")
            .and_then(Value::as_i64)
            .ok_or_else(|| ChainError::Parse(format!("{}: no confirmations field", tx_hash)))?;

        // Negative confirmations: conflicted with a confirmed transaction
        Ok(TxObservation::Included {
            confirmations: u64::try_from(confirmations).unwrap_or(0),
            success: confirmations >= 0,
        })
    }

    async fn incoming(
        &self,
        address: &str,
        from_height: u64,
        to_height: u64,
    ) -> Result<Vec<IncomingTransfer>, ChainError> {
        let args = if from_height == 0 {
            vec![]
        } else {
            let block_hash: String = self.call("getblockhash", vec![json!(from_height)]).await?;
            vec![json!(block_hash), json!(1), json!(true)]
        };
        let listing: Value = self.call("listsinceblock", args).await?;

        let mut transfers = receives_in_window(&listing, address, from_height, to_height)?;
        for transfer in &mut transfers {
            transfer.sender = self.sender_of(&transfer.tx_hash).await;
            if transfer.sender.is_none() {
                debug!(tx = %transfer.tx_hash, "Sender not resolvable");
            }
        }
        Ok(transfers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_conversion() {
        assert_eq!(btc_to_sats(&json!(1.5)).unwrap(), 150_000_000);
        assert_eq!(btc_to_sats(&json!(0.00000001)).unwrap(), 1);
        assert_eq!(btc_to_sats(&json!(0)).unwrap(), 0);
        assert_eq!(sats_to_json(150_000_000).unwrap(), json!(1.5));
    }

    #[test]
    fn test_receives_in_window() {
        let listing = json!({
            "transactions": [
                {"category": "receive", "address": "bc1qcustody", "txid": "t1", "amount": 1.5, "blockheight": 101},
                {"category": "send", "address": "bc1qcustody", "txid": "t2", "amount": -0.1, "blockheight": 101},
                {"category": "receive", "address": "bc1qother", "txid": "t3", "amount": 2, "blockheight": 101},
                {"category": "receive", "address": "bc1qcustody", "txid": "t4", "amount": 1, "blockheight": 100},
                {"category": "receive", "address": "bc1qcustody", "txid": "t5", "amount": 1},
                {"category": "receive", "address": "bc1qcustody", "txid": "t6", "amount": 0.2, "blockheight": 103}
            ],
            "lastblock": "00ff"
        });
        let transfers = receives_in_window(&listing, "bc1qcustody", 100, 102).unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].tx_hash, "t1");
        assert_eq!(transfers[0].amount, 150_000_000);
        assert_eq!(transfers[0].height, 101);
    }
}
