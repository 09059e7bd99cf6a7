//! bitcoind Block Source
//!
//! Scans blocks over JSON-RPC (`getblockcount`, `getblockhash`,
//! `getblock <hash> 2`) and reports every output with a decodable address.
//! A transaction paying several tracked outputs is recorded once (tx hash
//! is unique), for its first tracked output.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::chain::{BlockSource, ChainError, ObservedTransfer, ScannedBlock};
use crate::rpc::JsonRpcClient;
use crate::types::{btc_to_sats, CoinId};

/// Verbose block (`getblock` verbosity 2)
#[derive(Debug, Clone, Deserialize)]
pub struct RpcBlock {
    pub hash: String,
    #[serde(default)]
    pub tx: Vec<RpcTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcTransaction {
    pub txid: String,
    #[serde(default)]
    pub vout: Vec<RpcOutput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcOutput {
    /// BTC, as a float
    pub value: f64,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: RpcScriptPubKey,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcScriptPubKey {
    /// Core ≥ 22
    #[serde(default)]
    pub address: Option<String>,
    /// Older nodes
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
}

impl RpcScriptPubKey {
    fn destination(&self) -> Option<&str> {
        self.address
            .as_deref()
            .or_else(|| self.addresses.as_ref()?.first().map(String::as_str))
    }
}

/// bitcoind JSON-RPC client
#[derive(Debug, Clone)]
pub struct BitcoindClient {
    rpc: JsonRpcClient,
    currency: String,
}

impl BitcoindClient {
    pub fn new(endpoint: &str, currency: &CoinId) -> Result<Self, ChainError> {
        Ok(Self {
            rpc: JsonRpcClient::new(endpoint)?,
            currency: currency.to_string(),
        })
    }

    pub async fn block_count(&self) -> Result<u64, ChainError> {
        Ok(self.rpc.call("getblockcount", json!([])).await?)
    }

    pub async fn block_at(&self, height: u64) -> Result<RpcBlock, ChainError> {
        let hash: String = self.rpc.call("getblockhash", json!([height])).await?;
        Ok(self.rpc.call("getblock", json!([hash, 2])).await?)
    }
}

/// Flatten a verbose block into hashes and per-output transfers
pub fn extract_block(block: &RpcBlock, height: u64, currency: &str) -> ScannedBlock {
    let mut scanned = ScannedBlock {
        height,
        ..Default::default()
    };

    for tx in &block.tx {
        let txhash = tx.txid.to_lowercase();
        scanned.tx_hashes.push(txhash.clone());

        for output in &tx.vout {
            let Some(to) = output.script_pub_key.destination() else {
                continue;
            };
            let value = btc_to_sats(output.value);
            if value == 0 {
                continue;
            }

            scanned.transfers.push(ObservedTransfer {
                txhash: txhash.clone(),
                to: to.to_string(),
                value: value as u128,
                currency: currency.to_string(),
            });
        }
    }

    scanned
}

#[async_trait]
impl BlockSource for BitcoindClient {
    async fn tip_height(&self) -> Result<u64, ChainError> {
        self.block_count().await
    }

    async fn scan_block(&self, height: u64) -> Result<ScannedBlock, ChainError> {
        let block = self.block_at(height).await?;
        Ok(extract_block(&block, height, &self.currency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> RpcBlock {
        serde_json::from_value(json!({
            "hash": "00000000000000000002a7c4c1e48d76c5a37902165a270156b7a8d72728a054",
            "height": 800000,
            "tx": [
                {
                    "txid": "AA01",
                    "vin": [{ "coinbase": "03" }],
                    "vout": [
                        { "value": 6.25, "n": 0, "scriptPubKey": { "address": "1Coinbase", "type": "pubkeyhash" } },
                        { "value": 0.0, "n": 1, "scriptPubKey": { "type": "nulldata" } }
                    ]
                },
                {
                    "txid": "bb02",
                    "vout": [
                        { "value": 0.015, "n": 0, "scriptPubKey": { "addresses": ["1Legacy"] } },
                        { "value": 0.00000546, "n": 1, "scriptPubKey": { "address": "1Change" } }
                    ]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_extract_outputs() {
        let scanned = extract_block(&sample_block(), 800_000, "BTC_BTC_BTC");

        assert_eq!(scanned.height, 800_000);
        assert_eq!(scanned.tx_hashes, vec!["aa01", "bb02"]);
        assert_eq!(scanned.transfers.len(), 3);

        assert_eq!(scanned.transfers[0].value, 625_000_000);
        assert_eq!(scanned.transfers[1].to, "1Legacy");
        assert_eq!(scanned.transfers[1].value, 1_500_000);
        assert_eq!(scanned.transfers[2].value, 546);
        assert!(scanned.transfers.iter().all(|t| t.currency == "BTC_BTC_BTC"));
    }

    #[test]
    fn test_client_rejects_bad_endpoint() {
        let coin = CoinId::native("BTC", crate::types::ChainFamily::Utxo);
        assert!(BitcoindClient::new("::not a url", &coin).is_err());
    }
}
