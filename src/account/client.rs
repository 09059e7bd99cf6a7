//! Ethereum JSON-RPC Client
//!
//! Thin typed wrapper over `JsonRpcClient` for the handful of `eth_*`
//! methods the watcher and sender use.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;

use super::abi;
use crate::chain::ChainError;
use crate::rpc::{parse_quantity, to_quantity, JsonRpcClient};

/// Full block (`eth_getBlockByNumber` with transaction objects)
#[derive(Debug, Clone, Deserialize)]
pub struct RpcBlock {
    pub number: String,
    #[serde(default)]
    pub transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcTransaction {
    pub hash: String,
    /// `None` for contract creation
    #[serde(default)]
    pub to: Option<String>,
    /// Wei, hex quantity
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub input: String,
}

/// `eth_getTransactionReceipt`
#[derive(Debug, Clone, Deserialize)]
pub struct RpcReceipt {
    /// `0x1` success, `0x0` reverted; absent before Byzantium
    #[serde(default)]
    pub status: Option<String>,
}

impl RpcReceipt {
    pub fn succeeded(&self) -> Result<bool, ChainError> {
        match &self.status {
            Some(status) => Ok(parse_quantity(status)? == 1),
            None => Ok(true),
        }
    }
}

/// Fee market snapshot used to price one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeParams {
    pub chain_id: u64,
    /// `eth_gasPrice`, used as the fee cap
    pub gas_price: u128,
    /// Tip, never above `gas_price`
    pub priority_fee: u128,
}

impl FeeParams {
    /// Upper bound on the fee of `gas` units
    pub fn cost(&self, gas: u64) -> u128 {
        self.gas_price.saturating_mul(gas as u128)
    }
}

/// What the account sender needs from a node
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EthNode: Send + Sync {
    /// Native balance in wei
    async fn balance(&self, address: &str) -> Result<u128, ChainError>;

    /// Token balance via `balanceOf`
    async fn token_balance(&self, contract: &str, owner: &str) -> Result<u128, ChainError>;

    async fn fee_params(&self) -> Result<FeeParams, ChainError>;

    /// Next nonce, counting pending transactions
    async fn nonce(&self, address: &str) -> Result<u64, ChainError>;

    /// Broadcast a signed transaction; returns its hash
    async fn send_raw_transaction(&self, raw: &str) -> Result<String, ChainError>;
}

/// `eth_*` JSON-RPC client
#[derive(Debug, Clone)]
pub struct EthClient {
    rpc: JsonRpcClient,
    chain_id: OnceCell<u64>,
}

impl EthClient {
    pub fn new(endpoint: &str) -> Result<Self, ChainError> {
        Ok(Self {
            rpc: JsonRpcClient::new(endpoint)?,
            chain_id: OnceCell::new(),
        })
    }

    pub async fn block_number(&self) -> Result<u64, ChainError> {
        let quantity: String = self.rpc.call("eth_blockNumber", json!([])).await?;
        Ok(parse_quantity(&quantity)? as u64)
    }

    /// Block with full transactions
    ///
    /// A node that has not caught up to `height` yet answers `null`; that
    /// is reported as a retryable RPC error.
    pub async fn block_by_number(&self, height: u64) -> Result<RpcBlock, ChainError> {
        let block: Option<RpcBlock> = self
            .rpc
            .call("eth_getBlockByNumber", json!([to_quantity(height as u128), true]))
            .await?;
        block.ok_or_else(|| ChainError::Rpc(format!("block {} not available", height)))
    }

    /// Receipt of a mined transaction; a missing one is a retryable RPC error
    pub async fn receipt(&self, hash: &str) -> Result<RpcReceipt, ChainError> {
        let receipt: Option<RpcReceipt> = self
            .rpc
            .call("eth_getTransactionReceipt", json!([hash]))
            .await?;
        receipt.ok_or_else(|| ChainError::Rpc(format!("receipt of {} not available", hash)))
    }

    pub async fn chain_id(&self) -> Result<u64, ChainError> {
        let id = self
            .chain_id
            .get_or_try_init(|| async {
                let quantity: String = self.rpc.call("eth_chainId", json!([])).await?;
                Ok::<u64, ChainError>(parse_quantity(&quantity)? as u64)
            })
            .await?;
        Ok(*id)
    }

    pub async fn gas_price(&self) -> Result<u128, ChainError> {
        let quantity: String = self.rpc.call("eth_gasPrice", json!([])).await?;
        Ok(parse_quantity(&quantity)?)
    }

    /// Suggested tip; `None` on nodes without EIP-1559 support
    pub async fn max_priority_fee(&self) -> Option<u128> {
        let quantity: String = self
            .rpc
            .call("eth_maxPriorityFeePerGas", json!([]))
            .await
            .ok()?;
        parse_quantity(&quantity).ok()
    }
}

#[async_trait]
impl EthNode for EthClient {
    async fn balance(&self, address: &str) -> Result<u128, ChainError> {
        let quantity: String = self
            .rpc
            .call("eth_getBalance", json!([address, "latest"]))
            .await?;
        Ok(parse_quantity(&quantity)?)
    }

    async fn token_balance(&self, contract: &str, owner: &str) -> Result<u128, ChainError> {
        let data = abi::encode_balance_of(&abi::parse_eth_address(owner)?);
        let result: String = self
            .rpc
            .call(
                "eth_call",
                json!([{ "to": contract, "data": format!("0x{}", hex::encode(data)) }, "latest"]),
            )
            .await?;

        abi::decode_uint(&abi::decode_hex(&result)?)
            .ok_or_else(|| ChainError::Parse(format!("balanceOf result out of range: {}", result)))
    }

    async fn fee_params(&self) -> Result<FeeParams, ChainError> {
        let chain_id = self.chain_id().await?;
        let gas_price = self.gas_price().await?;
        let priority_fee = self
            .max_priority_fee()
            .await
            .map_or(gas_price, |tip| tip.min(gas_price));

        Ok(FeeParams {
            chain_id,
            gas_price,
            priority_fee,
        })
    }

    async fn nonce(&self, address: &str) -> Result<u64, ChainError> {
        let quantity: String = self
            .rpc
            .call("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        Ok(parse_quantity(&quantity)? as u64)
    }

    async fn send_raw_transaction(&self, raw: &str) -> Result<String, ChainError> {
        let hash: String = self.rpc.call("eth_sendRawTransaction", json!([raw])).await?;
        Ok(hash.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_json() {
        let block: RpcBlock = serde_json::from_value(json!({
            "number": "0x10",
            "hash": "0xabc",
            "transactions": [
                { "hash": "0x01", "from": "0xaa", "to": null, "value": "0x0", "input": "0x6080" },
                { "hash": "0x02", "from": "0xaa", "to": "0xbb", "value": "0xde0b6b3a7640000", "input": "0x" }
            ]
        }))
        .unwrap();

        assert_eq!(block.transactions.len(), 2);
        assert!(block.transactions[0].to.is_none());
        assert_eq!(
            parse_quantity(&block.transactions[1].value).unwrap(),
            1_000_000_000_000_000_000
        );
    }

    #[test]
    fn test_receipt_status() {
        let reverted: RpcReceipt = serde_json::from_value(json!({ "status": "0x0", "gasUsed": "0x5208" })).unwrap();
        assert!(!reverted.succeeded().unwrap());

        let ok: RpcReceipt = serde_json::from_value(json!({ "status": "0x1" })).unwrap();
        assert!(ok.succeeded().unwrap());

        let legacy: RpcReceipt = serde_json::from_value(json!({ "root": "0xabc" })).unwrap();
        assert!(legacy.succeeded().unwrap());

        let garbled: RpcReceipt = serde_json::from_value(json!({ "status": "0xzz" })).unwrap();
        assert!(matches!(garbled.succeeded(), Err(ChainError::Parse(_))));
    }

    #[test]
    fn test_fee_cost() {
        let fees = FeeParams {
            chain_id: 1,
            gas_price: 20_000_000_000,
            priority_fee: 1_000_000_000,
        };
        assert_eq!(fees.cost(21_000), 420_000_000_000_000);
    }
}
