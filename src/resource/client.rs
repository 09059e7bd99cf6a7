//! Tron HTTP API Client
//!
//! Talks to a java-tron full node (or TronGrid) over its `/wallet/*` REST
//! endpoints. Block queries use hex addresses (`41…`); account and
//! transaction-building queries pass `visible: true` so addresses go out
//! in base58.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::account::abi;
use crate::chain::ChainError;
use crate::keys::tron_base58_to_bytes;

/// `transfer(address,uint256)`
pub const TRANSFER_FUNCTION: &str = "transfer(address,uint256)";

/// `balanceOf(address)`
pub const BALANCE_OF_FUNCTION: &str = "balanceOf(address)";

/// A transaction as built by the node, optionally signed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TronTransaction {
    #[serde(rename = "txID")]
    pub tx_id: String,
    pub raw_data: Value,
    pub raw_data_hex: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signature: Vec<String>,
}

/// Block from `/wallet/getblockbynum` or `/wallet/getnowblock`
#[derive(Debug, Clone, Deserialize)]
pub struct TronBlock {
    #[serde(default)]
    pub block_header: Option<BlockHeader>,
    #[serde(default)]
    pub transactions: Vec<BlockTransaction>,
}

impl TronBlock {
    pub fn number(&self) -> Option<u64> {
        self.block_header.as_ref().map(|h| h.raw_data.number)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    pub raw_data: HeaderRaw,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeaderRaw {
    #[serde(default)]
    pub number: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockTransaction {
    #[serde(rename = "txID")]
    pub tx_id: String,
    #[serde(default)]
    pub ret: Vec<TxResult>,
    pub raw_data: TxRaw,
}

impl BlockTransaction {
    /// Contract execution did not fail
    ///
    /// Nodes omit `contractRet` on some plain transfers; that counts as
    /// success.
    pub fn succeeded(&self) -> bool {
        self.ret
            .first()
            .and_then(|r| r.contract_ret.as_deref())
            .map_or(true, |ret| ret == "SUCCESS")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxResult {
    #[serde(rename = "contractRet", default)]
    pub contract_ret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxRaw {
    #[serde(default)]
    pub contract: Vec<TxContract>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxContract {
    #[serde(rename = "type")]
    pub kind: String,
    pub parameter: ContractParameter,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractParameter {
    pub value: Value,
}

#[derive(Debug, Deserialize)]
struct Account {
    #[serde(default)]
    balance: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccountResource {
    #[serde(default)]
    energy_limit: u64,
    #[serde(default)]
    energy_used: u64,
}

#[derive(Debug, Deserialize)]
struct TriggerResult {
    #[serde(default)]
    result: Option<CallStatus>,
    #[serde(default)]
    transaction: Option<TronTransaction>,
    #[serde(default)]
    constant_result: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CallStatus {
    #[serde(default)]
    result: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BroadcastResult {
    #[serde(default)]
    result: bool,
    #[serde(default)]
    txid: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Node messages are often hex-encoded text
fn node_message(message: Option<&str>) -> String {
    let Some(message) = message else {
        return "no message".to_string();
    };
    hex::decode(message)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| message.to_string())
}

/// What the resource sender needs from a node
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TronNode: Send + Sync {
    /// TRX balance in sun
    async fn balance(&self, address: &str) -> Result<u128, ChainError>;

    /// TRC-20 balance via `balanceOf`
    async fn token_balance(&self, contract: &str, owner: &str) -> Result<u128, ChainError>;

    /// Energy the account can spend without burning TRX
    async fn available_energy(&self, address: &str) -> Result<u64, ChainError>;

    /// Unsigned native transfer
    async fn create_transfer(&self, from: &str, to: &str, amount: u128) -> Result<TronTransaction, ChainError>;

    /// Unsigned TRC-20 `transfer`
    async fn create_token_transfer(
        &self,
        from: &str,
        contract: &str,
        to: &str,
        amount: u128,
        fee_limit: u64,
    ) -> Result<TronTransaction, ChainError>;

    /// Broadcast a signed transaction; returns its txID
    async fn broadcast(&self, tx: &TronTransaction) -> Result<String, ChainError>;
}

/// Tron full-node HTTP client
#[derive(Debug, Clone)]
pub struct TronClient {
    client: Client,
    base_url: String,
}

impl TronClient {
    pub fn new(base_url: &str) -> Result<Self, ChainError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, ChainError> {
        let url = format!("{}{}", self.base_url, path);
        let value: Value = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = value.get("Error").and_then(Value::as_str) {
            return Err(ChainError::Rpc(format!("{}: {}", path, error)));
        }

        serde_json::from_value(value).map_err(|e| ChainError::Parse(format!("{}: {}", path, e)))
    }

    pub async fn now_block(&self) -> Result<TronBlock, ChainError> {
        self.post("/wallet/getnowblock", json!({})).await
    }

    /// Block at `height`; an empty answer means the node has not reached it
    pub async fn block_by_number(&self, height: u64) -> Result<TronBlock, ChainError> {
        let block: TronBlock = self.post("/wallet/getblockbynum", json!({ "num": height })).await?;
        if block.number() != Some(height) {
            return Err(ChainError::Rpc(format!("block {} not available", height)));
        }
        Ok(block)
    }

    async fn trigger(&self, path: &str, body: Value) -> Result<TriggerResult, ChainError> {
        let result: TriggerResult = self.post(path, body).await?;
        match &result.result {
            Some(status) if !status.result => Err(ChainError::Rpc(format!(
                "{}: {}",
                path,
                node_message(status.message.as_deref())
            ))),
            _ => Ok(result),
        }
    }
}

/// Hex `parameter` for a one-address call
fn address_parameter(address: &str) -> Result<String, ChainError> {
    let raw = tron_base58_to_bytes(address)?;
    let mut owner = [0u8; 20];
    owner.copy_from_slice(&raw[1..]);
    Ok(hex::encode(&abi::encode_balance_of(&owner)[4..]))
}

/// Hex `parameter` for `transfer(to, amount)`
fn transfer_parameter(to: &str, amount: u128) -> Result<String, ChainError> {
    let raw = tron_base58_to_bytes(to)?;
    let mut recipient = [0u8; 20];
    recipient.copy_from_slice(&raw[1..]);
    Ok(hex::encode(&abi::encode_transfer(&recipient, amount)[4..]))
}

#[async_trait]
impl TronNode for TronClient {
    async fn balance(&self, address: &str) -> Result<u128, ChainError> {
        let account: Account = self
            .post("/wallet/getaccount", json!({ "address": address, "visible": true }))
            .await?;
        Ok(account.balance as u128)
    }

    async fn token_balance(&self, contract: &str, owner: &str) -> Result<u128, ChainError> {
        let result = self
            .trigger(
                "/wallet/triggerconstantcontract",
                json!({
                    "owner_address": owner,
                    "contract_address": contract,
                    "function_selector": BALANCE_OF_FUNCTION,
                    "parameter": address_parameter(owner)?,
                    "visible": true,
                }),
            )
            .await?;

        let word = result
            .constant_result
            .first()
            .ok_or_else(|| ChainError::Parse("balanceOf returned nothing".to_string()))?;
        abi::decode_uint(&abi::decode_hex(word)?)
            .ok_or_else(|| ChainError::Parse(format!("balanceOf result out of range: {}", word)))
    }

    async fn available_energy(&self, address: &str) -> Result<u64, ChainError> {
        let resource: AccountResource = self
            .post(
                "/wallet/getaccountresource",
                json!({ "address": address, "visible": true }),
            )
            .await?;
        Ok(resource.energy_limit.saturating_sub(resource.energy_used))
    }

    async fn create_transfer(&self, from: &str, to: &str, amount: u128) -> Result<TronTransaction, ChainError> {
        let amount = u64::try_from(amount)
            .map_err(|_| ChainError::InsufficientFunds(format!("amount {} exceeds TRX supply", amount)))?;
        self.post(
            "/wallet/createtransaction",
            json!({
                "owner_address": from,
                "to_address": to,
                "amount": amount,
                "visible": true,
            }),
        )
        .await
    }

    async fn create_token_transfer(
        &self,
        from: &str,
        contract: &str,
        to: &str,
        amount: u128,
        fee_limit: u64,
    ) -> Result<TronTransaction, ChainError> {
        let result = self
            .trigger(
                "/wallet/triggersmartcontract",
                json!({
                    "owner_address": from,
                    "contract_address": contract,
                    "function_selector": TRANSFER_FUNCTION,
                    "parameter": transfer_parameter(to, amount)?,
                    "fee_limit": fee_limit,
                    "call_value": 0,
                    "visible": true,
                }),
            )
            .await?;

        result
            .transaction
            .ok_or_else(|| ChainError::Parse("triggersmartcontract returned no transaction".to_string()))
    }

    async fn broadcast(&self, tx: &TronTransaction) -> Result<String, ChainError> {
        let body = serde_json::to_value(tx).map_err(|e| ChainError::Parse(e.to_string()))?;
        let result: BroadcastResult = self.post("/wallet/broadcasttransaction", body).await?;

        if !result.result {
            return Err(ChainError::Broadcast(format!(
                "{}: {}",
                result.code.as_deref().unwrap_or("UNKNOWN"),
                node_message(result.message.as_deref())
            )));
        }

        Ok(result.txid.unwrap_or_else(|| tx.tx_id.clone()).to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_json_shape() {
        let tx: TronTransaction = serde_json::from_value(json!({
            "visible": true,
            "txID": "ab12",
            "raw_data": { "contract": [], "expiration": 1 },
            "raw_data_hex": "0a02"
        }))
        .unwrap();
        assert!(tx.signature.is_empty());

        let mut signed = tx.clone();
        signed.signature.push("ff".into());
        let body = serde_json::to_value(&signed).unwrap();
        assert_eq!(body["txID"], "ab12");
        assert_eq!(body["signature"][0], "ff");
        assert_eq!(body["visible"], true);

        let body = serde_json::to_value(&tx).unwrap();
        assert!(body.get("signature").is_none());
    }

    #[test]
    fn test_node_message_decoding() {
        assert_eq!(node_message(Some("6f6f7073")), "oops");
        assert_eq!(node_message(Some("not hex")), "not hex");
        assert_eq!(node_message(None), "no message");
    }

    #[test]
    fn test_transfer_parameter_drops_prefix() {
        let key = crate::keys::PrivateKey::from_hex(&format!("{:064x}", 3)).unwrap();
        let to = crate::keys::tron_address(&key).unwrap();

        let param = transfer_parameter(&to, 1_000_000).unwrap();
        assert_eq!(param.len(), 128);
        assert!(param.starts_with("000000000000000000000000"));
        assert!(param.ends_with("0f4240"));
    }

    #[test]
    fn test_contract_success_flag() {
        let tx: BlockTransaction = serde_json::from_value(json!({
            "txID": "01",
            "ret": [{ "contractRet": "REVERT" }],
            "raw_data": { "contract": [] }
        }))
        .unwrap();
        assert!(!tx.succeeded());

        let tx: BlockTransaction = serde_json::from_value(json!({
            "txID": "02",
            "ret": [{}],
            "raw_data": { "contract": [] }
        }))
        .unwrap();
        assert!(tx.succeeded());
    }
}
