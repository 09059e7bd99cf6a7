//! Account-resource Block Source
//!
//! Only the first contract of a transaction is inspected:
//! - `TransferContract`: native TRX
//! - `TriggerSmartContract` calling `transfer(address,uint256)` on a
//!   catalogued token
//!
//! Transactions whose contract execution failed are listed by hash but
//! never reported as transfers.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use super::client::{BlockTransaction, TronBlock, TronClient};
use crate::account::abi;
use crate::chain::{BlockSource, ChainError, ObservedTransfer, ScannedBlock};
use crate::keys::{tron_hex_to_base58, TRON_ADDRESS_PREFIX};
use crate::types::Currency;

/// Block source for one account-resource network
pub struct TronScanner {
    client: TronClient,
    native: String,
    /// Base58 contract address -> currency id
    tokens: HashMap<String, String>,
}

impl TronScanner {
    pub fn new(client: TronClient, currencies: &[Currency]) -> Self {
        let mut native = String::new();
        let mut tokens = HashMap::new();

        for currency in currencies {
            match &currency.contract {
                None => native = currency.id.to_string(),
                Some(contract) => {
                    tokens.insert(contract.clone(), currency.id.to_string());
                }
            }
        }

        Self {
            client,
            native,
            tokens,
        }
    }
}

fn field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Transfer carried by the first contract of `tx`, if any
fn transfer_of(
    tx: &BlockTransaction,
    native: &str,
    tokens: &HashMap<String, String>,
) -> Option<(String, u128, String)> {
    let contract = tx.raw_data.contract.first()?;
    let value = &contract.parameter.value;

    match contract.kind.as_str() {
        "TransferContract" => {
            let to = tron_hex_to_base58(field(value, "to_address")?).ok()?;
            let amount = value.get("amount").and_then(Value::as_u64)? as u128;
            Some((to, amount, native.to_string()))
        }
        "TriggerSmartContract" => {
            let token = tron_hex_to_base58(field(value, "contract_address")?).ok()?;
            let currency = tokens.get(&token)?;

            let data = abi::decode_hex(field(value, "data")?).ok()?;
            let (recipient, amount) = abi::decode_transfer(&data)?;

            let mut raw = [0u8; 21];
            raw[0] = TRON_ADDRESS_PREFIX;
            raw[1..].copy_from_slice(&recipient);
            let to = tron_hex_to_base58(&hex::encode(raw)).ok()?;

            Some((to, amount, currency.clone()))
        }
        _ => None,
    }
}

/// Pull hashes and transfers out of a block
pub fn extract_block(
    block: &TronBlock,
    height: u64,
    native: &str,
    tokens: &HashMap<String, String>,
) -> ScannedBlock {
    let mut scanned = ScannedBlock {
        height,
        ..Default::default()
    };

    for tx in &block.transactions {
        let txhash = tx.tx_id.to_lowercase();
        scanned.tx_hashes.push(txhash.clone());

        if !tx.succeeded() {
            continue;
        }

        if let Some((to, value, currency)) = transfer_of(tx, native, tokens) {
            if value > 0 {
                scanned.transfers.push(ObservedTransfer {
                    txhash,
                    to,
                    value,
                    currency,
                });
            }
        }
    }

    scanned
}

#[async_trait]
impl BlockSource for TronScanner {
    async fn tip_height(&self) -> Result<u64, ChainError> {
        self.client
            .now_block()
            .await?
            .number()
            .ok_or_else(|| ChainError::Parse("getnowblock returned no header".to_string()))
    }

    async fn scan_block(&self, height: u64) -> Result<ScannedBlock, ChainError> {
        let block = self.client.block_by_number(height).await?;
        Ok(extract_block(&block, height, &self.native, &self.tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{tron_address, tron_base58_to_bytes, PrivateKey};
    use serde_json::json;

    fn address(n: u64) -> (String, String) {
        let key = PrivateKey::from_hex(&format!("{:064x}", n)).unwrap();
        let base58 = tron_address(&key).unwrap();
        let hex = hex::encode(tron_base58_to_bytes(&base58).unwrap());
        (base58, hex)
    }

    fn transfer_data(recipient_hex: &str, amount: u128) -> String {
        let raw = hex::decode(recipient_hex).unwrap();
        let mut to = [0u8; 20];
        to.copy_from_slice(&raw[1..]);
        hex::encode(abi::encode_transfer(&to, amount))
    }

    #[test]
    fn test_extracts_trx_and_trc20() {
        let (user, user_hex) = address(11);
        let (usdt, usdt_hex) = address(12);
        let (_, sender_hex) = address(13);
        let tokens = HashMap::from([(usdt, "USDT_TRX_TRX".to_string())]);

        let block: TronBlock = serde_json::from_value(json!({
            "block_header": { "raw_data": { "number": 500 } },
            "transactions": [
                {
                    "txID": "AA",
                    "ret": [{ "contractRet": "SUCCESS" }],
                    "raw_data": { "contract": [{
                        "type": "TransferContract",
                        "parameter": { "value": { "amount": 2_000_000, "owner_address": sender_hex, "to_address": user_hex } }
                    }]}
                },
                {
                    "txID": "bb",
                    "ret": [{ "contractRet": "SUCCESS" }],
                    "raw_data": { "contract": [{
                        "type": "TriggerSmartContract",
                        "parameter": { "value": {
                            "owner_address": sender_hex,
                            "contract_address": usdt_hex,
                            "data": transfer_data(&user_hex, 7_000_000)
                        } }
                    }]}
                }
            ]
        }))
        .unwrap();

        let scanned = extract_block(&block, 500, "TRX_TRX_TRX", &tokens);

        assert_eq!(scanned.tx_hashes, vec!["aa", "bb"]);
        assert_eq!(scanned.transfers.len(), 2);
        assert_eq!(scanned.transfers[0].to, user);
        assert_eq!(scanned.transfers[0].value, 2_000_000);
        assert_eq!(scanned.transfers[0].currency, "TRX_TRX_TRX");
        assert_eq!(scanned.transfers[1].to, user);
        assert_eq!(scanned.transfers[1].value, 7_000_000);
        assert_eq!(scanned.transfers[1].currency, "USDT_TRX_TRX");
    }

    #[test]
    fn test_skips_failed_and_untracked_calls() {
        let (_, user_hex) = address(11);
        let (_, other_hex) = address(14);
        let (usdt, usdt_hex) = address(12);
        let tokens = HashMap::from([(usdt, "USDT_TRX_TRX".to_string())]);

        let block: TronBlock = serde_json::from_value(json!({
            "block_header": { "raw_data": { "number": 501 } },
            "transactions": [
                {
                    "txID": "c1",
                    "ret": [{ "contractRet": "OUT_OF_ENERGY" }],
                    "raw_data": { "contract": [{
                        "type": "TriggerSmartContract",
                        "parameter": { "value": { "contract_address": usdt_hex, "data": transfer_data(&user_hex, 5) } }
                    }]}
                },
                {
                    "txID": "c2",
                    "raw_data": { "contract": [{
                        "type": "TriggerSmartContract",
                        "parameter": { "value": { "contract_address": other_hex, "data": transfer_data(&user_hex, 5) } }
                    }]}
                },
                {
                    "txID": "c3",
                    "raw_data": { "contract": [{
                        "type": "FreezeBalanceV2Contract",
                        "parameter": { "value": { "frozen_balance": 100 } }
                    }]}
                }
            ]
        }))
        .unwrap();

        let scanned = extract_block(&block, 501, "TRX_TRX_TRX", &tokens);
        assert_eq!(scanned.tx_hashes.len(), 3);
        assert!(scanned.transfers.is_empty());
    }
}
