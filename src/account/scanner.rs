//! Account-gas Block Source
//!
//! Two transfer shapes are recognized:
//! - native: empty input and a positive value
//! - token: `transfer(address,uint256)` sent to a catalogued contract
//!
//! A token call can revert and still be mined, so every token transfer is
//! checked against its receipt before the block is handed on. Hashes and
//! addresses come out lower-case.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

use super::abi;
use super::client::{EthClient, RpcBlock};
use crate::chain::{BlockSource, ChainError, ObservedTransfer, ScannedBlock};
use crate::rpc::parse_quantity;
use crate::types::Currency;

/// Block source for one account-gas network
pub struct EthScanner {
    client: EthClient,
    native: String,
    /// Lower-case contract address -> currency id
    tokens: HashMap<String, String>,
}

impl EthScanner {
    pub fn new(client: EthClient, currencies: &[Currency]) -> Self {
        let mut native = String::new();
        let mut tokens = HashMap::new();

        for currency in currencies {
            match &currency.contract {
                None => native = currency.id.to_string(),
                Some(contract) => {
                    tokens.insert(contract.to_lowercase(), currency.id.to_string());
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

/// Pull hashes and transfers out of a full block
pub fn extract_block(
    block: &RpcBlock,
    height: u64,
    native: &str,
    tokens: &HashMap<String, String>,
) -> Result<ScannedBlock, ChainError> {
    let mut scanned = ScannedBlock {
        height,
        ..Default::default()
    };

    for tx in &block.transactions {
        let txhash = tx.hash.to_lowercase();
        scanned.tx_hashes.push(txhash.clone());

        let Some(to) = tx.to.as_deref().map(str::to_lowercase) else {
            continue;
        };

        let input = tx.input.trim();
        if input.is_empty() || input == "0x" {
            let value = parse_quantity(&tx.value)
                .map_err(|_| ChainError::Parse(format!("tx {}: bad value {:?}", txhash, tx.value)))?;
            if value > 0 {
                scanned.transfers.push(ObservedTransfer {
                    txhash,
                    to,
                    value,
                    currency: native.to_string(),
                });
            }
            continue;
        }

        let Some(currency) = tokens.get(&to) else {
            continue;
        };
        let Ok(data) = abi::decode_hex(input) else {
            continue;
        };
        if let Some((recipient, value)) = abi::decode_transfer(&data) {
            if value > 0 {
                scanned.transfers.push(ObservedTransfer {
                    txhash,
                    to: format!("0x{}", hex::encode(recipient)),
                    value,
                    currency: currency.clone(),
                });
            }
        }
    }

    Ok(scanned)
}

/// Drop transfers whose transaction reverted
pub fn discard_reverted(scanned: &mut ScannedBlock, reverted: &HashSet<String>) {
    scanned.transfers.retain(|t| !reverted.contains(&t.txhash));
}

#[async_trait]
impl BlockSource for EthScanner {
    async fn tip_height(&self) -> Result<u64, ChainError> {
        self.client.block_number().await
    }

    async fn scan_block(&self, height: u64) -> Result<ScannedBlock, ChainError> {
        let block = self.client.block_by_number(height).await?;
        let mut scanned = extract_block(&block, height, &self.native, &self.tokens)?;

        let mut reverted = HashSet::new();
        for transfer in scanned.transfers.iter().filter(|t| t.currency != self.native) {
            if !self.client.receipt(&transfer.txhash).await?.succeeded()? {
                reverted.insert(transfer.txhash.clone());
            }
        }
        discard_reverted(&mut scanned, &reverted);

        Ok(scanned)
    }
}
