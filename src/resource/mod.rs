//! Account-resource Family (Tron-like chains)
//!
//! - Blocks, accounts, transaction building, broadcast: `/wallet/*` HTTP API
//! - Tokens: TRC-20 through `triggersmartcontract`
//! - Addresses: base58check with the 0x41 version byte

pub mod client;
pub mod scanner;
pub mod sender;

use std::sync::Arc;
use tracing::warn;

use crate::chain::{ChainError, FamilyParts};
use crate::common::config::{NetworkEntry, TokenEntry};
use crate::keys::AddressEncoding;
use crate::types::{ChainFamily, Currency};

pub use client::{TronClient, TronNode, TronTransaction};
pub use scanner::TronScanner;
pub use sender::TronSender;

/// Native coin plus every token whose contract is a valid address
pub fn currencies(network: &str, tokens: &[TokenEntry]) -> Vec<Currency> {
    let mut currencies = vec![Currency::native(network, ChainFamily::AccountResource)];

    for token in tokens {
        match AddressEncoding::Tron.validate(&token.contract) {
            Ok(contract) => currencies.push(Currency::token(
                &token.symbol,
                network,
                ChainFamily::AccountResource,
                contract,
                token.decimals,
            )),
            Err(e) => warn!(
                target: "custody::chain",
                network = %network,
                token = %token.symbol,
                error = %e,
                "skipping token with malformed contract"
            ),
        }
    }

    currencies
}

/// Wire up the block source and sender of an account-resource network
pub fn connect(
    entry: &NetworkEntry,
    network: &str,
    tokens: &[TokenEntry],
) -> Result<(FamilyParts, Vec<Currency>), ChainError> {
    let currencies = currencies(network, tokens);
    let client = TronClient::new(&entry.host)?;

    let parts = FamilyParts {
        source: Arc::new(TronScanner::new(client.clone(), &currencies)),
        sender: Arc::new(TronSender::new(Arc::new(client))),
        encoding: AddressEncoding::Tron,
    };

    Ok((parts, currencies))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{tron_address, PrivateKey};

    #[test]
    fn test_catalog_skips_malformed_contracts() {
        let contract = tron_address(&PrivateKey::from_hex(&format!("{:064x}", 8)).unwrap()).unwrap();
        let tokens = vec![
            TokenEntry {
                symbol: "USDT".into(),
                contract: contract.clone(),
                decimals: 6,
            },
            TokenEntry {
                symbol: "BAD".into(),
                contract: "0xdac17f958d2ee523a2206206994597c13d831ec7".into(),
                decimals: 6,
            },
        ];

        let currencies = currencies("trx", &tokens);
        assert_eq!(currencies.len(), 2);
        assert_eq!(currencies[0].id.to_string(), "TRX_TRX_TRX");
        assert_eq!(currencies[1].id.to_string(), "USDT_TRX_TRX");
        assert_eq!(currencies[1].contract.as_deref(), Some(contract.as_str()));
    }
}
