//! Account-gas Family (Ethereum-like chains)
//!
//! - Blocks, balances, nonces, broadcast: `eth_*` JSON-RPC
//! - Tokens: ERC-20 `transfer` / `balanceOf`
//! - Transactions: EIP-1559, signed locally with `alloy`
//! - Addresses: lower-case `0x` hex

pub mod abi;
pub mod client;
pub mod scanner;
pub mod sender;

use std::sync::Arc;
use tracing::warn;

use crate::chain::{ChainError, FamilyParts};
use crate::common::config::{NetworkEntry, TokenEntry};
use crate::keys::AddressEncoding;
use crate::types::{ChainFamily, Currency};

pub use client::{EthClient, EthNode, FeeParams};
pub use scanner::EthScanner;
pub use sender::EthSender;

/// Native coin plus every well-formed token of the catalog
pub fn currencies(network: &str, tokens: &[TokenEntry]) -> Vec<Currency> {
    let mut currencies = vec![Currency::native(network, ChainFamily::AccountGas)];

    for token in tokens {
        match AddressEncoding::Ethereum.validate(&token.contract) {
            Ok(contract) => currencies.push(Currency::token(
                &token.symbol,
                network,
                ChainFamily::AccountGas,
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

/// Wire up the block source and sender of an account-gas network
pub fn connect(
    entry: &NetworkEntry,
    network: &str,
    tokens: &[TokenEntry],
) -> Result<(FamilyParts, Vec<Currency>), ChainError> {
    let currencies = currencies(network, tokens);
    let client = EthClient::new(&entry.host)?;

    let parts = FamilyParts {
        source: Arc::new(EthScanner::new(client.clone(), &currencies)),
        sender: Arc::new(EthSender::new(Arc::new(client))),
        encoding: AddressEncoding::Ethereum,
    };

    Ok((parts, currencies))
}
