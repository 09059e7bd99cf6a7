//! UTXO Family (Bitcoin-like chains)
//!
//! - Blocks: bitcoind JSON-RPC
//! - UTXOs, fee rate, broadcast: Esplora REST
//! - Addresses: P2PKH over the uncompressed public key
//!
//! Only the native coin is supported.

pub mod client;
pub mod esplora;
pub mod sender;

use std::sync::Arc;

use crate::chain::{ChainError, FamilyParts};
use crate::common::config::NetworkEntry;
use crate::keys::AddressEncoding;
use crate::types::{ChainFamily, Currency};

pub use client::BitcoindClient;
pub use esplora::{EsploraClient, Utxo, UtxoBackend};
pub use sender::UtxoSender;

/// Wire up the block source and sender of a UTXO network
pub fn connect(entry: &NetworkEntry, network: &str) -> Result<(FamilyParts, Vec<Currency>), ChainError> {
    let native = Currency::native(network, ChainFamily::Utxo);
    let btc_network = if entry.testnet {
        bitcoin::Network::Testnet
    } else {
        bitcoin::Network::Bitcoin
    };

    let source = BitcoindClient::new(&entry.host, &native.id)?;
    let backend = EsploraClient::new(&entry.esplora_url())?;

    let parts = FamilyParts {
        source: Arc::new(source),
        sender: Arc::new(UtxoSender::new(Arc::new(backend), btc_network)),
        encoding: AddressEncoding::P2pkh {
            testnet: entry.testnet,
        },
    };

    Ok((parts, vec![native]))
}
