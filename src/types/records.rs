//! Durable Records
//!
//! Rows the engine reads and writes through the store.
//!
//! Private keys are kept as plaintext hex. Encrypting them at rest is out
//! of scope for this crate; treat the database as key material.

use serde::Serialize;
use std::fmt;

/// A key holder, one per external correlation key (`uhash`)
#[derive(Clone, PartialEq, Eq)]
pub struct WalletRecord {
    pub id: i64,
    /// Hex-encoded secp256k1 scalar
    pub private_key: String,
    /// Opaque caller-supplied correlation key, unique
    pub uhash: String,
}

impl fmt::Debug for WalletRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletRecord")
            .field("id", &self.id)
            .field("private_key", &"<redacted>")
            .field("uhash", &self.uhash)
            .finish()
    }
}

/// A chain-specific encoding of a wallet's key for one coin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRecord {
    pub id: i64,
    pub address: String,
    /// Composite coin id, e.g. `USDT_ETH_ETH`
    pub coin: String,
    pub wallet_id: i64,
}

/// Address returned to callers of `issue_address`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedAddress {
    pub address: String,
    pub id: i64,
}

impl From<&AddressRecord> for IssuedAddress {
    fn from(record: &AddressRecord) -> Self {
        Self {
            address: record.address.clone(),
            id: record.id,
        }
    }
}

/// An address row joined with the wallet that owns it
#[derive(Debug, Clone)]
pub struct AddressOwner {
    pub address: AddressRecord,
    pub wallet: WalletRecord,
}

/// A freshly observed incoming transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer {
    pub txhash: String,
    /// Base units of `currency`
    pub value: u128,
    pub network: String,
    pub currency: String,
    pub to_address: String,
    pub block_height: Option<u64>,
}

/// A recorded incoming transfer awaiting (or past) confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransfer {
    pub id: i64,
    pub txhash: String,
    /// Base units of `currency`
    pub value: u128,
    pub network: String,
    pub currency: String,
    pub to_address: String,
    pub block_height: Option<u64>,
    /// Set exactly once by the sweeper; gates crediting
    pub confirmed: bool,
    /// Set once the sweep to the hot wallet has been accepted by the sender
    pub swept: bool,
}

impl PendingTransfer {
    /// Blocks mined on top of this transfer's block at `tip`
    pub fn depth(&self, tip: u64) -> Option<u64> {
        self.block_height.map(|h| tip.saturating_sub(h))
    }
}
