//! Shared Types Module
//!
//! Data types shared across adapters, storage and the registry.

pub mod currency;
pub mod records;
pub mod units;

// Re-exports for convenience
pub use currency::{ChainFamily, CoinId, CoinIdError, Currency};
pub use records::{
    AddressOwner, AddressRecord, IssuedAddress, NewTransfer, PendingTransfer, WalletRecord,
};
pub use units::{btc_to_sats, format_units, parse_units, UnitsError, SATS_PER_BTC};
