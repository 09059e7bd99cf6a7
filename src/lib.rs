//! Custody Engine - Multi-chain Deposit and Withdrawal Core
//!
//! One `ChainAdapter` per configured network watches blocks for deposits to
//! issued addresses, sweeps confirmed deposits into the hot wallet and pays
//! withdrawals out of it. The `Registry` routes coin ids to adapters.
//!
//! ## Chain families
//!
//! - **UTXO** (`utxo`) - Bitcoin-like chains, node RPC plus Esplora
//! - **Account/gas** (`account`) - EVM chains, ERC-20 tokens, gas top-ups
//! - **Account/resource** (`resource`) - Tron-like chains, TRC-20 tokens
//!
//! ## Shared machinery
//!
//! - `chain` - adapter, block watcher, confirmation sweeper, withdrawal driver
//! - `storage` - wallets, addresses, pending transfers and checkpoints
//! - `events` - typed event bus
//! - `api` - ops HTTP/WebSocket surface

pub mod account;
pub mod api;
pub mod chain;
pub mod common;
pub mod events;
pub mod keys;
pub mod registry;
pub mod resource;
pub mod rpc;
pub mod storage;
pub mod types;
pub mod utxo;

// Re-exports: engine surface
pub use chain::{ChainAdapter, ChainError, SendAmount, Submission};
pub use common::{EngineConfig, EngineError, NetworksFile};
pub use events::{ControlMessage, EngineEvent, EventBus};
pub use registry::{CatalogEntry, Registry, RegistryError};

// Re-exports: storage
pub use storage::{CustodyStore, MemoryCustodyStore, SqliteCustodyStore, StorageError};

// Re-exports: key material
pub use keys::{AddressEncoding, KeyError, PrivateKey};

// Re-exports: catalog types
pub use types::{ChainFamily, CoinId, Currency, IssuedAddress};
