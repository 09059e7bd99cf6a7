//! Storage Trait Definitions
//!
//! The durable store the engine needs: wallets, addresses, incoming
//! transfers and per-network height checkpoints.
//! Implementations can use SQLite (production) or in-memory (testing).

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{AddressOwner, AddressRecord, NewTransfer, PendingTransfer, WalletRecord};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Custody storage interface
///
/// Implementations:
/// - `SqliteCustodyStore` - Production storage with SQLite
/// - `MemoryCustodyStore` - In-memory storage for testing
#[async_trait]
pub trait CustodyStore: Send + Sync {
    /// Find the wallet for a correlation key
    async fn find_wallet(&self, uhash: &str) -> StorageResult<Option<WalletRecord>>;

    /// Create a wallet; `Duplicate` if `uhash` already has one
    async fn create_wallet(&self, uhash: &str, private_key: &str) -> StorageResult<WalletRecord>;

    /// Find the address row of a wallet for one coin
    async fn find_address(&self, wallet_id: i64, coin: &str) -> StorageResult<Option<AddressRecord>>;

    /// Create an address row; `Duplicate` if `(wallet_id, coin)` already exists
    async fn create_address(
        &self,
        wallet_id: i64,
        coin: &str,
        address: &str,
    ) -> StorageResult<AddressRecord>;

    /// Resolve an on-chain address to its row and owning wallet
    async fn find_owner(&self, address: &str) -> StorageResult<Option<AddressOwner>>;

    /// Record an incoming transfer; `Duplicate` if `txhash` is already recorded
    async fn insert_transfer(&self, transfer: &NewTransfer) -> StorageResult<PendingTransfer>;

    /// Unconfirmed transfers in any of `currencies`
    async fn list_unconfirmed(&self, currencies: &[String]) -> StorageResult<Vec<PendingTransfer>>;

    /// Flip `confirmed` false → true. Returns `false` if it was already set.
    async fn mark_confirmed(&self, txhash: &str) -> StorageResult<bool>;

    /// Confirmed transfers in any of `currencies` whose sweep is outstanding
    async fn list_unswept(&self, currencies: &[String]) -> StorageResult<Vec<PendingTransfer>>;

    /// Record that the sweep of `txhash` was accepted
    async fn mark_swept(&self, txhash: &str) -> StorageResult<()>;

    /// Last fully scanned height of a network
    async fn load_checkpoint(&self, network: &str) -> StorageResult<Option<u64>>;

    /// Persist the last fully scanned height of a network
    async fn save_checkpoint(&self, network: &str, height: u64) -> StorageResult<()>;
}
