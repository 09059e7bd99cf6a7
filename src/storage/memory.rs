//! In-Memory Storage Implementation
//!
//! Provides in-memory storage for testing and development.
//! Data is lost when the service restarts.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{CustodyStore, StorageError, StorageResult};
use crate::types::{AddressOwner, AddressRecord, NewTransfer, PendingTransfer, WalletRecord};

#[derive(Default)]
struct State {
    next_id: i64,
    wallets: Vec<WalletRecord>,
    addresses: Vec<AddressRecord>,
    /// Insertion ordered
    transfers: Vec<PendingTransfer>,
    /// Index: txhash -> position in `transfers`
    by_txhash: HashMap<String, usize>,
    checkpoints: HashMap<String, u64>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn transfer_mut(&mut self, txhash: &str) -> StorageResult<&mut PendingTransfer> {
        let idx = *self
            .by_txhash
            .get(txhash)
            .ok_or_else(|| StorageError::NotFound(txhash.to_string()))?;
        Ok(&mut self.transfers[idx])
    }
}

/// In-memory custody store
///
/// All tables sit behind one lock so check-and-insert is atomic.
#[derive(Clone, Default)]
pub struct MemoryCustodyStore {
    state: Arc<RwLock<State>>,
}

impl MemoryCustodyStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded transfers
    pub async fn transfer_count(&self) -> usize {
        self.state.read().await.transfers.len()
    }

    /// Look up a transfer by hash
    pub async fn transfer(&self, txhash: &str) -> Option<PendingTransfer> {
        let state = self.state.read().await;
        state
            .by_txhash
            .get(txhash)
            .map(|&idx| state.transfers[idx].clone())
    }
}

#[async_trait]
impl CustodyStore for MemoryCustodyStore {
    async fn find_wallet(&self, uhash: &str) -> StorageResult<Option<WalletRecord>> {
        let state = self.state.read().await;
        Ok(state.wallets.iter().find(|w| w.uhash == uhash).cloned())
    }

    async fn create_wallet(&self, uhash: &str, private_key: &str) -> StorageResult<WalletRecord> {
        let mut state = self.state.write().await;

        if state.wallets.iter().any(|w| w.uhash == uhash) {
            return Err(StorageError::Duplicate(uhash.to_string()));
        }

        let wallet = WalletRecord {
            id: state.next_id(),
            private_key: private_key.to_string(),
            uhash: uhash.to_string(),
        };
        state.wallets.push(wallet.clone());
        Ok(wallet)
    }

    async fn find_address(&self, wallet_id: i64, coin: &str) -> StorageResult<Option<AddressRecord>> {
        let state = self.state.read().await;
        Ok(state
            .addresses
            .iter()
            .find(|a| a.wallet_id == wallet_id && a.coin == coin)
            .cloned())
    }

    async fn create_address(
        &self,
        wallet_id: i64,
        coin: &str,
        address: &str,
    ) -> StorageResult<AddressRecord> {
        let mut state = self.state.write().await;

        if state
            .addresses
            .iter()
            .any(|a| a.wallet_id == wallet_id && a.coin == coin)
        {
            return Err(StorageError::Duplicate(format!("{}/{}", wallet_id, coin)));
        }

        let record = AddressRecord {
            id: state.next_id(),
            address: address.to_string(),
            coin: coin.to_string(),
            wallet_id,
        };
        state.addresses.push(record.clone());
        Ok(record)
    }

    async fn find_owner(&self, address: &str) -> StorageResult<Option<AddressOwner>> {
        let state = self.state.read().await;

        let Some(record) = state.addresses.iter().find(|a| a.address == address) else {
            return Ok(None);
        };

        let wallet = state
            .wallets
            .iter()
            .find(|w| w.id == record.wallet_id)
            .cloned()
            .ok_or_else(|| StorageError::InvalidData(format!("orphan address {}", record.id)))?;

        Ok(Some(AddressOwner {
            address: record.clone(),
            wallet,
        }))
    }

    async fn insert_transfer(&self, transfer: &NewTransfer) -> StorageResult<PendingTransfer> {
        let mut state = self.state.write().await;

        if state.by_txhash.contains_key(&transfer.txhash) {
            return Err(StorageError::Duplicate(transfer.txhash.clone()));
        }

        let record = PendingTransfer {
            id: state.next_id(),
            txhash: transfer.txhash.clone(),
            value: transfer.value,
            network: transfer.network.clone(),
            currency: transfer.currency.clone(),
            to_address: transfer.to_address.clone(),
            block_height: transfer.block_height,
            confirmed: false,
            swept: false,
        };

        let idx = state.transfers.len();
        state.transfers.push(record.clone());
        state.by_txhash.insert(record.txhash.clone(), idx);
        Ok(record)
    }

    async fn list_unconfirmed(&self, currencies: &[String]) -> StorageResult<Vec<PendingTransfer>> {
        let state = self.state.read().await;
        Ok(state
            .transfers
            .iter()
            .filter(|t| !t.confirmed && currencies.contains(&t.currency))
            .cloned()
            .collect())
    }

    async fn mark_confirmed(&self, txhash: &str) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        let transfer = state.transfer_mut(txhash)?;

        if transfer.confirmed {
            return Ok(false);
        }
        transfer.confirmed = true;
        Ok(true)
    }

    async fn list_unswept(&self, currencies: &[String]) -> StorageResult<Vec<PendingTransfer>> {
        let state = self.state.read().await;
        Ok(state
            .transfers
            .iter()
            .filter(|t| t.confirmed && !t.swept && currencies.contains(&t.currency))
            .cloned()
            .collect())
    }

    async fn mark_swept(&self, txhash: &str) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state.transfer_mut(txhash)?.swept = true;
        Ok(())
    }

    async fn load_checkpoint(&self, network: &str) -> StorageResult<Option<u64>> {
        Ok(self.state.read().await.checkpoints.get(network).copied())
    }

    async fn save_checkpoint(&self, network: &str, height: u64) -> StorageResult<()> {
        self.state
            .write()
            .await
            .checkpoints
            .insert(network.to_string(), height);
        Ok(())
    }
}
