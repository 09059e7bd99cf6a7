//! Hot Wallet Cell
//!
//! Single-writer, multi-reader holder of an adapter's hot wallet.
//! Readers take a snapshot (`Arc<HotWallet>`) and keep using it even if a
//! rotation lands mid-operation.

use arc_swap::ArcSwap;
use std::sync::Arc;

use crate::keys::{AddressEncoding, KeyError, PrivateKey};

/// The custodial wallet of one adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotWallet {
    pub key: PrivateKey,
    /// Address of `key` in the adapter's encoding
    pub address: String,
}

impl HotWallet {
    pub fn derive(key: PrivateKey, encoding: AddressEncoding) -> Result<Self, KeyError> {
        let address = encoding.derive(&key)?;
        Ok(Self { key, address })
    }
}

/// Atomically swapped hot wallet reference
#[derive(Clone)]
pub struct HotWalletCell {
    inner: Arc<ArcSwap<HotWallet>>,
}

impl HotWalletCell {
    pub fn new(wallet: HotWallet) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(wallet)),
        }
    }

    /// Snapshot of the current wallet
    pub fn load(&self) -> Arc<HotWallet> {
        self.inner.load_full()
    }

    pub fn address(&self) -> String {
        self.inner.load().address.clone()
    }

    /// Replace the wallet for subsequent operations
    pub fn rotate(&self, wallet: HotWallet) {
        self.inner.store(Arc::new(wallet));
    }
}
