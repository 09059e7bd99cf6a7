//! Chain Adapter Layer
//!
//! Everything the three chain families share:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        ChainAdapter                            │
//! │                                                                │
//! │  BlockWatcher ──scan──► BlockSource (per family)               │
//! │      │  tx hash in flight? ──► WithdrawalDriver::observe       │
//! │      └─ tracked address? ───► CustodyStore::insert_transfer    │
//! │                                                                │
//! │  ConfirmationSweeper ──depth ≥ N──► mark_confirmed (gate)      │
//! │      ├─► EngineEvent::ConfirmedTransfer                        │
//! │      └─► WithdrawalDriver::withdraw ──► FamilySender           │
//! │                                                                │
//! │  HotWalletCell ◄── ControlMessage::RotateHotWallet             │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Family variants (`utxo`, `account`, `resource`) only provide a
//! `BlockSource` and a `FamilySender`.

pub mod adapter;
pub mod destinations;
pub mod hot_wallet;
pub mod inflight;
pub mod sender;
pub mod sweeper;
pub mod watcher;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::keys::{AddressEncoding, KeyError};
use crate::rpc::RpcError;
use crate::storage::StorageError;

pub use adapter::{AdapterSettings, ChainAdapter};
pub use destinations::SweepTargets;
pub use hot_wallet::{HotWallet, HotWalletCell};
pub use inflight::{InFlightKind, InFlightTable, InFlightWithdrawal};
pub use sender::{FamilySender, SendAmount, Submission, WithdrawalDriver, WithdrawalRequest};
pub use sweeper::ConfirmationSweeper;
pub use watcher::BlockWatcher;

#[cfg(test)]
pub use sender::MockFamilySender;

/// Chain adapter errors
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("broadcast rejected: {0}")]
    Broadcast(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("unknown token: {0}")]
    UnknownToken(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
}

impl ChainError {
    /// Worth retrying on the next tick
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainError::Rpc(_)
                | ChainError::Http(_)
                | ChainError::Storage(StorageError::Connection(_))
        )
    }
}

impl From<RpcError> for ChainError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Http(e) => ChainError::Http(e),
            RpcError::Decode(msg) => ChainError::Parse(msg),
            other => ChainError::Rpc(other.to_string()),
        }
    }
}

/// A transfer-shaped operation found in a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedTransfer {
    pub txhash: String,
    /// Destination in canonical form
    pub to: String,
    /// Base units
    pub value: u128,
    /// Currency id
    pub currency: String,
}

/// Everything the watcher needs from one block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedBlock {
    pub height: u64,
    /// Every transaction hash in the block, canonical form
    pub tx_hashes: Vec<String>,
    pub transfers: Vec<ObservedTransfer>,
}

/// Read side of a chain node
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Current chain height
    async fn tip_height(&self) -> Result<u64, ChainError>;

    /// Extract transaction hashes and transfers of the block at `height`
    async fn scan_block(&self, height: u64) -> Result<ScannedBlock, ChainError>;
}

/// What a chain family contributes to an adapter
pub struct FamilyParts {
    pub source: Arc<dyn BlockSource>,
    pub sender: Arc<dyn FamilySender>,
    pub encoding: AddressEncoding,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ChainError::Rpc("timeout".into()).is_transient());
        assert!(ChainError::Storage(StorageError::Connection("pool".into())).is_transient());
        assert!(!ChainError::Storage(StorageError::Duplicate("0x01".into())).is_transient());
        assert!(!ChainError::InvalidAddress("x".into()).is_transient());
    }

    #[test]
    fn test_rpc_error_mapping() {
        let err: ChainError = RpcError::Decode("bad".into()).into();
        assert!(matches!(err, ChainError::Parse(_)));

        let err: ChainError = RpcError::Server {
            code: -5,
            message: "Block not found".into(),
        }
        .into();
        assert!(matches!(err, ChainError::Rpc(ref m) if m.contains("Block not found")));
    }
}
