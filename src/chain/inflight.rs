//! In-Flight Withdrawals
//!
//! Broadcast transactions waiting to be seen in a block, keyed by tx hash.
//! Entries live only in memory; a restart forgets them.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::hot_wallet::HotWallet;
use super::sender::WithdrawalRequest;

/// What the broadcast transaction was for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InFlightKind {
    /// The withdrawal itself; seeing it completes the request
    Transfer,
    /// A gas top-up; seeing it resumes the request
    TopUp,
}

/// A broadcast transaction and the request behind it
#[derive(Debug, Clone)]
pub struct InFlightWithdrawal {
    pub tx_id: String,
    pub kind: InFlightKind,
    pub request: WithdrawalRequest,
    /// Hot wallet the request was issued against
    pub hot_wallet: Arc<HotWallet>,
    pub created_at: DateTime<Utc>,
}

impl InFlightWithdrawal {
    pub fn new(
        tx_id: &str,
        kind: InFlightKind,
        request: WithdrawalRequest,
        hot_wallet: Arc<HotWallet>,
    ) -> Self {
        Self {
            tx_id: normalize_hash(tx_id),
            kind,
            request,
            hot_wallet,
            created_at: Utc::now(),
        }
    }
}

/// Table of in-flight withdrawals
#[derive(Clone, Default)]
pub struct InFlightTable {
    /// Entries by tx hash
    entries: Arc<RwLock<HashMap<String, InFlightWithdrawal>>>,
    /// Resumed requests whose resubmission failed, retried by the sweeper
    parked: Arc<RwLock<Vec<InFlightWithdrawal>>>,
}

impl InFlightTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, entry: InFlightWithdrawal) {
        self.entries.write().await.insert(entry.tx_id.clone(), entry);
    }

    pub async fn contains(&self, tx_id: &str) -> bool {
        self.entries.read().await.contains_key(&normalize_hash(tx_id))
    }

    /// Take the entry for `tx_id`, if any
    pub async fn remove(&self, tx_id: &str) -> Option<InFlightWithdrawal> {
        self.entries.write().await.remove(&normalize_hash(tx_id))
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn park(&self, entry: InFlightWithdrawal) {
        self.parked.write().await.push(entry);
    }

    pub async fn take_parked(&self) -> Vec<InFlightWithdrawal> {
        std::mem::take(&mut *self.parked.write().await)
    }
}

fn normalize_hash(tx_id: &str) -> String {
    tx_id.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::sender::SendAmount;
    use crate::keys::{AddressEncoding, PrivateKey};
    use crate::types::{ChainFamily, Currency};

    fn entry(tx_id: &str) -> InFlightWithdrawal {
        let hot = HotWallet::derive(PrivateKey::generate(), AddressEncoding::Ethereum).unwrap();
        let request = WithdrawalRequest {
            from: "0xabc".into(),
            from_key: PrivateKey::generate(),
            currency: Currency::native("ETH", ChainFamily::AccountGas),
            amount: SendAmount::All,
            to: hot.address.clone(),
        };
        InFlightWithdrawal::new(tx_id, InFlightKind::Transfer, request, Arc::new(hot))
    }

    #[tokio::test]
    async fn test_lookup_is_case_insensitive() {
        let table = InFlightTable::new();
        table.insert(entry("0xABCDEF")).await;

        assert!(table.contains("0xabcdef").await);
        assert_eq!(table.len().await, 1);

        let taken = table.remove("0xAbCdEf").await.unwrap();
        assert_eq!(taken.tx_id, "0xabcdef");
        assert!(table.is_empty().await);
        assert!(table.remove("0xabcdef").await.is_none());
    }

    #[tokio::test]
    async fn test_parked_entries_drain_once() {
        let table = InFlightTable::new();
        table.park(entry("0x01")).await;
        table.park(entry("0x02")).await;

        assert_eq!(table.take_parked().await.len(), 2);
        assert!(table.take_parked().await.is_empty());
    }
}
