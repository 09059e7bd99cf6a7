//! Block Watcher
//!
//! Idle → Fetching → Applying → Idle. Each tick scans every block from the
//! watermark + 1 up to the tip, strictly in order. The watermark (and the
//! persisted checkpoint) only move after the whole range applied, so a
//! failing block makes the next tick rescan the same range; re-recording a
//! known transfer is a no-op.
//!
//! Hashes of our own withdrawals are only matched while applying. They are
//! reported to the driver after the checkpoint is saved, so a rescan still
//! recognizes them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::sender::WithdrawalDriver;
use super::{BlockSource, ChainError, ScannedBlock};
use crate::common::logging::{log_chain_event, log_deposit_event};
use crate::storage::{CustodyStore, StorageError};
use crate::types::{format_units, Currency, NewTransfer};

pub struct BlockWatcher {
    network: String,
    source: Arc<dyn BlockSource>,
    store: Arc<dyn CustodyStore>,
    driver: Arc<WithdrawalDriver>,
    /// Currency id -> decimals
    decimals: HashMap<String, u8>,
    last_height: Arc<AtomicU64>,
}

impl BlockWatcher {
    pub fn new(
        network: &str,
        source: Arc<dyn BlockSource>,
        store: Arc<dyn CustodyStore>,
        driver: Arc<WithdrawalDriver>,
        currencies: &[Currency],
        last_height: Arc<AtomicU64>,
    ) -> Self {
        Self {
            network: network.to_string(),
            source,
            store,
            driver,
            decimals: currencies
                .iter()
                .map(|c| (c.id.to_string(), c.decimals))
                .collect(),
            last_height,
        }
    }

    /// Last fully applied height
    pub fn last_height(&self) -> u64 {
        self.last_height.load(Ordering::SeqCst)
    }

    /// Scan up to the current tip; returns the number of blocks applied
    pub async fn tick(&self) -> Result<u64, ChainError> {
        let tip = self.source.tip_height().await?;
        let last = self.last_height();

        if tip <= last {
            return Ok(0);
        }

        let mut recorded = 0;
        let mut own = Vec::new();
        for height in (last + 1)..=tip {
            let block = self.source.scan_block(height).await?;
            recorded += self.apply(&block, &mut own).await?;
        }

        self.store.save_checkpoint(&self.network, tip).await?;
        self.last_height.store(tip, Ordering::SeqCst);

        for hash in &own {
            self.driver.observe(hash).await;
        }

        log_chain_event(
            &self.network,
            "blocks_scanned",
            serde_json::json!({ "from": last + 1, "to": tip, "recorded": recorded }),
        );

        Ok(tip - last)
    }

    /// Record deposits of one block; in-flight hashes are pushed to `own`
    async fn apply(&self, block: &ScannedBlock, own: &mut Vec<String>) -> Result<usize, ChainError> {
        // Our own withdrawals show up in blocks too
        let mut skip = HashSet::new();
        for hash in &block.tx_hashes {
            if self.driver.inflight().contains(hash).await {
                skip.insert(hash.to_lowercase());
                own.push(hash.clone());
            }
        }

        let mut recorded = 0;
        for transfer in &block.transfers {
            if skip.contains(&transfer.txhash.to_lowercase()) {
                continue;
            }

            if self.store.find_owner(&transfer.to).await?.is_none() {
                continue;
            }

            let new = NewTransfer {
                txhash: transfer.txhash.clone(),
                value: transfer.value,
                network: self.network.clone(),
                currency: transfer.currency.clone(),
                to_address: transfer.to.clone(),
                block_height: Some(block.height),
            };

            match self.store.insert_transfer(&new).await {
                Ok(_) => {
                    recorded += 1;
                    let decimals = self.decimals.get(&transfer.currency).copied().unwrap_or(0);
                    log_deposit_event(
                        &self.network,
                        "transfer_detected",
                        &transfer.txhash,
                        &transfer.currency,
                        &format_units(transfer.value, decimals),
                        &transfer.to,
                    );
                }
                Err(StorageError::Duplicate(_)) => {
                    debug!(
                        target: "custody::deposit",
                        network = %self.network,
                        txhash = %transfer.txhash,
                        "transfer already recorded"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::hot_wallet::{HotWallet, HotWalletCell};
    use crate::chain::sender::{MockFamilySender, SendAmount, Submission, WithdrawalRequest};
    use crate::chain::{MockBlockSource, ObservedTransfer};
    use crate::events::{EngineEvent, EventBus};
    use crate::keys::{AddressEncoding, PrivateKey};
    use crate::storage::MemoryCustodyStore;
    use crate::types::ChainFamily;
    use mockall::predicate::eq;
    use std::sync::atomic::AtomicUsize;

    const ETH: &str = "ETH_ETH_ETH";

    fn transfer(txhash: &str, to: &str) -> ObservedTransfer {
        ObservedTransfer {
            txhash: txhash.into(),
            to: to.into(),
            value: 1_500_000_000_000_000_000,
            currency: ETH.into(),
        }
    }

    fn block(height: u64, transfers: Vec<ObservedTransfer>) -> ScannedBlock {
        ScannedBlock {
            height,
            tx_hashes: transfers.iter().map(|t| t.txhash.clone()).collect(),
            transfers,
        }
    }

    async fn tracked_store() -> Arc<MemoryCustodyStore> {
        let store = Arc::new(MemoryCustodyStore::new());
        let wallet = store.create_wallet("user-1", "aa").await.unwrap();
        store.create_address(wallet.id, ETH, "0xtracked").await.unwrap();
        store
    }

    fn watcher(
        source: MockBlockSource,
        store: Arc<MemoryCustodyStore>,
        driver: Arc<WithdrawalDriver>,
        start: u64,
    ) -> BlockWatcher {
        BlockWatcher::new(
            "ETH",
            Arc::new(source),
            store,
            driver,
            &[Currency::native("ETH", ChainFamily::AccountGas)],
            Arc::new(AtomicU64::new(start)),
        )
    }

    fn idle_driver() -> Arc<WithdrawalDriver> {
        let hot = HotWallet::derive(PrivateKey::generate(), AddressEncoding::Ethereum).unwrap();
        Arc::new(WithdrawalDriver::new(
            "ETH",
            Arc::new(MockFamilySender::new()),
            EventBus::default(),
            HotWalletCell::new(hot),
        ))
    }

    #[tokio::test]
    async fn test_unchanged_tip_is_noop() {
        let mut source = MockBlockSource::new();
        source.expect_tip_height().returning(|| Ok(50));
        source.expect_scan_block().never();

        let store = tracked_store().await;
        let watcher = watcher(source, store.clone(), idle_driver(), 50);

        assert_eq!(watcher.tick().await.unwrap(), 0);
        assert_eq!(store.load_checkpoint("ETH").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_records_only_tracked_destinations() {
        let mut source = MockBlockSource::new();
        source.expect_tip_height().returning(|| Ok(51));
        source
            .expect_scan_block()
            .with(eq(51))
            .times(1)
            .returning(|h| {
                Ok(block(
                    h,
                    vec![transfer("0xaa", "0xtracked"), transfer("0xbb", "0xstranger")],
                ))
            });

        let store = tracked_store().await;
        let watcher = watcher(source, store.clone(), idle_driver(), 50);

        assert_eq!(watcher.tick().await.unwrap(), 1);
        assert_eq!(store.transfer_count().await, 1);

        let recorded = store.transfer("0xaa").await.unwrap();
        assert_eq!(recorded.block_height, Some(51));
        assert!(!recorded.confirmed);
        assert_eq!(watcher.last_height(), 51);
        assert_eq!(store.load_checkpoint("ETH").await.unwrap(), Some(51));
    }

    #[tokio::test]
    async fn test_failed_block_keeps_watermark_and_rescans_range() {
        let mut source = MockBlockSource::new();
        source.expect_tip_height().returning(|| Ok(52));
        source
            .expect_scan_block()
            .with(eq(51))
            .times(2)
            .returning(|h| Ok(block(h, vec![transfer("0xaa", "0xtracked")])));

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        source
            .expect_scan_block()
            .with(eq(52))
            .times(2)
            .returning(move |h| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ChainError::Rpc("connection reset".into()))
                } else {
                    Ok(block(h, vec![]))
                }
            });

        let store = tracked_store().await;
        let watcher = watcher(source, store.clone(), idle_driver(), 50);

        assert!(watcher.tick().await.is_err());
        assert_eq!(watcher.last_height(), 50);
        assert_eq!(store.load_checkpoint("ETH").await.unwrap(), None);

        assert_eq!(watcher.tick().await.unwrap(), 2);
        assert_eq!(watcher.last_height(), 52);
        assert_eq!(store.transfer_count().await, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_own_withdrawal_is_not_recorded_as_deposit() {
        let mut sender = MockFamilySender::new();
        sender
            .expect_submit()
            .returning(|_, _| Ok(Submission::Sent { hash: "0xcc".into() }));

        let hot = HotWallet::derive(PrivateKey::generate(), AddressEncoding::Ethereum).unwrap();
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let driver = Arc::new(WithdrawalDriver::new(
            "ETH",
            Arc::new(sender),
            events,
            HotWalletCell::new(hot),
        ));

        driver
            .withdraw(WithdrawalRequest {
                from: "0xhot".into(),
                from_key: PrivateKey::generate(),
                currency: Currency::native("ETH", ChainFamily::AccountGas),
                amount: SendAmount::Exact(1),
                to: "0xtracked".into(),
            })
            .await
            .unwrap();

        let mut source = MockBlockSource::new();
        source.expect_tip_height().returning(|| Ok(51));
        source
            .expect_scan_block()
            .returning(|h| Ok(block(h, vec![transfer("0xcc", "0xtracked")])));

        let store = tracked_store().await;
        let watcher = watcher(source, store.clone(), driver.clone(), 50);
        watcher.tick().await.unwrap();

        assert_eq!(store.transfer_count().await, 0);
        assert!(driver.inflight().is_empty().await);
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineEvent::WithdrawalCompleted { ref hash, .. } if hash == "0xcc"
        ));
    }

    #[tokio::test]
    async fn test_top_up_in_rescanned_range_is_never_a_deposit() {
        let mut seq = mockall::Sequence::new();
        let mut sender = MockFamilySender::new();
        sender
            .expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Submission::GasTopUp { hash: "0xtop".into() }));
        sender
            .expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Submission::Sent { hash: "0xusdt".into() }));

        let hot = HotWallet::derive(PrivateKey::generate(), AddressEncoding::Ethereum).unwrap();
        let driver = Arc::new(WithdrawalDriver::new(
            "ETH",
            Arc::new(sender),
            EventBus::default(),
            HotWalletCell::new(hot),
        ));

        // Gas for a sweep out of a tracked deposit address
        driver
            .withdraw(WithdrawalRequest {
                from: "0xtracked".into(),
                from_key: PrivateKey::generate(),
                currency: Currency::token(
                    "USDT",
                    "ETH",
                    ChainFamily::AccountGas,
                    "0xdac17f958d2ee523a2206206994597c13d831ec7".into(),
                    6,
                ),
                amount: SendAmount::All,
                to: "0xcold".into(),
            })
            .await
            .unwrap();
        assert!(driver.inflight().contains("0xtop").await);

        let mut source = MockBlockSource::new();
        source.expect_tip_height().returning(|| Ok(52));
        source
            .expect_scan_block()
            .with(eq(51))
            .times(2)
            .returning(|h| Ok(block(h, vec![transfer("0xtop", "0xtracked")])));

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        source
            .expect_scan_block()
            .with(eq(52))
            .times(2)
            .returning(move |h| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ChainError::Rpc("connection reset".into()))
                } else {
                    Ok(block(h, vec![]))
                }
            });

        let store = tracked_store().await;
        let watcher = watcher(source, store.clone(), driver.clone(), 50);

        assert!(watcher.tick().await.is_err());
        assert_eq!(store.transfer_count().await, 0);
        assert!(driver.inflight().contains("0xtop").await);

        assert_eq!(watcher.tick().await.unwrap(), 2);
        assert_eq!(store.transfer_count().await, 0);
        assert!(!driver.inflight().contains("0xtop").await);
        assert!(driver.inflight().contains("0xusdt").await);
        assert_eq!(driver.inflight().len().await, 1);
    }
}
