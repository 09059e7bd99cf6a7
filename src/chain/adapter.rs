//! Chain Adapter
//!
//! One per configured network. Owns the currency catalog, the hot wallet
//! cell, the in-flight withdrawals and the two periodic loops. The family
//! only shows up through the `BlockSource`, the `FamilySender` and the
//! address encoding.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::destinations::SweepTargets;
use super::hot_wallet::{HotWallet, HotWalletCell};
use super::sender::{FamilySender, SendAmount, Submission, WithdrawalDriver, WithdrawalRequest};
use super::sweeper::{ConfirmationSweeper, SweepReport};
use super::watcher::BlockWatcher;
use super::{BlockSource, ChainError};
use crate::common::logging::log_chain_event;
use crate::events::{ControlMessage, EngineEvent, EventBus};
use crate::keys::{AddressEncoding, PrivateKey};
use crate::storage::{CustodyStore, StorageError};
use crate::types::{ChainFamily, CoinId, Currency, IssuedAddress, WalletRecord};

/// Static per-network settings
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub network: String,
    pub family: ChainFamily,
    pub encoding: AddressEncoding,
    pub confirm_count: u64,
    pub poll_interval: Duration,
    pub sweep_interval: Duration,
}

pub struct ChainAdapter {
    settings: AdapterSettings,
    currencies: Vec<Currency>,
    source: Arc<dyn BlockSource>,
    store: Arc<dyn CustodyStore>,
    events: EventBus,
    hot_wallet: HotWalletCell,
    driver: Arc<WithdrawalDriver>,
    watcher: BlockWatcher,
    sweeper: ConfirmationSweeper,
    last_height: Arc<AtomicU64>,
    ready: AtomicBool,
}

impl ChainAdapter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: AdapterSettings,
        currencies: Vec<Currency>,
        source: Arc<dyn BlockSource>,
        sender: Arc<dyn FamilySender>,
        store: Arc<dyn CustodyStore>,
        events: EventBus,
        hot_key: PrivateKey,
        targets: SweepTargets,
    ) -> Result<Self, ChainError> {
        let hot_wallet = HotWalletCell::new(HotWallet::derive(hot_key, settings.encoding)?);
        let driver = Arc::new(WithdrawalDriver::new(
            &settings.network,
            sender,
            events.clone(),
            hot_wallet.clone(),
        ));
        let last_height = Arc::new(AtomicU64::new(0));

        let watcher = BlockWatcher::new(
            &settings.network,
            source.clone(),
            store.clone(),
            driver.clone(),
            &currencies,
            last_height.clone(),
        );
        let sweeper = ConfirmationSweeper::new(
            &settings.network,
            source.clone(),
            store.clone(),
            driver.clone(),
            events.clone(),
            currencies.clone(),
            settings.confirm_count,
            hot_wallet.clone(),
            targets,
        );

        Ok(Self {
            settings,
            currencies,
            source,
            store,
            events,
            hot_wallet,
            driver,
            watcher,
            sweeper,
            last_height,
            ready: AtomicBool::new(false),
        })
    }

    pub fn network(&self) -> &str {
        &self.settings.network
    }

    pub fn family(&self) -> ChainFamily {
        self.settings.family
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn hot_wallet_address(&self) -> String {
        self.hot_wallet.address()
    }

    pub fn last_height(&self) -> u64 {
        self.last_height.load(Ordering::SeqCst)
    }

    /// `(currency id, decimals)` for every supported currency
    pub fn list_currencies(&self) -> Vec<(String, u8)> {
        self.currencies
            .iter()
            .map(|c| (c.id.to_string(), c.decimals))
            .collect()
    }

    pub fn currencies(&self) -> &[Currency] {
        &self.currencies
    }

    pub fn currency(&self, coin: &CoinId) -> Option<&Currency> {
        self.currencies.iter().find(|c| &c.id == coin)
    }

    /// Lookup-or-create the deposit address of `uhash` for `coin`
    ///
    /// Concurrent callers converge on the same wallet and address row.
    pub async fn issue_address(&self, coin: &CoinId, uhash: &str) -> Result<IssuedAddress, ChainError> {
        if self.currency(coin).is_none() {
            return Err(ChainError::UnknownToken(coin.to_string()));
        }

        let coin_id = coin.to_string();
        let wallet = self.wallet_for(uhash).await?;

        if let Some(existing) = self.store.find_address(wallet.id, &coin_id).await? {
            return Ok(IssuedAddress::from(&existing));
        }

        let key = PrivateKey::from_hex(&wallet.private_key)?;
        let address = self.settings.encoding.derive(&key)?;

        let record = match self.store.create_address(wallet.id, &coin_id, &address).await {
            Ok(record) => {
                info!(
                    target: "custody::deposit",
                    network = %self.settings.network,
                    coin = %coin_id,
                    address = %record.address,
                    "issued deposit address"
                );
                record
            }
            Err(StorageError::Duplicate(_)) => self
                .store
                .find_address(wallet.id, &coin_id)
                .await?
                .ok_or_else(|| StorageError::NotFound(format!("{}/{}", wallet.id, coin_id)))?,
            Err(e) => return Err(e.into()),
        };

        Ok(IssuedAddress::from(&record))
    }

    async fn wallet_for(&self, uhash: &str) -> Result<WalletRecord, ChainError> {
        if let Some(wallet) = self.store.find_wallet(uhash).await? {
            return Ok(wallet);
        }

        let key = PrivateKey::generate();
        match self.store.create_wallet(uhash, &key.to_hex()).await {
            Ok(wallet) => Ok(wallet),
            Err(StorageError::Duplicate(_)) => Ok(self
                .store
                .find_wallet(uhash)
                .await?
                .ok_or_else(|| StorageError::NotFound(uhash.to_string()))?),
            Err(e) => Err(e.into()),
        }
    }

    /// One block watcher iteration
    pub async fn poll_blocks(&self) -> Result<u64, ChainError> {
        self.watcher.tick().await
    }

    /// One confirmation sweeper iteration
    pub async fn sweep_confirmed(&self) -> Result<SweepReport, ChainError> {
        self.sweeper.tick().await
    }

    /// Send `amount` of `token` from the address of `from_key` to `to`
    pub async fn withdraw(
        &self,
        from_key: PrivateKey,
        token: &CoinId,
        amount: SendAmount,
        to: &str,
    ) -> Result<Submission, ChainError> {
        let currency = self
            .currency(token)
            .cloned()
            .ok_or_else(|| ChainError::UnknownToken(token.to_string()))?;
        let to = self
            .settings
            .encoding
            .validate(to)
            .map_err(|_| ChainError::InvalidAddress(to.to_string()))?;
        let from = self.settings.encoding.derive(&from_key)?;

        self.driver
            .withdraw(WithdrawalRequest {
                from,
                from_key,
                currency,
                amount,
                to,
            })
            .await
    }

    /// Pay out of the hot wallet
    pub async fn withdraw_from_hot_wallet(
        &self,
        token: &CoinId,
        amount: SendAmount,
        to: &str,
    ) -> Result<Submission, ChainError> {
        let hot = self.hot_wallet.load();
        self.withdraw(hot.key.clone(), token, amount, to).await
    }

    /// Swap the hot wallet; returns its new address
    pub fn rotate_hot_wallet(&self, seed: &str) -> Result<String, ChainError> {
        let wallet = HotWallet::derive(PrivateKey::from_hex(seed)?, self.settings.encoding)?;
        let address = wallet.address.clone();
        self.hot_wallet.rotate(wallet);

        log_chain_event(
            &self.settings.network,
            "hot_wallet_rotated",
            serde_json::json!({ "address": address }),
        );
        Ok(address)
    }

    /// Resolve the starting watermark: the checkpoint, else `tip - 1`
    pub async fn initialize(&self) -> Result<u64, ChainError> {
        let start = match self.store.load_checkpoint(&self.settings.network).await? {
            Some(height) => height,
            None => self.source.tip_height().await?.saturating_sub(1),
        };
        self.last_height.store(start, Ordering::SeqCst);
        Ok(start)
    }

    /// Spawn the adapter: initialise until ready, announce readiness,
    /// then run the watcher and sweeper loops forever
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let control = self.events.subscribe_control();

        tokio::spawn(async move {
            let control_task = tokio::spawn(self.clone().control_loop(control));

            loop {
                match self.initialize().await {
                    Ok(height) => {
                        log_chain_event(
                            &self.settings.network,
                            "chain_ready",
                            serde_json::json!({
                                "height": height,
                                "hot_wallet": self.hot_wallet.address(),
                                "currencies": self.list_currencies().len(),
                            }),
                        );
                        break;
                    }
                    Err(e) => {
                        warn!(
                            target: "custody::chain",
                            network = %self.settings.network,
                            error = %e,
                            "initialisation failed, retrying"
                        );
                        tokio::time::sleep(self.settings.poll_interval).await;
                    }
                }
            }

            self.ready.store(true, Ordering::SeqCst);
            self.events.publish(EngineEvent::ChainReady {
                network: self.settings.network.clone(),
            });

            let watch_task = tokio::spawn(self.clone().watch_loop());
            let sweep_task = tokio::spawn(self.clone().sweep_loop());
            let _ = tokio::join!(control_task, watch_task, sweep_task);
        })
    }

    async fn watch_loop(self: Arc<Self>) {
        loop {
            if let Err(e) = self.poll_blocks().await {
                warn!(
                    target: "custody::chain",
                    network = %self.settings.network,
                    error = %e,
                    "block poll failed, range will be retried"
                );
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    async fn sweep_loop(self: Arc<Self>) {
        loop {
            if let Err(e) = self.sweep_confirmed().await {
                warn!(
                    target: "custody::chain",
                    network = %self.settings.network,
                    error = %e,
                    "confirmation sweep failed"
                );
            }
            tokio::time::sleep(self.settings.sweep_interval).await;
        }
    }

    async fn control_loop(self: Arc<Self>, mut rx: tokio::sync::broadcast::Receiver<ControlMessage>) {
        loop {
            match rx.recv().await {
                Ok(ControlMessage::RotateHotWallet { seed }) => {
                    if let Err(e) = self.rotate_hot_wallet(&seed) {
                        warn!(
                            target: "custody::chain",
                            network = %self.settings.network,
                            error = %e,
                            "hot wallet rotation rejected"
                        );
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        target: "custody::chain",
                        network = %self.settings.network,
                        skipped,
                        "control channel lagged"
                    );
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::sender::MockFamilySender;
    use crate::chain::MockBlockSource;
    use crate::storage::MemoryCustodyStore;

    fn settings() -> AdapterSettings {
        AdapterSettings {
            network: "ETH".into(),
            family: ChainFamily::AccountGas,
            encoding: AddressEncoding::Ethereum,
            confirm_count: 2,
            poll_interval: Duration::from_millis(10),
            sweep_interval: Duration::from_millis(10),
        }
    }

    fn currencies() -> Vec<Currency> {
        vec![
            Currency::native("ETH", ChainFamily::AccountGas),
            Currency::token(
                "USDT",
                "ETH",
                ChainFamily::AccountGas,
                "0xdac17f958d2ee523a2206206994597c13d831ec7".into(),
                6,
            ),
        ]
    }

    fn adapter(source: MockBlockSource, sender: MockFamilySender, store: Arc<MemoryCustodyStore>) -> ChainAdapter {
        ChainAdapter::new(
            settings(),
            currencies(),
            Arc::new(source),
            Arc::new(sender),
            store,
            EventBus::default(),
            PrivateKey::from_hex(&format!("{:064x}", 1)).unwrap(),
            SweepTargets::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_issue_address_is_idempotent_across_coins() {
        let store = Arc::new(MemoryCustodyStore::new());
        let adapter = adapter(MockBlockSource::new(), MockFamilySender::new(), store.clone());
        let eth: CoinId = "ETH_ETH_ETH".parse().unwrap();
        let usdt: CoinId = "USDT_ETH_ETH".parse().unwrap();

        let first = adapter.issue_address(&eth, "user-1").await.unwrap();
        let again = adapter.issue_address(&eth, "user-1").await.unwrap();
        assert_eq!(first, again);
        assert!(first.address.starts_with("0x"));
        assert_eq!(first.address, first.address.to_lowercase());

        // Same key, separate row
        let token = adapter.issue_address(&usdt, "user-1").await.unwrap();
        assert_eq!(token.address, first.address);
        assert_ne!(token.id, first.id);

        let other = adapter.issue_address(&eth, "user-2").await.unwrap();
        assert_ne!(other.address, first.address);
    }

    #[tokio::test]
    async fn test_concurrent_issue_converges() {
        let store = Arc::new(MemoryCustodyStore::new());
        let adapter = Arc::new(adapter(MockBlockSource::new(), MockFamilySender::new(), store.clone()));
        let eth: CoinId = "ETH_ETH_ETH".parse().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let adapter = adapter.clone();
                let eth = eth.clone();
                tokio::spawn(async move { adapter.issue_address(&eth, "user-1").await.unwrap() })
            })
            .collect();

        let mut issued = Vec::new();
        for handle in handles {
            issued.push(handle.await.unwrap());
        }

        assert!(issued.windows(2).all(|w| w[0] == w[1]));
        let wallet = store.find_wallet("user-1").await.unwrap().unwrap();
        assert!(store.find_address(wallet.id, "ETH_ETH_ETH").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unknown_coin_rejected() {
        let adapter = adapter(
            MockBlockSource::new(),
            MockFamilySender::new(),
            Arc::new(MemoryCustodyStore::new()),
        );
        let dai: CoinId = "DAI_ETH_ETH".parse().unwrap();

        assert!(matches!(
            adapter.issue_address(&dai, "user-1").await,
            Err(ChainError::UnknownToken(_))
        ));
    }

    #[tokio::test]
    async fn test_initialize_prefers_checkpoint() {
        let mut source = MockBlockSource::new();
        source.expect_tip_height().times(1).returning(|| Ok(100));
        let store = Arc::new(MemoryCustodyStore::new());
        let adapter = adapter(source, MockFamilySender::new(), store.clone());

        assert_eq!(adapter.initialize().await.unwrap(), 99);

        store.save_checkpoint("ETH", 90).await.unwrap();
        assert_eq!(adapter.initialize().await.unwrap(), 90);
        assert_eq!(adapter.last_height(), 90);
    }

    #[tokio::test]
    async fn test_rotation_changes_hot_wallet() {
        let adapter = adapter(
            MockBlockSource::new(),
            MockFamilySender::new(),
            Arc::new(MemoryCustodyStore::new()),
        );
        assert_eq!(
            adapter.hot_wallet_address(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );

        let new_key = PrivateKey::generate();
        let address = adapter.rotate_hot_wallet(&new_key.to_hex()).unwrap();
        assert_eq!(adapter.hot_wallet_address(), address);
        assert_ne!(address, "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf");

        assert!(adapter.rotate_hot_wallet("not-hex").is_err());
        assert_eq!(adapter.hot_wallet_address(), address);
    }

    #[tokio::test]
    async fn test_withdraw_validates_destination() {
        let mut sender = MockFamilySender::new();
        sender
            .expect_submit()
            .times(1)
            .withf(|request, hot| {
                request.from == hot.address
                    && request.to == "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
                    && request.amount == SendAmount::Exact(5)
            })
            .returning(|_, _| Ok(Submission::Sent { hash: "0x01".into() }));

        let adapter = adapter(MockBlockSource::new(), sender, Arc::new(MemoryCustodyStore::new()));
        let eth: CoinId = "ETH_ETH_ETH".parse().unwrap();

        assert!(matches!(
            adapter
                .withdraw_from_hot_wallet(&eth, SendAmount::Exact(5), "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t")
                .await,
            Err(ChainError::InvalidAddress(_))
        ));

        let submission = adapter
            .withdraw_from_hot_wallet(
                &eth,
                SendAmount::Exact(5),
                "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf",
            )
            .await
            .unwrap();
        assert_eq!(submission, Submission::Sent { hash: "0x01".into() });
    }

    #[tokio::test]
    async fn test_start_announces_readiness() {
        let mut source = MockBlockSource::new();
        source.expect_tip_height().returning(|| Ok(100));
        source
            .expect_scan_block()
            .returning(|h| Ok(crate::chain::ScannedBlock { height: h, ..Default::default() }));

        let store = Arc::new(MemoryCustodyStore::new());
        let adapter = Arc::new(adapter(source, MockFamilySender::new(), store));
        let mut rx = adapter.events.subscribe();

        let handle = adapter.clone().start();
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(event, EngineEvent::ChainReady { network: "ETH".into() });
        assert!(adapter.is_ready());
        handle.abort();
    }
}
