//! Core Registry
//!
//! Builds one `ChainAdapter` per enabled network entry and routes calls to
//! the adapter that owns a coin id.
//!
//! # Flow:
//! 1. Resolve the shared hot-wallet seed (environment, then network file)
//! 2. Build an adapter per entry; misconfigured entries are logged and skipped
//! 3. `start_all` spawns every adapter and a catalog listener
//! 4. Each `ChainReady` event merges that adapter's currencies into the
//!    global catalog; until then its coins are unknown

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::chain::{
    AdapterSettings, ChainAdapter, ChainError, FamilyParts, SendAmount, Submission, SweepTargets,
};
use crate::common::config::{load_token_catalog, ConfigError, EngineConfig, NetworkEntry, NetworksFile};
use crate::common::logging::{log_chain_event, log_system_event};
use crate::events::{ControlMessage, EngineEvent, EventBus};
use crate::keys::{KeyError, PrivateKey};
use crate::storage::{CustodyStore, StorageError};
use crate::types::{parse_units, ChainFamily, CoinId, Currency, IssuedAddress, UnitsError};
use crate::{account, resource, utxo};

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("hot wallet seed is not configured")]
    MissingHotWalletSeed,

    #[error("hot wallet seed is invalid: {0}")]
    InvalidHotWalletSeed(KeyError),

    #[error("unknown coin: {0}")]
    UnknownCoin(String),

    #[error("unsupported chain family: {0}")]
    UnsupportedFamily(String),

    #[error("network {0} is configured twice")]
    DuplicateNetwork(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Units(#[from] UnitsError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// One currency in the by-symbol catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub network: String,
    pub currency: String,
    pub decimals: u8,
}

/// Routes coin ids to chain adapters
pub struct Registry {
    adapters: BTreeMap<String, Arc<ChainAdapter>>,
    catalog: RwLock<BTreeMap<CoinId, Currency>>,
    events: EventBus,
}

impl Registry {
    /// Empty registry publishing on `events`
    pub fn new(events: EventBus) -> Self {
        Self {
            adapters: BTreeMap::new(),
            catalog: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    /// Build every enabled adapter of the network file
    pub fn from_config(
        config: &EngineConfig,
        networks: &NetworksFile,
        store: Arc<dyn CustodyStore>,
        events: EventBus,
    ) -> Result<Self, RegistryError> {
        let seed = resolve_seed(config, networks)?;
        let targets = SweepTargets::load(&config.sweep_targets_path)?;
        let mut registry = Self::new(events.clone());

        for entry in &networks.nets {
            let network = entry.network();

            if entry.disabled {
                log_system_event(&network, "network_disabled", None);
                continue;
            }
            if registry.adapters.contains_key(&network) {
                let err = RegistryError::DuplicateNetwork(network.clone());
                log_system_event(&network, "network_skipped", Some(&err.to_string()));
                continue;
            }

            match build_adapter(entry, &network, &seed, store.clone(), events.clone(), targets.clone()) {
                Ok(adapter) => {
                    log_system_event(&network, "network_configured", None);
                    registry.register(Arc::new(adapter));
                }
                Err(e) => log_system_event(&network, "network_skipped", Some(&e.to_string())),
            }
        }

        Ok(registry)
    }

    /// Add an adapter; `false` if its network is already taken
    pub fn register(&mut self, adapter: Arc<ChainAdapter>) -> bool {
        let network = adapter.network().to_string();
        if self.adapters.contains_key(&network) {
            return false;
        }
        self.adapters.insert(network, adapter);
        true
    }

    pub fn adapter(&self, network: &str) -> Option<&Arc<ChainAdapter>> {
        self.adapters.get(&network.to_uppercase())
    }

    pub fn networks(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Spawn the catalog listener and every adapter
    pub fn start_all(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut rx = self.events.subscribe();
        let registry = self.clone();

        let mut handles = vec![tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(EngineEvent::ChainReady { network }) => {
                        registry.merge_catalog(&network).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(target: "custody::system", skipped, "catalog listener lagged, resyncing");
                        for adapter in registry.adapters.values().filter(|a| a.is_ready()) {
                            registry.merge_catalog(adapter.network()).await;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })];

        for adapter in self.adapters.values() {
            handles.push(adapter.clone().start());
        }

        handles
    }

    /// Publish the currencies of `network`; returns how many were merged
    pub async fn merge_catalog(&self, network: &str) -> usize {
        let Some(adapter) = self.adapter(network) else {
            return 0;
        };

        let mut catalog = self.catalog.write().await;
        for currency in adapter.currencies() {
            catalog.insert(currency.id.clone(), currency.clone());
        }

        let merged = adapter.currencies().len();
        log_chain_event(
            adapter.network(),
            "catalog_merged",
            serde_json::json!({ "currencies": merged }),
        );
        merged
    }

    async fn resolve(&self, coin: &str) -> Result<(CoinId, Currency, &Arc<ChainAdapter>), RegistryError> {
        let unknown = || RegistryError::UnknownCoin(coin.to_string());
        let id: CoinId = coin.parse().map_err(|_| unknown())?;

        let currency = self.catalog.read().await.get(&id).cloned().ok_or_else(unknown)?;
        let adapter = self.adapters.get(id.network()).ok_or_else(unknown)?;

        Ok((id, currency, adapter))
    }

    /// Deposit address of `uhash` for `coin`, created on first use
    pub async fn issue_address(&self, coin: &str, uhash: &str) -> Result<IssuedAddress, RegistryError> {
        let (id, _, adapter) = self.resolve(coin).await?;
        Ok(adapter.issue_address(&id, uhash).await?)
    }

    /// Whether `coin` is in the merged catalog
    pub async fn has(&self, coin: &str) -> bool {
        match coin.parse::<CoinId>() {
            Ok(id) => self.catalog.read().await.contains_key(&id),
            Err(_) => false,
        }
    }

    /// `(currency id, decimals)` across every ready adapter
    pub async fn list_all_currencies(&self) -> Vec<(String, u8)> {
        self.catalog
            .read()
            .await
            .values()
            .map(|c| (c.id.to_string(), c.decimals))
            .collect()
    }

    /// Currencies grouped by token symbol
    pub async fn catalog_by_symbol(&self) -> BTreeMap<String, Vec<CatalogEntry>> {
        let mut grouped: BTreeMap<String, Vec<CatalogEntry>> = BTreeMap::new();

        for currency in self.catalog.read().await.values() {
            grouped
                .entry(currency.id.symbol().to_string())
                .or_default()
                .push(CatalogEntry {
                    network: currency.id.network().to_string(),
                    currency: currency.id.to_string(),
                    decimals: currency.decimals,
                });
        }

        grouped
    }

    /// Pay `value` (a decimal amount) of `coin` from the hot wallet to `to`
    ///
    /// The outcome of the submission is also reported on the event bus.
    pub async fn withdraw(&self, value: &str, coin: &str, to: &str) -> Result<Submission, RegistryError> {
        let (id, currency, adapter) = self.resolve(coin).await?;
        let amount = parse_units(value, currency.decimals)?;

        Ok(adapter
            .withdraw_from_hot_wallet(&id, SendAmount::Exact(amount), to)
            .await?)
    }

    /// Ask every adapter to switch to a new hot wallet
    pub fn rotate_hot_wallet(&self, seed: &str) -> Result<(), RegistryError> {
        PrivateKey::from_hex(seed).map_err(RegistryError::InvalidHotWalletSeed)?;
        self.events.send_control(ControlMessage::RotateHotWallet {
            seed: seed.trim().to_string(),
        });
        Ok(())
    }
}

/// Environment override first, then the network file
fn resolve_seed(config: &EngineConfig, networks: &NetworksFile) -> Result<PrivateKey, RegistryError> {
    let seed = config
        .hot_wallet_key
        .as_deref()
        .or(networks.hot_wallet_seed.as_deref())
        .filter(|s| !s.trim().is_empty())
        .ok_or(RegistryError::MissingHotWalletSeed)?;

    PrivateKey::from_hex(seed).map_err(RegistryError::InvalidHotWalletSeed)
}

fn build_adapter(
    entry: &NetworkEntry,
    network: &str,
    seed: &PrivateKey,
    store: Arc<dyn CustodyStore>,
    events: EventBus,
    targets: SweepTargets,
) -> Result<ChainAdapter, RegistryError> {
    let family = entry
        .family()
        .ok_or_else(|| RegistryError::UnsupportedFamily(entry.core.clone()))?;

    let tokens = match (&entry.token_path, family) {
        (Some(path), ChainFamily::AccountGas | ChainFamily::AccountResource) => load_token_catalog(path)?,
        _ => Vec::new(),
    };

    let (parts, currencies): (FamilyParts, Vec<Currency>) = match family {
        ChainFamily::Utxo => utxo::connect(entry, network)?,
        ChainFamily::AccountGas => account::connect(entry, network, &tokens)?,
        ChainFamily::AccountResource => resource::connect(entry, network, &tokens)?,
    };

    let settings = AdapterSettings {
        network: network.to_string(),
        family,
        encoding: parts.encoding,
        confirm_count: entry.confirmations(family),
        poll_interval: entry.poll_interval(family),
        sweep_interval: entry.sweep_interval(family),
    };

    Ok(ChainAdapter::new(
        settings,
        currencies,
        parts.source,
        parts.sender,
        store,
        events,
        seed.clone(),
        targets,
    )?)
}
