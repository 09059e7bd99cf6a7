//! Confirmation Sweeper
//!
//! Per record: Pending → Confirmed (terminal). `mark_confirmed` is the
//! only gate past which a deposit is credited, so `ConfirmedTransfer` is
//! published at most once per tx hash.
//!
//! Moving the funds to the hot wallet (or a configured sweep target) is
//! tracked separately by the `swept` flag: a sweep that errors is retried
//! on later ticks without re-crediting.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, warn};

use super::destinations::SweepTargets;
use super::hot_wallet::HotWalletCell;
use super::sender::{SendAmount, WithdrawalDriver, WithdrawalRequest};
use super::{BlockSource, ChainError};
use crate::common::logging::log_deposit_event;
use crate::events::{EngineEvent, EventBus};
use crate::keys::PrivateKey;
use crate::storage::CustodyStore;
use crate::types::{format_units, AddressOwner, Currency, PendingTransfer};

/// Counts from one sweeper tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub confirmed: usize,
    pub swept: usize,
}

pub struct ConfirmationSweeper {
    network: String,
    source: Arc<dyn BlockSource>,
    store: Arc<dyn CustodyStore>,
    driver: Arc<WithdrawalDriver>,
    events: EventBus,
    currencies: Vec<Currency>,
    confirm_count: u64,
    hot_wallet: HotWalletCell,
    targets: SweepTargets,
}

impl ConfirmationSweeper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        network: &str,
        source: Arc<dyn BlockSource>,
        store: Arc<dyn CustodyStore>,
        driver: Arc<WithdrawalDriver>,
        events: EventBus,
        currencies: Vec<Currency>,
        confirm_count: u64,
        hot_wallet: HotWalletCell,
        targets: SweepTargets,
    ) -> Self {
        Self {
            network: network.to_string(),
            source,
            store,
            driver,
            events,
            currencies,
            confirm_count,
            hot_wallet,
            targets,
        }
    }

    pub async fn tick(&self) -> Result<SweepReport, ChainError> {
        let tip = self.source.tip_height().await?;
        let ids: Vec<String> = self.currencies.iter().map(|c| c.id.to_string()).collect();
        let mut report = SweepReport::default();
        let mut attempted = HashSet::new();

        for transfer in self.store.list_unconfirmed(&ids).await? {
            let Some(depth) = transfer.depth(tip) else {
                continue;
            };
            if depth < self.confirm_count {
                continue;
            }

            let Some(owner) = self.store.find_owner(&transfer.to_address).await? else {
                error!(
                    target: "custody::deposit",
                    network = %self.network,
                    txhash = %transfer.txhash,
                    "no wallet owns {}", transfer.to_address
                );
                continue;
            };

            if !self.store.mark_confirmed(&transfer.txhash).await? {
                continue;
            }
            report.confirmed += 1;

            let value = self.format_value(&transfer);
            log_deposit_event(
                &self.network,
                "transfer_confirmed",
                &transfer.txhash,
                &transfer.currency,
                &value,
                &transfer.to_address,
            );

            attempted.insert(transfer.txhash.clone());
            if self.sweep(&transfer, &owner).await {
                report.swept += 1;
            }

            self.events.publish(EngineEvent::ConfirmedTransfer {
                to: transfer.to_address.clone(),
                txhash: transfer.txhash.clone(),
                value,
                currency: transfer.currency.clone(),
                uhash: owner.wallet.uhash.clone(),
            });
        }

        // Sweeps that errored on earlier ticks
        for transfer in self.store.list_unswept(&ids).await? {
            if attempted.contains(&transfer.txhash) {
                continue;
            }
            let Some(owner) = self.store.find_owner(&transfer.to_address).await? else {
                continue;
            };
            if self.sweep(&transfer, &owner).await {
                report.swept += 1;
            }
        }

        self.driver.retry_parked().await;

        Ok(report)
    }

    /// Move a confirmed deposit to custody; `true` once the sender accepted it
    async fn sweep(&self, transfer: &PendingTransfer, owner: &AddressOwner) -> bool {
        match self.try_sweep(transfer, owner).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    target: "custody::withdrawal",
                    network = %self.network,
                    txhash = %transfer.txhash,
                    error = %e,
                    "sweep failed, will retry"
                );
                false
            }
        }
    }

    async fn try_sweep(&self, transfer: &PendingTransfer, owner: &AddressOwner) -> Result<(), ChainError> {
        let currency = self
            .currencies
            .iter()
            .find(|c| c.id.to_string() == transfer.currency)
            .cloned()
            .ok_or_else(|| ChainError::UnknownToken(transfer.currency.clone()))?;

        let to = match self.targets.get(&self.network).await {
            Some(target) => target,
            None => self.hot_wallet.address(),
        };

        // Native balances are swept whole; tokens move the deposited value
        let amount = if currency.is_native() {
            SendAmount::All
        } else {
            SendAmount::Exact(transfer.value)
        };

        let request = WithdrawalRequest {
            from: transfer.to_address.clone(),
            from_key: PrivateKey::from_hex(&owner.wallet.private_key)?,
            currency,
            amount,
            to,
        };

        self.driver.withdraw(request).await?;
        self.store.mark_swept(&transfer.txhash).await?;
        Ok(())
    }

    fn format_value(&self, transfer: &PendingTransfer) -> String {
        let decimals = self
            .currencies
            .iter()
            .find(|c| c.id.to_string() == transfer.currency)
            .map(|c| c.decimals)
            .unwrap_or(0);
        format_units(transfer.value, decimals)
    }
}
