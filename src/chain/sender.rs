//! Withdrawal Sender
//!
//! Per request:
//!
//! ```text
//! Requested ─► submit ─┬─► Sent ──(seen in block)──► WithdrawalCompleted
//!                      ├─► GasTopUp ──(seen)──► submit again
//!                      ├─► NoFeeOnNative   (terminal)
//!                      └─► FaucetEmpty     (terminal)
//! ```
//!
//! `FamilySender` builds, signs and broadcasts one step; the
//! `WithdrawalDriver` owns the in-flight table and publishes the single
//! terminal event of each request.

use async_trait::async_trait;
use std::sync::Arc;

use super::hot_wallet::{HotWallet, HotWalletCell};
use super::inflight::{InFlightKind, InFlightTable, InFlightWithdrawal};
use super::ChainError;
use crate::common::logging::log_withdrawal_event;
use crate::events::{EngineEvent, EventBus};
use crate::keys::PrivateKey;
use crate::types::Currency;

/// How much to send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendAmount {
    /// Everything the source holds, minus the fee it pays
    All,
    /// Exactly this many base units
    Exact(u128),
}

/// One outgoing transfer
#[derive(Debug, Clone)]
pub struct WithdrawalRequest {
    /// Source address in the adapter's encoding
    pub from: String,
    pub from_key: PrivateKey,
    pub currency: Currency,
    pub amount: SendAmount,
    pub to: String,
}

/// Result of one submission step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The transfer was broadcast
    Sent { hash: String },
    /// The hot wallet broadcast a native top-up to the source first
    GasTopUp { hash: String },
    /// The source cannot pay the fee
    NoFeeOnNative,
    /// The hot wallet cannot afford the top-up
    FaucetEmpty,
}

/// Family-specific transaction construction
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FamilySender: Send + Sync {
    /// Build, sign and broadcast the next step of `request`
    ///
    /// `hot` funds gas top-ups.
    async fn submit(
        &self,
        request: &WithdrawalRequest,
        hot: &HotWallet,
    ) -> Result<Submission, ChainError>;
}

/// Drives requests through their lifecycle for one adapter
pub struct WithdrawalDriver {
    network: String,
    sender: Arc<dyn FamilySender>,
    inflight: InFlightTable,
    events: EventBus,
    hot_wallet: HotWalletCell,
}

impl WithdrawalDriver {
    pub fn new(
        network: &str,
        sender: Arc<dyn FamilySender>,
        events: EventBus,
        hot_wallet: HotWalletCell,
    ) -> Self {
        Self {
            network: network.to_string(),
            sender,
            inflight: InFlightTable::new(),
            events,
            hot_wallet,
        }
    }

    pub fn inflight(&self) -> &InFlightTable {
        &self.inflight
    }

    /// Submit a request against the current hot wallet
    pub async fn withdraw(&self, request: WithdrawalRequest) -> Result<Submission, ChainError> {
        let hot = self.hot_wallet.load();
        self.dispatch(request, hot).await
    }

    /// Report a transaction hash seen in a block
    ///
    /// Returns `true` if it belonged to an in-flight withdrawal.
    pub async fn observe(&self, tx_id: &str) -> bool {
        let Some(entry) = self.inflight.remove(tx_id).await else {
            return false;
        };

        let token = entry.request.currency.id.to_string();
        match entry.kind {
            InFlightKind::Transfer => {
                log_withdrawal_event(
                    &self.network,
                    "withdrawal_completed",
                    &entry.request.from,
                    &token,
                    Some(&entry.tx_id),
                    None,
                );
                self.events.publish(EngineEvent::WithdrawalCompleted {
                    from: entry.request.from.clone(),
                    token,
                    hash: entry.tx_id.clone(),
                });
            }
            InFlightKind::TopUp => {
                log_withdrawal_event(
                    &self.network,
                    "gas_top_up_confirmed",
                    &entry.request.from,
                    &token,
                    Some(&entry.tx_id),
                    None,
                );
                self.resume(entry).await;
            }
        }

        true
    }

    /// Retry resumed requests whose resubmission failed
    pub async fn retry_parked(&self) -> usize {
        let parked = self.inflight.take_parked().await;
        let count = parked.len();

        for entry in parked {
            self.resume(entry).await;
        }

        count
    }

    async fn resume(&self, entry: InFlightWithdrawal) {
        match self
            .dispatch(entry.request.clone(), entry.hot_wallet.clone())
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_transient() => self.inflight.park(entry).await,
            // Already logged by dispatch
            Err(_) => {}
        }
    }

    async fn dispatch(
        &self,
        request: WithdrawalRequest,
        hot: Arc<HotWallet>,
    ) -> Result<Submission, ChainError> {
        let token = request.currency.id.to_string();

        let submission = match self.sender.submit(&request, &hot).await {
            Ok(submission) => submission,
            Err(e) => {
                log_withdrawal_event(
                    &self.network,
                    "submit_failed",
                    &request.from,
                    &token,
                    None,
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        };

        match &submission {
            Submission::Sent { hash } => {
                log_withdrawal_event(&self.network, "sent", &request.from, &token, Some(hash), None);
                self.inflight
                    .insert(InFlightWithdrawal::new(hash, InFlightKind::Transfer, request, hot))
                    .await;
            }
            Submission::GasTopUp { hash } => {
                log_withdrawal_event(
                    &self.network,
                    "gas_top_up",
                    &request.from,
                    &token,
                    Some(hash),
                    None,
                );
                self.inflight
                    .insert(InFlightWithdrawal::new(hash, InFlightKind::TopUp, request, hot))
                    .await;
            }
            Submission::NoFeeOnNative => {
                log_withdrawal_event(
                    &self.network,
                    "no_fee_on_native",
                    &request.from,
                    &token,
                    None,
                    Some("source cannot pay the network fee"),
                );
                self.events.publish(EngineEvent::NoFeeOnNative {
                    from: request.from,
                    token,
                });
            }
            Submission::FaucetEmpty => {
                log_withdrawal_event(
                    &self.network,
                    "faucet_empty",
                    &request.from,
                    &token,
                    None,
                    Some("hot wallet cannot fund the gas top-up"),
                );
                self.events.publish(EngineEvent::FaucetEmpty {
                    from: request.from,
                    token,
                });
            }
        }

        Ok(submission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::AddressEncoding;
    use crate::types::ChainFamily;
    use mockall::Sequence;
    use tokio::sync::broadcast::error::TryRecvError;

    fn hot_wallet() -> HotWallet {
        HotWallet::derive(PrivateKey::generate(), AddressEncoding::Ethereum).unwrap()
    }

    fn usdt_request() -> WithdrawalRequest {
        WithdrawalRequest {
            from: "0xdeposit".into(),
            from_key: PrivateKey::generate(),
            currency: Currency::token(
                "USDT",
                "ETH",
                ChainFamily::AccountGas,
                "0xdac17f958d2ee523a2206206994597c13d831ec7".into(),
                6,
            ),
            amount: SendAmount::Exact(5_000_000),
            to: "0xhot".into(),
        }
    }

    fn driver(sender: MockFamilySender, cell: HotWalletCell, events: EventBus) -> WithdrawalDriver {
        WithdrawalDriver::new("ETH", Arc::new(sender), events, cell)
    }

    #[tokio::test]
    async fn test_sent_completes_once_when_seen() {
        let mut sender = MockFamilySender::new();
        sender
            .expect_submit()
            .times(1)
            .returning(|_, _| Ok(Submission::Sent { hash: "0xAA".into() }));

        let events = EventBus::default();
        let mut rx = events.subscribe();
        let driver = driver(sender, HotWalletCell::new(hot_wallet()), events);

        driver.withdraw(usdt_request()).await.unwrap();
        assert!(driver.inflight().contains("0xaa").await);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        assert!(driver.observe("0xaa").await);
        assert!(!driver.observe("0xaa").await);

        assert_eq!(
            rx.try_recv().unwrap(),
            EngineEvent::WithdrawalCompleted {
                from: "0xdeposit".into(),
                token: "USDT_ETH_ETH".into(),
                hash: "0xaa".into(),
            }
        );
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_top_up_resumes_with_original_hot_wallet() {
        let original = hot_wallet();
        let original_address = original.address.clone();
        let cell = HotWalletCell::new(original);

        let mut seq = Sequence::new();
        let mut sender = MockFamilySender::new();
        sender
            .expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Submission::GasTopUp { hash: "0xf1".into() }));
        let expected = original_address.clone();
        sender
            .expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .withf(move |_, hot| hot.address == expected)
            .returning(|_, _| Ok(Submission::Sent { hash: "0xf2".into() }));

        let events = EventBus::default();
        let mut rx = events.subscribe();
        let driver = driver(sender, cell.clone(), events);

        assert_eq!(
            driver.withdraw(usdt_request()).await.unwrap(),
            Submission::GasTopUp { hash: "0xf1".into() }
        );

        // Rotation after issue does not affect the resumed request
        cell.rotate(hot_wallet());

        assert!(driver.observe("0xf1").await);
        assert!(driver.inflight().contains("0xf2").await);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        assert!(driver.observe("0xf2").await);
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineEvent::WithdrawalCompleted { ref hash, .. } if hash == "0xf2"
        ));
    }

    #[tokio::test]
    async fn test_terminal_failures_publish_events() {
        let mut seq = Sequence::new();
        let mut sender = MockFamilySender::new();
        sender
            .expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Submission::NoFeeOnNative));
        sender
            .expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Submission::FaucetEmpty));

        let events = EventBus::default();
        let mut rx = events.subscribe();
        let driver = driver(sender, HotWalletCell::new(hot_wallet()), events);

        driver.withdraw(usdt_request()).await.unwrap();
        driver.withdraw(usdt_request()).await.unwrap();

        assert_eq!(rx.try_recv().unwrap().kind(), "no_fee_on_native");
        assert_eq!(rx.try_recv().unwrap().kind(), "faucet_empty");
        assert!(driver.inflight().is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_resume_is_parked_and_retried() {
        let mut seq = Sequence::new();
        let mut sender = MockFamilySender::new();
        sender
            .expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Submission::GasTopUp { hash: "0xf1".into() }));
        sender
            .expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(ChainError::Rpc("connection reset".into())));
        sender
            .expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Submission::Sent { hash: "0xf2".into() }));

        let driver = driver(sender, HotWalletCell::new(hot_wallet()), EventBus::default());

        driver.withdraw(usdt_request()).await.unwrap();
        assert!(driver.observe("0xf1").await);
        assert!(driver.inflight().is_empty().await);

        assert_eq!(driver.retry_parked().await, 1);
        assert!(driver.inflight().contains("0xf2").await);
        assert_eq!(driver.retry_parked().await, 0);
    }
}
