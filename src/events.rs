//! Engine Event Bus
//!
//! Typed publish/subscribe over tokio broadcast channels.
//!
//! Two channels:
//! - `EngineEvent` (produced): chain readiness, confirmed deposits and
//!   terminal withdrawal outcomes, consumed by the ledger and the ops
//!   WebSocket.
//! - `ControlMessage` (consumed): operator signals such as hot-wallet
//!   rotation.
//!
//! Delivery is fire-and-forget; consumers must tolerate duplicates and
//! lagging receivers drop the oldest messages.

use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;

/// Events published by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// An adapter finished initialisation and its catalog is final
    ChainReady { network: String },

    /// A deposit reached its confirmation threshold
    ConfirmedTransfer {
        to: String,
        txhash: String,
        /// Human decimal amount
        value: String,
        currency: String,
        uhash: String,
    },

    /// A withdrawal transaction was observed on-chain
    WithdrawalCompleted {
        from: String,
        token: String,
        hash: String,
    },

    /// The hot wallet cannot fund a gas top-up
    FaucetEmpty { from: String, token: String },

    /// The source address cannot pay the fee in native currency
    NoFeeOnNative { from: String, token: String },
}

impl EngineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::ChainReady { .. } => "chain_ready",
            EngineEvent::ConfirmedTransfer { .. } => "confirmed_transfer",
            EngineEvent::WithdrawalCompleted { .. } => "withdrawal_completed",
            EngineEvent::FaucetEmpty { .. } => "faucet_empty",
            EngineEvent::NoFeeOnNative { .. } => "no_fee_on_native",
        }
    }
}

/// Operator signals consumed by the adapters
#[derive(Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Replace the hot wallet of every adapter; hex private scalar
    RotateHotWallet { seed: String },
}

impl fmt::Debug for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMessage::RotateHotWallet { .. } => f
                .debug_struct("RotateHotWallet")
                .field("seed", &"<redacted>")
                .finish(),
        }
    }
}

/// Shared pub/sub handle; clones share the same channels
#[derive(Clone)]
pub struct EventBus {
    events: broadcast::Sender<EngineEvent>,
    control: broadcast::Sender<ControlMessage>,
}

impl EventBus {
    /// Create a bus with the given per-channel capacity
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        let (control, _) = broadcast::channel(capacity);
        Self { events, control }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: EngineEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Send an operator signal to every adapter
    pub fn send_control(&self, message: ControlMessage) {
        let _ = self.control.send(message);
    }

    pub fn subscribe_control(&self) -> broadcast::Receiver<ControlMessage> {
        self.control.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
