//! Structured Logging for the Custody Engine
//!
//! Console or JSON output through `tracing-subscriber`, plus structured
//! event records for the money-moving paths so they can be grepped and
//! aggregated per network.
//!
//! Targets:
//! - `custody::deposit` - transfer detected / confirmed
//! - `custody::withdrawal` - withdrawals, gas top-ups and their failures
//! - `custody::chain` - adapter readiness, new blocks, poll errors
//! - `custody::system` - startup and configuration

use serde::Serialize;
use serde_json::{json, Value};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Which part of the engine a record comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Deposit,
    Withdrawal,
    Chain,
    System,
}

impl EventCategory {
    /// Log target of the category
    pub fn target(&self) -> &'static str {
        match self {
            EventCategory::Deposit => "custody::deposit",
            EventCategory::Withdrawal => "custody::withdrawal",
            EventCategory::Chain => "custody::chain",
            EventCategory::System => "custody::system",
        }
    }
}

/// One structured record, serialized as the log message
#[derive(Debug, Serialize)]
pub struct LogEvent {
    pub timestamp: String,
    pub category: EventCategory,
    pub network: String,
    /// Short snake_case event name, e.g. `transfer_detected`
    pub event: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogEvent {
    pub fn new(category: EventCategory, network: &str, event: &str) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            category,
            network: network.to_string(),
            event: event.to_string(),
            data: Value::Null,
            error: None,
        }
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn error(mut self, error: Option<&str>) -> Self {
        self.error = error.map(str::to_string);
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!("{{\"event\":\"{}\",\"network\":\"{}\"}}", self.event, self.network)
        })
    }

    /// Emit at INFO, or at `failure_level` when the record carries an error
    fn emit(self, failure_level: Level) {
        let line = self.to_json();
        let failed = self.error.is_some();

        // `target:` must be a literal, hence one arm per category
        macro_rules! at {
            ($target:literal) => {
                if !failed {
                    tracing::info!(target: $target, "{}", line)
                } else if failure_level == Level::ERROR {
                    tracing::error!(target: $target, "{}", line)
                } else {
                    tracing::warn!(target: $target, "{}", line)
                }
            };
        }

        match self.category {
            EventCategory::Deposit => at!("custody::deposit"),
            EventCategory::Withdrawal => at!("custody::withdrawal"),
            EventCategory::Chain => at!("custody::chain"),
            EventCategory::System => at!("custody::system"),
        }
    }
}

/// A transfer into a tracked address was detected or confirmed
pub fn log_deposit_event(network: &str, event: &str, txhash: &str, currency: &str, value: &str, to: &str) {
    LogEvent::new(EventCategory::Deposit, network, event)
        .data(json!({ "txhash": txhash, "currency": currency, "value": value, "to": to }))
        .emit(Level::ERROR);
}

/// A withdrawal step or outcome; `error` marks a failure
pub fn log_withdrawal_event(
    network: &str,
    event: &str,
    from: &str,
    token: &str,
    hash: Option<&str>,
    error: Option<&str>,
) {
    LogEvent::new(EventCategory::Withdrawal, network, event)
        .data(json!({ "from": from, "token": token, "hash": hash }))
        .error(error)
        .emit(Level::ERROR);
}

/// Adapter lifecycle
pub fn log_chain_event(network: &str, event: &str, data: Value) {
    LogEvent::new(EventCategory::Chain, network, event)
        .data(data)
        .emit(Level::WARN);
}

/// Startup or configuration; `error` marks a skipped network
pub fn log_system_event(network: &str, event: &str, error: Option<&str>) {
    LogEvent::new(EventCategory::System, network, event)
        .error(error)
        .emit(Level::WARN);
}

/// Parse a level name; unknown names fall back to INFO
pub fn parse_level(name: &str) -> Level {
    match name.trim().to_lowercase().as_str() {
        "warning" => Level::WARN,
        other => Level::from_str(other).unwrap_or(Level::INFO),
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_logging(level: Level, json_format: bool) -> Result<(), LoggingError> {
    let level = level.to_string().to_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "custody={level},custody_engine={level},tower_http={level},axum={level}"
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json_format {
        registry
            .with(fmt::layer().json().with_target(true).with_current_span(false))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .try_init()
    };

    result.map_err(|e| LoggingError::InitFailed(e.to_string()))
}

/// Install the subscriber described by `EngineConfig`
pub fn init_from_config(config: &super::config::EngineConfig) -> Result<(), LoggingError> {
    init_logging(parse_level(&config.log_level), config.log_json)
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_shape() {
        let line = LogEvent::new(EventCategory::Deposit, "ETH", "transfer_detected")
            .data(json!({ "txhash": "0xabc" }))
            .error(Some("boom"))
            .to_json();

        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["event"], "transfer_detected");
        assert_eq!(parsed["network"], "ETH");
        assert_eq!(parsed["category"], "deposit");
        assert_eq!(parsed["data"]["txhash"], "0xabc");
        assert_eq!(parsed["error"], "boom");

        let bare = LogEvent::new(EventCategory::System, "BTC", "network_configured").to_json();
        assert!(!bare.contains("\"data\""));
        assert!(!bare.contains("\"error\""));
    }

    #[test]
    fn test_level_names() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("INFO"), Level::INFO);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("nonsense"), Level::INFO);
        assert_eq!(EventCategory::Withdrawal.target(), "custody::withdrawal");
    }
}
