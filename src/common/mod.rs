//! Common Infrastructure Module
//!
//! This module contains:
//! - Configuration loading (environment + network file)
//! - Structured logging setup
//! - The root error type

pub mod config;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use config::{load_token_catalog, ConfigError, EngineConfig, NetworkEntry, NetworksFile, TokenEntry};
pub use error::{EngineError, Result};
pub use logging::{
    init_from_config, init_logging, log_chain_event, log_deposit_event, log_system_event,
    log_withdrawal_event, parse_level, EventCategory, LogEvent, LoggingError,
};
