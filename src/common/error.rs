//! Common Error Types for the Custody Engine
//!
//! Root error for the binary and the ops surface. Modules keep their own
//! error enums and convert into this one at the edges.

use thiserror::Error;

use crate::chain::ChainError;
use crate::keys::KeyError;
use crate::registry::RegistryError;
use crate::storage::StorageError;

/// Root error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] super::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] super::logging::LoggingError),

    /// Storage errors
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Chain adapter errors
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    /// Registry errors
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Key material errors
    #[error("key error: {0}")]
    Key(#[from] KeyError),

    /// Validation errors
    #[error("validation error: {0}")]
    Validation(String),

    /// Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Chain(e) => e.is_transient(),
            EngineError::Storage(StorageError::Connection(_))
            | EngineError::Storage(StorageError::Database(_))
            | EngineError::Io(_) => true,
            _ => false,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "CONFIG_ERROR",
            EngineError::Logging(_) => "LOGGING_ERROR",
            EngineError::Storage(_) => "STORAGE_ERROR",
            EngineError::Chain(_) => "CHAIN_ERROR",
            EngineError::Registry(RegistryError::UnknownCoin(_)) => "UNKNOWN_COIN",
            EngineError::Registry(_) => "REGISTRY_ERROR",
            EngineError::Key(_) => "KEY_ERROR",
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::Internal(_) => "INTERNAL_ERROR",
            EngineError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = EngineError::validation("bad amount");
        assert!(err.to_string().contains("bad amount"));
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let err: EngineError = RegistryError::UnknownCoin("DOGE_DOGE_BTC".into()).into();
        assert_eq!(err.error_code(), "UNKNOWN_COIN");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(EngineError::from(ChainError::Rpc("timeout".into())).is_retryable());
        assert!(EngineError::from(StorageError::Connection("pool".into())).is_retryable());
        assert!(!EngineError::validation("invalid input").is_retryable());
        assert!(!EngineError::from(StorageError::Duplicate("tx".into())).is_retryable());
    }
}
