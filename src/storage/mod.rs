//! Storage Layer Module
//!
//! Provides persistence for wallets, addresses and incoming transfers.
//!
//! This module contains:
//! - Storage trait definitions for abstraction
//! - SQLite implementation for production
//! - In-memory implementation for testing

pub mod memory;
pub mod sqlite;
pub mod traits;

// Re-exports for convenience
pub use memory::MemoryCustodyStore;
pub use sqlite::SqliteCustodyStore;
pub use traits::{CustodyStore, StorageError, StorageResult};
