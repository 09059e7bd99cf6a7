//! SQLite Persistent Storage
//!
//! Durable storage for wallets, addresses and incoming transfers.
//! Uses connection pooling via r2d2 for concurrent access.
//!
//! Uniqueness (`wallets.uhash`, `addresses(wallet_id, coin)`,
//! `transfers.txhash`) is enforced by the schema and surfaced as
//! `StorageError::Duplicate`.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, OptionalExtension};
use std::path::Path;

use super::traits::{CustodyStore, StorageError, StorageResult};
use crate::types::{AddressOwner, AddressRecord, NewTransfer, PendingTransfer, WalletRecord};

/// SQLite-backed custody store with connection pooling
pub struct SqliteCustodyStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteCustodyStore {
    /// Open (or create) the database at `db_path`
    ///
    /// `":memory:"` yields a single-connection in-memory database.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        if db_path.as_ref() == Path::new(":memory:") {
            return Self::in_memory();
        }

        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path)
            .with_init(|c| c.execute_batch("PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL;"));
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Get a connection from the pool
    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS wallets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                private_key TEXT NOT NULL,
                uhash TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS addresses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL,
                coin TEXT NOT NULL,
                wallet_id INTEGER NOT NULL REFERENCES wallets(id),
                created_at INTEGER NOT NULL,
                UNIQUE (wallet_id, coin)
            );

            CREATE INDEX IF NOT EXISTS idx_addresses_address ON addresses(address);

            CREATE TABLE IF NOT EXISTS transfers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                txhash TEXT NOT NULL UNIQUE,
                value TEXT NOT NULL,
                network TEXT NOT NULL,
                currency TEXT NOT NULL,
                to_address TEXT NOT NULL,
                block_height INTEGER,
                confirmed INTEGER NOT NULL DEFAULT 0,
                swept INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_transfers_pending ON transfers(currency, confirmed);

            CREATE TABLE IF NOT EXISTS checkpoints (
                network TEXT PRIMARY KEY,
                height INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    fn map_insert_error(e: rusqlite::Error, key: &str) -> StorageError {
        if let rusqlite::Error::SqliteFailure(ref err, _) = e {
            if err.extended_code == 1555 || err.extended_code == 2067 {
                return StorageError::Duplicate(key.to_string());
            }
        }
        StorageError::Database(e.to_string())
    }

    fn row_to_wallet(row: &rusqlite::Row) -> rusqlite::Result<WalletRecord> {
        Ok(WalletRecord {
            id: row.get("id")?,
            private_key: row.get("private_key")?,
            uhash: row.get("uhash")?,
        })
    }

    fn row_to_address(row: &rusqlite::Row) -> rusqlite::Result<AddressRecord> {
        Ok(AddressRecord {
            id: row.get("id")?,
            address: row.get("address")?,
            coin: row.get("coin")?,
            wallet_id: row.get("wallet_id")?,
        })
    }

    fn row_to_transfer(row: &rusqlite::Row) -> rusqlite::Result<TransferRow> {
        Ok(TransferRow {
            id: row.get("id")?,
            txhash: row.get("txhash")?,
            value: row.get("value")?,
            network: row.get("network")?,
            currency: row.get("currency")?,
            to_address: row.get("to_address")?,
            block_height: row.get("block_height")?,
            confirmed: row.get("confirmed")?,
            swept: row.get("swept")?,
        })
    }

    // Synchronous helper methods for the trait implementations

    fn find_wallet_sync(&self, uhash: &str) -> Result<Option<WalletRecord>, StorageError> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT * FROM wallets WHERE uhash = ?1",
            params![uhash],
            |row| Self::row_to_wallet(row),
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    fn create_wallet_sync(&self, uhash: &str, private_key: &str) -> Result<WalletRecord, StorageError> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO wallets (private_key, uhash, created_at) VALUES (?1, ?2, ?3)",
            params![private_key, uhash, now()],
        )
        .map_err(|e| Self::map_insert_error(e, uhash))?;

        Ok(WalletRecord {
            id: conn.last_insert_rowid(),
            private_key: private_key.to_string(),
            uhash: uhash.to_string(),
        })
    }

    fn find_address_sync(&self, wallet_id: i64, coin: &str) -> Result<Option<AddressRecord>, StorageError> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT * FROM addresses WHERE wallet_id = ?1 AND coin = ?2",
            params![wallet_id, coin],
            |row| Self::row_to_address(row),
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    fn create_address_sync(
        &self,
        wallet_id: i64,
        coin: &str,
        address: &str,
    ) -> Result<AddressRecord, StorageError> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO addresses (address, coin, wallet_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![address, coin, wallet_id, now()],
        )
        .map_err(|e| Self::map_insert_error(e, &format!("{}/{}", wallet_id, coin)))?;

        Ok(AddressRecord {
            id: conn.last_insert_rowid(),
            address: address.to_string(),
            coin: coin.to_string(),
            wallet_id,
        })
    }

    fn find_owner_sync(&self, address: &str) -> Result<Option<AddressOwner>, StorageError> {
        let conn = self.conn()?;

        conn.query_row(
            r#"
            SELECT a.id AS id, a.address AS address, a.coin AS coin, a.wallet_id AS wallet_id,
                   w.private_key AS private_key, w.uhash AS uhash
            FROM addresses a
            JOIN wallets w ON w.id = a.wallet_id
            WHERE a.address = ?1
            ORDER BY a.id ASC
            LIMIT 1
            "#,
            params![address],
            |row| {
                let address = Self::row_to_address(row)?;
                let wallet = WalletRecord {
                    id: address.wallet_id,
                    private_key: row.get("private_key")?,
                    uhash: row.get("uhash")?,
                };
                Ok(AddressOwner { address, wallet })
            },
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    fn insert_transfer_sync(&self, transfer: &NewTransfer) -> Result<PendingTransfer, StorageError> {
        let conn = self.conn()?;
        let ts = now();

        conn.execute(
            r#"
            INSERT INTO transfers (
                txhash, value, network, currency, to_address, block_height,
                confirmed, swept, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, ?7, ?7)
            "#,
            params![
                transfer.txhash,
                transfer.value.to_string(),
                transfer.network,
                transfer.currency,
                transfer.to_address,
                transfer.block_height.map(|h| h as i64),
                ts,
            ],
        )
        .map_err(|e| Self::map_insert_error(e, &transfer.txhash))?;

        Ok(PendingTransfer {
            id: conn.last_insert_rowid(),
            txhash: transfer.txhash.clone(),
            value: transfer.value,
            network: transfer.network.clone(),
            currency: transfer.currency.clone(),
            to_address: transfer.to_address.clone(),
            block_height: transfer.block_height,
            confirmed: false,
            swept: false,
        })
    }

    fn list_transfers_sync(
        &self,
        currencies: &[String],
        filter: &str,
    ) -> Result<Vec<PendingTransfer>, StorageError> {
        if currencies.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn()?;
        let placeholders = vec!["?"; currencies.len()].join(", ");
        let sql = format!(
            "SELECT * FROM transfers WHERE {} AND currency IN ({}) ORDER BY id ASC",
            filter, placeholders
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params_from_iter(currencies.iter()), |row| Self::row_to_transfer(row))
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        rows.into_iter().map(PendingTransfer::try_from).collect()
    }

    fn mark_confirmed_sync(&self, txhash: &str) -> Result<bool, StorageError> {
        let conn = self.conn()?;

        let rows_affected = conn
            .execute(
                "UPDATE transfers SET confirmed = 1, updated_at = ?2 WHERE txhash = ?1 AND confirmed = 0",
                params![txhash, now()],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        if rows_affected == 1 {
            return Ok(true);
        }

        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM transfers WHERE txhash = ?1",
                params![txhash],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        match exists {
            Some(_) => Ok(false),
            None => Err(StorageError::NotFound(txhash.to_string())),
        }
    }

    fn mark_swept_sync(&self, txhash: &str) -> Result<(), StorageError> {
        let conn = self.conn()?;

        let rows_affected = conn
            .execute(
                "UPDATE transfers SET swept = 1, updated_at = ?2 WHERE txhash = ?1",
                params![txhash, now()],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        if rows_affected == 0 {
            return Err(StorageError::NotFound(txhash.to_string()));
        }

        Ok(())
    }

    fn load_checkpoint_sync(&self, network: &str) -> Result<Option<u64>, StorageError> {
        let conn = self.conn()?;

        let height: Option<i64> = conn
            .query_row(
                "SELECT height FROM checkpoints WHERE network = ?1",
                params![network],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(height.map(|h| h as u64))
    }

    fn save_checkpoint_sync(&self, network: &str, height: u64) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO checkpoints (network, height, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(network) DO UPDATE SET height = excluded.height, updated_at = excluded.updated_at
            "#,
            params![network, height as i64, now()],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }
}

/// Raw `transfers` row; `value` is stored as decimal text
struct TransferRow {
    id: i64,
    txhash: String,
    value: String,
    network: String,
    currency: String,
    to_address: String,
    block_height: Option<i64>,
    confirmed: bool,
    swept: bool,
}

impl TryFrom<TransferRow> for PendingTransfer {
    type Error = StorageError;

    fn try_from(row: TransferRow) -> Result<Self, Self::Error> {
        let value = row.value.parse::<u128>().map_err(|_| {
            StorageError::InvalidData(format!("transfer {} value {:?}", row.txhash, row.value))
        })?;

        Ok(PendingTransfer {
            id: row.id,
            txhash: row.txhash,
            value,
            network: row.network,
            currency: row.currency,
            to_address: row.to_address,
            block_height: row.block_height.map(|h| h as u64),
            confirmed: row.confirmed,
            swept: row.swept,
        })
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl CustodyStore for SqliteCustodyStore {
    async fn find_wallet(&self, uhash: &str) -> StorageResult<Option<WalletRecord>> {
        self.find_wallet_sync(uhash)
    }

    async fn create_wallet(&self, uhash: &str, private_key: &str) -> StorageResult<WalletRecord> {
        self.create_wallet_sync(uhash, private_key)
    }

    async fn find_address(&self, wallet_id: i64, coin: &str) -> StorageResult<Option<AddressRecord>> {
        self.find_address_sync(wallet_id, coin)
    }

    async fn create_address(
        &self,
        wallet_id: i64,
        coin: &str,
        address: &str,
    ) -> StorageResult<AddressRecord> {
        self.create_address_sync(wallet_id, coin, address)
    }

    async fn find_owner(&self, address: &str) -> StorageResult<Option<AddressOwner>> {
        self.find_owner_sync(address)
    }

    async fn insert_transfer(&self, transfer: &NewTransfer) -> StorageResult<PendingTransfer> {
        self.insert_transfer_sync(transfer)
    }

    async fn list_unconfirmed(&self, currencies: &[String]) -> StorageResult<Vec<PendingTransfer>> {
        self.list_transfers_sync(currencies, "confirmed = 0")
    }

    async fn mark_confirmed(&self, txhash: &str) -> StorageResult<bool> {
        self.mark_confirmed_sync(txhash)
    }

    async fn list_unswept(&self, currencies: &[String]) -> StorageResult<Vec<PendingTransfer>> {
        self.list_transfers_sync(currencies, "confirmed = 1 AND swept = 0")
    }

    async fn mark_swept(&self, txhash: &str) -> StorageResult<()> {
        self.mark_swept_sync(txhash)
    }

    async fn load_checkpoint(&self, network: &str) -> StorageResult<Option<u64>> {
        self.load_checkpoint_sync(network)
    }

    async fn save_checkpoint(&self, network: &str, height: u64) -> StorageResult<()> {
        self.save_checkpoint_sync(network, height)
    }
}
