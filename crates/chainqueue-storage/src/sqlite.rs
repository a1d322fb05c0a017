//! SQLite queue store for ChainQueue.
//!
//! Persists the queue, the latest-height marker, and every derived record to
//! a single SQLite file. Each block commit runs inside one `sqlx`
//! transaction, and every write is an `ON CONFLICT` upsert, so redelivering
//! a block never duplicates rows.
//!
//! # Usage
//! ```rust,no_run
//! use chainqueue_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./chainqueue.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainqueue_core::error::IngestError;
use chainqueue_core::store::{QueueStore, RecordReader};
use chainqueue_core::types::{BlockCommit, BlockRecord, QueueStats, QueueStatus, TransactionRecord};

const MARKER_KEY: &str = "latest_height";

/// SQLite-backed queue store and record reader.
pub struct SqliteStorage {
    pool: SqlitePool,
}

/// Connection-level failures mean the store is gone; everything else is a
/// statement error.
fn store_err(e: sqlx::Error) -> IngestError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Tls(_) => IngestError::StoreUnavailable(e.to_string()),
        other => IngestError::Storage(other.to_string()),
    }
}

fn commit_err(height: u64) -> impl Fn(sqlx::Error) -> IngestError {
    move |e| IngestError::CommitFailed {
        height,
        reason: e.to_string(),
    }
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./chainqueue.db"`) or a full
    /// SQLite URL (`"sqlite:./chainqueue.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IngestError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| IngestError::StoreUnavailable(e.to_string()))?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Uses a single connection so every query sees the same database.
    /// All data is lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, IngestError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| IngestError::StoreUnavailable(e.to_string()))?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IngestError> {
        const SCHEMA: &[&str] = &[
            "PRAGMA journal_mode=WAL;",
            "CREATE TABLE IF NOT EXISTS queue (
                height     INTEGER PRIMARY KEY,
                status     INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );",
            "CREATE INDEX IF NOT EXISTS idx_queue_status ON queue (status, height);",
            "CREATE TABLE IF NOT EXISTS meta (
                key   TEXT    PRIMARY KEY,
                value INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS blocks (
                number    INTEGER PRIMARY KEY,
                validator TEXT    NOT NULL,
                gas_used  INTEGER NOT NULL,
                size      INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                hash      TEXT    NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS transactions (
                block_number INTEGER NOT NULL,
                hash         TEXT    NOT NULL,
                from_address TEXT    NOT NULL,
                to_address   TEXT,
                value        TEXT    NOT NULL,
                gas          INTEGER NOT NULL,
                gas_price    TEXT    NOT NULL,
                input        TEXT    NOT NULL,
                nonce        INTEGER NOT NULL,
                PRIMARY KEY (block_number, hash)
            );",
            "CREATE TABLE IF NOT EXISTS block_txs (
                block_number INTEGER NOT NULL,
                tx_hash      TEXT    NOT NULL,
                position     INTEGER NOT NULL,
                PRIMARY KEY (block_number, tx_hash)
            );",
            "CREATE TABLE IF NOT EXISTS account_txs (
                account      TEXT    NOT NULL,
                tx_hash      TEXT    NOT NULL,
                block_number INTEGER NOT NULL,
                PRIMARY KEY (account, tx_hash)
            );",
            "CREATE INDEX IF NOT EXISTS idx_account_txs_order ON account_txs (account, block_number);",
            "CREATE TABLE IF NOT EXISTS account_order (
                account     TEXT    PRIMARY KEY,
                first_block INTEGER NOT NULL
            );",
            "CREATE INDEX IF NOT EXISTS idx_account_order_block ON account_order (first_block);",
            "CREATE TABLE IF NOT EXISTS global_txs (
                tx_hash   TEXT    PRIMARY KEY,
                timestamp INTEGER NOT NULL
            );",
            "CREATE INDEX IF NOT EXISTS idx_global_txs_ts ON global_txs (timestamp);",
        ];

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for SqliteStorage {
    async fn enqueue(&self, height: u64) -> Result<(), IngestError> {
        sqlx::query(
            "INSERT INTO queue (height, status, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(height) DO NOTHING",
        )
        .bind(height as i64)
        .bind(QueueStatus::Pending.as_i64())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn enqueue_range(&self, from: u64, to: u64) -> Result<(), IngestError> {
        if to < from {
            return Ok(());
        }
        let inserted = sqlx::query(
            "WITH RECURSIVE seq(h) AS (
                 SELECT ? UNION ALL SELECT h + 1 FROM seq WHERE h < ?
             )
             INSERT INTO queue (height, status, updated_at)
             SELECT h, ?, ? FROM seq WHERE true
             ON CONFLICT(height) DO NOTHING",
        )
        .bind(from as i64)
        .bind(to as i64)
        .bind(QueueStatus::Pending.as_i64())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(store_err)?
        .rows_affected();

        debug!(from, to, inserted, "range enqueued");
        Ok(())
    }

    async fn fetch_pending(&self, limit: usize) -> Result<Vec<u64>, IngestError> {
        let rows = sqlx::query("SELECT height FROM queue WHERE status = ? ORDER BY height LIMIT ?")
            .bind(QueueStatus::Pending.as_i64())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        Ok(rows
            .iter()
            .map(|row| row.get::<i64, _>("height") as u64)
            .collect())
    }

    async fn commit_block(&self, commit: &BlockCommit) -> Result<(), IngestError> {
        let height = commit.height;
        let on_err = commit_err(height);
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let b = &commit.block;
        sqlx::query(
            "INSERT INTO blocks (number, validator, gas_used, size, timestamp, hash)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(number) DO UPDATE SET
                 validator = excluded.validator,
                 gas_used  = excluded.gas_used,
                 size      = excluded.size,
                 timestamp = excluded.timestamp,
                 hash      = excluded.hash",
        )
        .bind(b.number as i64)
        .bind(&b.validator)
        .bind(b.gas_used as i64)
        .bind(b.size as i64)
        .bind(b.timestamp)
        .bind(&b.hash)
        .execute(&mut *tx)
        .await
        .map_err(&on_err)?;

        for t in &commit.transactions {
            sqlx::query(
                "INSERT INTO transactions
                     (block_number, hash, from_address, to_address, value, gas, gas_price, input, nonce)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(block_number, hash) DO UPDATE SET
                     from_address = excluded.from_address,
                     to_address   = excluded.to_address,
                     value        = excluded.value,
                     gas          = excluded.gas,
                     gas_price    = excluded.gas_price,
                     input        = excluded.input,
                     nonce        = excluded.nonce",
            )
            .bind(t.block_number as i64)
            .bind(&t.hash)
            .bind(&t.from)
            .bind(t.to.as_deref())
            .bind(&t.value)
            .bind(t.gas as i64)
            .bind(&t.gas_price)
            .bind(&t.input)
            .bind(t.nonce as i64)
            .execute(&mut *tx)
            .await
            .map_err(&on_err)?;
        }

        for e in &commit.block_txs {
            sqlx::query(
                "INSERT INTO block_txs (block_number, tx_hash, position) VALUES (?, ?, ?)
                 ON CONFLICT(block_number, tx_hash) DO UPDATE SET position = excluded.position",
            )
            .bind(height as i64)
            .bind(&e.tx_hash)
            .bind(e.position as i64)
            .execute(&mut *tx)
            .await
            .map_err(&on_err)?;
        }

        for e in &commit.account_txs {
            sqlx::query(
                "INSERT INTO account_txs (account, tx_hash, block_number) VALUES (?, ?, ?)
                 ON CONFLICT(account, tx_hash) DO UPDATE SET block_number = excluded.block_number",
            )
            .bind(&e.account)
            .bind(&e.tx_hash)
            .bind(e.block_number as i64)
            .execute(&mut *tx)
            .await
            .map_err(&on_err)?;
        }

        for e in &commit.account_order {
            sqlx::query(
                "INSERT INTO account_order (account, first_block) VALUES (?, ?)
                 ON CONFLICT(account) DO UPDATE SET
                     first_block = MIN(first_block, excluded.first_block)",
            )
            .bind(&e.account)
            .bind(e.block_number as i64)
            .execute(&mut *tx)
            .await
            .map_err(&on_err)?;
        }

        for e in &commit.global_txs {
            sqlx::query(
                "INSERT INTO global_txs (tx_hash, timestamp) VALUES (?, ?)
                 ON CONFLICT(tx_hash) DO UPDATE SET timestamp = excluded.timestamp",
            )
            .bind(&e.tx_hash)
            .bind(e.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(&on_err)?;
        }

        sqlx::query(
            "INSERT INTO queue (height, status, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(height) DO UPDATE SET
                 status     = excluded.status,
                 updated_at = excluded.updated_at",
        )
        .bind(height as i64)
        .bind(QueueStatus::Done.as_i64())
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .map_err(&on_err)?;

        tx.commit().await.map_err(&on_err)?;

        debug!(height, writes = commit.write_count(), "block committed");
        Ok(())
    }

    async fn status(&self, height: u64) -> Result<Option<QueueStatus>, IngestError> {
        let row = sqlx::query("SELECT status FROM queue WHERE height = ?")
            .bind(height as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        match row {
            None => Ok(None),
            Some(row) => {
                let tag: i64 = row.get("status");
                QueueStatus::from_i64(tag)
                    .map(Some)
                    .ok_or_else(|| IngestError::Storage(format!("unknown queue status {tag}")))
            }
        }
    }

    async fn queue_len(&self) -> Result<u64, IngestError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM queue")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    async fn queue_stats(&self) -> Result<QueueStats, IngestError> {
        let row = sqlx::query(
            "SELECT
                 COALESCE(SUM(CASE WHEN status = 0 THEN 1 ELSE 0 END), 0) AS pending,
                 COALESCE(SUM(CASE WHEN status = 1 THEN 1 ELSE 0 END), 0) AS done
             FROM queue",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(QueueStats {
            pending: row.get::<i64, _>("pending") as u64,
            done: row.get::<i64, _>("done") as u64,
        })
    }

    async fn latest_marker(&self) -> Result<Option<u64>, IngestError> {
        let row = sqlx::query("SELECT value FROM meta WHERE key = ?")
            .bind(MARKER_KEY)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        Ok(row.map(|r| r.get::<i64, _>("value") as u64))
    }

    async fn advance_marker(&self, height: u64) -> Result<(), IngestError> {
        sqlx::query(
            "INSERT INTO meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = MAX(value, excluded.value)",
        )
        .bind(MARKER_KEY)
        .bind(height as i64)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }
}

fn block_from_row(row: &sqlx::sqlite::SqliteRow) -> BlockRecord {
    BlockRecord {
        number: row.get::<i64, _>("number") as u64,
        validator: row.get("validator"),
        gas_used: row.get::<i64, _>("gas_used") as u64,
        size: row.get::<i64, _>("size") as u64,
        timestamp: row.get("timestamp"),
        hash: row.get("hash"),
    }
}

fn hashes(rows: Vec<sqlx::sqlite::SqliteRow>, column: &str) -> Vec<String> {
    rows.iter().map(|r| r.get::<String, _>(column)).collect()
}

#[async_trait]
impl RecordReader for SqliteStorage {
    async fn block(&self, height: u64) -> Result<Option<BlockRecord>, IngestError> {
        let row = sqlx::query("SELECT * FROM blocks WHERE number = ?")
            .bind(height as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.as_ref().map(block_from_row))
    }

    async fn latest_block(&self) -> Result<Option<BlockRecord>, IngestError> {
        let row = sqlx::query("SELECT * FROM blocks ORDER BY number DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.as_ref().map(block_from_row))
    }

    async fn transaction(
        &self,
        block_number: u64,
        hash: &str,
    ) -> Result<Option<TransactionRecord>, IngestError> {
        let row = sqlx::query("SELECT * FROM transactions WHERE block_number = ? AND hash = ?")
            .bind(block_number as i64)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        Ok(row.map(|r| TransactionRecord {
            hash: r.get("hash"),
            from: r.get("from_address"),
            to: r.get("to_address"),
            value: r.get("value"),
            gas: r.get::<i64, _>("gas") as u64,
            gas_price: r.get("gas_price"),
            input: r.get("input"),
            nonce: r.get::<i64, _>("nonce") as u64,
            block_number: r.get::<i64, _>("block_number") as u64,
        }))
    }

    async fn block_transactions(&self, block_number: u64) -> Result<Vec<String>, IngestError> {
        let rows = sqlx::query(
            "SELECT tx_hash FROM block_txs WHERE block_number = ? ORDER BY position, tx_hash",
        )
        .bind(block_number as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(hashes(rows, "tx_hash"))
    }

    async fn account_transactions(&self, account: &str) -> Result<Vec<String>, IngestError> {
        let rows = sqlx::query(
            "SELECT tx_hash FROM account_txs WHERE account = ? ORDER BY block_number, tx_hash",
        )
        .bind(account)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(hashes(rows, "tx_hash"))
    }

    async fn accounts(&self) -> Result<Vec<String>, IngestError> {
        let rows = sqlx::query("SELECT account FROM account_order ORDER BY first_block, account")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(hashes(rows, "account"))
    }

    async fn global_transactions(&self, limit: usize) -> Result<Vec<String>, IngestError> {
        let rows = sqlx::query(
            "SELECT tx_hash FROM global_txs ORDER BY timestamp DESC, tx_hash DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(hashes(rows, "tx_hash"))
    }
}
