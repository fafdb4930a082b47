//! Storage layer for the ledger tables.
//!
//! [`LedgerStore`] is the capability set the snapshot engine needs from
//! storage: counts, ordered cursors, bulk saves, clear/delete and rollback.
//! [`Database`] implements it on SQLite.
//!
//! The module is organized into submodules:
//! - `blocks` - Block table operations
//! - `transactions` - Transaction table operations
//! - `rounds` - Round table operations

mod blocks;
mod rounds;
mod transactions;

use anyhow::{Context, Result};
use futures::stream::BoxStream;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, error, info};

use crate::errors::SnapshotError;
use crate::ledger::{Block, Round, RoundInfo, Table, Transaction};

/// Storage operations consumed by the snapshot engine. Cursors yield rows in
/// ascending order of the table's ordering column.
pub trait LedgerStore: Send + Sync {
    fn count(&self, table: Table) -> impl Future<Output = Result<u64>> + Send;

    fn first_block(&self) -> impl Future<Output = Result<Option<Block>>> + Send;

    fn last_block(&self) -> impl Future<Output = Result<Option<Block>>> + Send;

    /// Bulk delete; only allowed on tables nothing references
    fn clear(&self, table: Table) -> impl Future<Output = Result<()>> + Send;

    /// Row-level delete of every block at or above `height`
    fn delete_blocks_from(&self, height: u64) -> impl Future<Output = Result<u64>> + Send;

    fn stream_blocks(&self) -> BoxStream<'_, Result<Block>>;

    fn stream_transactions(&self) -> BoxStream<'_, Result<Transaction>>;

    fn stream_rounds(&self) -> BoxStream<'_, Result<Round>>;

    fn save_blocks(&self, blocks: Vec<Block>) -> impl Future<Output = Result<()>> + Send;

    fn save_transactions(
        &self,
        transactions: Vec<Transaction>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn save_rounds(&self, rounds: Vec<Round>) -> impl Future<Output = Result<()>> + Send;

    /// Drop everything after the last height of `round_info`
    fn rollback_to_round(&self, round_info: &RoundInfo) -> impl Future<Output = Result<()>> + Send;
}

pub struct Database {
    pool: Pool<Sqlite>,
}

/// Read an INTEGER column into an unsigned field, rejecting values it cannot hold
fn unsigned<T>(row: &SqliteRow, column: &str) -> Result<T>
where
    T: TryFrom<i64>,
    T::Error: std::error::Error + Send + Sync + 'static,
{
    let value: i64 = row.try_get(column)?;
    T::try_from(value)
        .with_context(|| format!("column {} holds out of range value {}", column, value))
}

impl Database {
    /// Expose pool for integration test queries
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn new(database_path: &str) -> Result<Self> {
        info!("Opening ledger database: {}", database_path);

        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", database_path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = match SqlitePoolOptions::new().connect_with(options).await {
            Ok(pool) => pool,
            Err(e) => {
                error!("FAILED to connect to database {}: {}", database_path, e);
                return Err(e.into());
            }
        };

        let database = Self { pool };
        database.initialize_tables().await?;

        info!("Ledger database ready");
        Ok(database)
    }

    async fn initialize_tables(&self) -> Result<()> {
        debug!("Creating blocks table...");
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blocks (
                id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                previous_block TEXT,
                height INTEGER NOT NULL UNIQUE,
                number_of_transactions INTEGER NOT NULL,
                total_amount INTEGER NOT NULL,
                total_fee INTEGER NOT NULL,
                reward INTEGER NOT NULL,
                payload_length INTEGER NOT NULL,
                payload_hash TEXT NOT NULL,
                generator_public_key TEXT NOT NULL,
                block_signature TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("Creating transactions table...");
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                block_id TEXT NOT NULL REFERENCES blocks(id),
                block_height INTEGER NOT NULL,
                sequence INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                sender_public_key TEXT NOT NULL,
                recipient_id TEXT,
                type_group INTEGER NOT NULL,
                type INTEGER NOT NULL,
                vendor_field TEXT,
                amount INTEGER NOT NULL,
                fee INTEGER NOT NULL,
                serialized BLOB NOT NULL,
                asset TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transactions_timestamp ON transactions(timestamp, block_height, sequence)",
        )
        .execute(&self.pool)
        .await?;

        debug!("Creating rounds table...");
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rounds (
                public_key TEXT NOT NULL,
                balance INTEGER NOT NULL,
                round INTEGER NOT NULL,
                PRIMARY KEY (round, public_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn count_rows(&self, table: Table) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(u64::try_from(count)?)
    }

    pub async fn clear_table(&self, table: Table) -> Result<()> {
        if table == Table::Blocks {
            return Err(SnapshotError::integrity(
                "blocks are referenced by transactions and must be deleted row by row",
            )
            .into());
        }

        let sql = format!("DELETE FROM {}", table.name());
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        debug!("Cleared {} rows from {}", result.rows_affected(), table);
        Ok(())
    }

    /// Drop rounds after `round` and every block and transaction above
    /// `height` in one SQL transaction
    pub async fn rollback_after(&self, round: u64, height: u64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let rounds = sqlx::query("DELETE FROM rounds WHERE round > ?")
            .bind(round as i64)
            .execute(&mut *tx)
            .await?;
        let transactions = sqlx::query("DELETE FROM transactions WHERE block_height > ?")
            .bind(height as i64)
            .execute(&mut *tx)
            .await?;
        let blocks = sqlx::query("DELETE FROM blocks WHERE height > ?")
            .bind(height as i64)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(
            "Rolled back to round {} (height {}): removed {} blocks, {} transactions and {} round entries",
            round,
            height,
            blocks.rows_affected(),
            transactions.rows_affected(),
            rounds.rows_affected()
        );
        Ok(())
    }
}

impl LedgerStore for Database {
    async fn count(&self, table: Table) -> Result<u64> {
        self.count_rows(table).await
    }

    async fn first_block(&self) -> Result<Option<Block>> {
        self.get_first_block().await
    }

    async fn last_block(&self) -> Result<Option<Block>> {
        self.get_last_block().await
    }

    async fn clear(&self, table: Table) -> Result<()> {
        self.clear_table(table).await
    }

    async fn delete_blocks_from(&self, height: u64) -> Result<u64> {
        self.delete_blocks_from_height(height).await
    }

    fn stream_blocks(&self) -> BoxStream<'_, Result<Block>> {
        self.blocks_by_height()
    }

    fn stream_transactions(&self) -> BoxStream<'_, Result<Transaction>> {
        self.transactions_by_timestamp()
    }

    fn stream_rounds(&self) -> BoxStream<'_, Result<Round>> {
        self.rounds_by_round()
    }

    async fn save_blocks(&self, blocks: Vec<Block>) -> Result<()> {
        self.insert_blocks(&blocks).await
    }

    async fn save_transactions(&self, transactions: Vec<Transaction>) -> Result<()> {
        self.insert_transactions(&transactions).await
    }

    async fn save_rounds(&self, rounds: Vec<Round>) -> Result<()> {
        self.insert_rounds(&rounds).await
    }

    async fn rollback_to_round(&self, round_info: &RoundInfo) -> Result<()> {
        self.rollback_after(round_info.round, round_info.last_height()).await
    }
}
