//! Block table operations.

use anyhow::Result;
use futures::stream::{BoxStream, StreamExt};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, error};

use super::{unsigned, Database};
use crate::ledger::Block;

/// Column list shared by every block query
macro_rules! block_columns {
    () => {
        "id, version, timestamp, previous_block, height, number_of_transactions, \
         total_amount, total_fee, reward, payload_length, payload_hash, generator_public_key, \
         block_signature"
    };
}

fn block_from_row(row: &SqliteRow) -> Result<Block> {
    Ok(Block {
        id: row.try_get("id")?,
        version: unsigned(row, "version")?,
        timestamp: unsigned(row, "timestamp")?,
        previous_block: row.try_get("previous_block")?,
        height: unsigned(row, "height")?,
        number_of_transactions: unsigned(row, "number_of_transactions")?,
        total_amount: unsigned(row, "total_amount")?,
        total_fee: unsigned(row, "total_fee")?,
        reward: unsigned(row, "reward")?,
        payload_length: unsigned(row, "payload_length")?,
        payload_hash: row.try_get("payload_hash")?,
        generator_public_key: row.try_get("generator_public_key")?,
        block_signature: row.try_get("block_signature")?,
    })
}

impl Database {
    pub async fn get_first_block(&self) -> Result<Option<Block>> {
        let row = sqlx::query(concat!(
            "SELECT ",
            block_columns!(),
            " FROM blocks ORDER BY height ASC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(block_from_row).transpose()
    }

    pub async fn get_last_block(&self) -> Result<Option<Block>> {
        let row = sqlx::query(concat!(
            "SELECT ",
            block_columns!(),
            " FROM blocks ORDER BY height DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(block_from_row).transpose()
    }

    pub fn blocks_by_height(&self) -> BoxStream<'_, Result<Block>> {
        sqlx::query(concat!("SELECT ", block_columns!(), " FROM blocks ORDER BY height ASC"))
            .fetch(&self.pool)
            .map(|row| row.map_err(anyhow::Error::from).and_then(|row| block_from_row(&row)))
            .boxed()
    }

    pub async fn insert_blocks(&self, blocks: &[Block]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for block in blocks {
            let result = sqlx::query(concat!(
                "INSERT INTO blocks (",
                block_columns!(),
                ") VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(&block.id)
            .bind(block.version as i64)
            .bind(block.timestamp as i64)
            .bind(&block.previous_block)
            .bind(block.height as i64)
            .bind(block.number_of_transactions as i64)
            .bind(block.total_amount as i64)
            .bind(block.total_fee as i64)
            .bind(block.reward as i64)
            .bind(block.payload_length as i64)
            .bind(&block.payload_hash)
            .bind(&block.generator_public_key)
            .bind(&block.block_signature)
            .execute(&mut *tx)
            .await;

            if let Err(e) = result {
                error!("Failed to insert block {} at height {}: {}", block.id, block.height, e);
                return Err(e.into());
            }
        }

        tx.commit().await?;
        debug!("Inserted {} blocks", blocks.len());
        Ok(())
    }

    pub async fn delete_blocks_from_height(&self, height: u64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM blocks WHERE height >= ?")
            .bind(height as i64)
            .execute(&self.pool)
            .await?;

        debug!("Deleted {} blocks from height {}", result.rows_affected(), height);
        Ok(result.rows_affected())
    }
}
