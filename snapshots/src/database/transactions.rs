//! Transaction table operations.

use anyhow::Result;
use futures::stream::{BoxStream, StreamExt};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, error};

use super::{unsigned, Database};
use crate::ledger::Transaction;

fn transaction_from_row(row: &SqliteRow) -> Result<Transaction> {
    Ok(Transaction {
        id: row.try_get("id")?,
        version: unsigned(row, "version")?,
        block_id: row.try_get("block_id")?,
        block_height: unsigned(row, "block_height")?,
        sequence: unsigned(row, "sequence")?,
        timestamp: unsigned(row, "timestamp")?,
        sender_public_key: row.try_get("sender_public_key")?,
        recipient_id: row.try_get("recipient_id")?,
        type_group: unsigned(row, "type_group")?,
        type_id: unsigned(row, "type")?,
        vendor_field: row.try_get("vendor_field")?,
        amount: unsigned(row, "amount")?,
        fee: unsigned(row, "fee")?,
        serialized: row.try_get("serialized")?,
        asset: row.try_get("asset")?,
    })
}

impl Database {
    /// Cursor ordered by timestamp; block height and sequence break ties
    pub fn transactions_by_timestamp(&self) -> BoxStream<'_, Result<Transaction>> {
        sqlx::query(
            r#"
            SELECT id, version, block_id, block_height, sequence, timestamp,
                   sender_public_key, recipient_id, type_group, type, vendor_field,
                   amount, fee, serialized, asset
            FROM transactions
            ORDER BY timestamp ASC, block_height ASC, sequence ASC
            "#,
        )
        .fetch(&self.pool)
        .map(|row| {
            row.map_err(anyhow::Error::from)
                .and_then(|row| transaction_from_row(&row))
        })
        .boxed()
    }

    pub async fn insert_transactions(&self, transactions: &[Transaction]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for transaction in transactions {
            let result = sqlx::query(
                r#"
                INSERT INTO transactions (
                    id, version, block_id, block_height, sequence, timestamp,
                    sender_public_key, recipient_id, type_group, type, vendor_field,
                    amount, fee, serialized, asset
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&transaction.id)
            .bind(transaction.version as i64)
            .bind(&transaction.block_id)
            .bind(transaction.block_height as i64)
            .bind(transaction.sequence as i64)
            .bind(transaction.timestamp as i64)
            .bind(&transaction.sender_public_key)
            .bind(&transaction.recipient_id)
            .bind(transaction.type_group as i64)
            .bind(transaction.type_id as i64)
            .bind(&transaction.vendor_field)
            .bind(transaction.amount as i64)
            .bind(transaction.fee as i64)
            .bind(&transaction.serialized)
            .bind(&transaction.asset)
            .execute(&mut *tx)
            .await;

            if let Err(e) = result {
                error!(
                    "Failed to insert transaction {} (block {}): {}",
                    transaction.id, transaction.block_id, e
                );
                return Err(e.into());
            }
        }

        tx.commit().await?;
        debug!("Inserted {} transactions", transactions.len());
        Ok(())
    }
}
