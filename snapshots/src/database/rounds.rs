//! Round table operations.

use anyhow::Result;
use futures::stream::{BoxStream, StreamExt};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use super::{unsigned, Database};
use crate::ledger::Round;

fn round_from_row(row: &SqliteRow) -> Result<Round> {
    Ok(Round {
        public_key: row.try_get("public_key")?,
        balance: unsigned(row, "balance")?,
        round: unsigned(row, "round")?,
    })
}

impl Database {
    pub fn rounds_by_round(&self) -> BoxStream<'_, Result<Round>> {
        sqlx::query("SELECT public_key, balance, round FROM rounds ORDER BY round ASC, public_key ASC")
            .fetch(&self.pool)
            .map(|row| row.map_err(anyhow::Error::from).and_then(|row| round_from_row(&row)))
            .boxed()
    }

    pub async fn insert_rounds(&self, rounds: &[Round]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for round in rounds {
            sqlx::query("INSERT INTO rounds (public_key, balance, round) VALUES (?, ?, ?)")
                .bind(&round.public_key)
                .bind(round.balance as i64)
                .bind(round.round as i64)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        debug!("Inserted {} round entries", rounds.len());
        Ok(())
    }
}
