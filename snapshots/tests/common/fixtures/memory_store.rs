//! In-memory ledger store for service tests

use anyhow::{anyhow, Result};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use snapshots::{Block, LedgerStore, Round, RoundInfo, SnapshotError, Table, Transaction};

use super::chain_data::ChainData;

#[derive(Default)]
struct State {
    blocks: BTreeMap<u64, Block>,
    transactions: Vec<Transaction>,
    rounds: Vec<Round>,
    /// Every bulk save in call order: (table, chunk size)
    saves: Vec<(Table, usize)>,
    failing_cursor: Option<Table>,
    /// Rows that land in the ledger once the blocks cursor is opened
    late_rows: Option<ChainData>,
}

/// Clones share state. Saving a transaction whose block is missing, or
/// deleting a block that still has transactions, fails like a foreign key.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain(data: &ChainData) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock().unwrap();
            state.blocks = data.blocks.iter().map(|b| (b.height, b.clone())).collect();
            state.transactions = data.transactions.clone();
            state.rounds = data.rounds.clone();
        }
        store
    }

    /// Make the cursor of `table` fail after its first row
    pub fn fail_cursor(&self, table: Table) {
        self.state.lock().unwrap().failing_cursor = Some(table);
    }

    /// Append `rows` when the blocks cursor is opened, as if the node kept
    /// forging while a dump streams
    pub fn grow_on_stream(&self, rows: ChainData) {
        self.state.lock().unwrap().late_rows = Some(rows);
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.state.lock().unwrap().blocks.values().cloned().collect()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        sorted_transactions(&self.state.lock().unwrap().transactions)
    }

    pub fn rounds(&self) -> Vec<Round> {
        sorted_rounds(&self.state.lock().unwrap().rounds)
    }

    pub fn save_sizes(&self, table: Table) -> Vec<usize> {
        self.state
            .lock()
            .unwrap()
            .saves
            .iter()
            .filter(|(t, _)| *t == table)
            .map(|(_, size)| *size)
            .collect()
    }

    pub fn save_order(&self) -> Vec<Table> {
        self.state.lock().unwrap().saves.iter().map(|(t, _)| *t).collect()
    }

    fn cursor<T: Send + 'static>(&self, table: Table, rows: Vec<T>) -> BoxStream<'static, Result<T>> {
        let failing = self.state.lock().unwrap().failing_cursor == Some(table);
        let mut items: Vec<Result<T>> = rows.into_iter().map(Ok).collect();
        if failing {
            items.truncate(1);
            items.push(Err(anyhow!("cursor for {} interrupted", table)));
        }
        stream::iter(items).boxed()
    }
}

fn sorted_transactions(transactions: &[Transaction]) -> Vec<Transaction> {
    let mut sorted = transactions.to_vec();
    sorted.sort_by_key(|t| (t.timestamp, t.block_height, t.sequence));
    sorted
}

fn sorted_rounds(rounds: &[Round]) -> Vec<Round> {
    let mut sorted = rounds.to_vec();
    sorted.sort_by(|a, b| (a.round, &a.public_key).cmp(&(b.round, &b.public_key)));
    sorted
}

impl LedgerStore for MemoryStore {
    async fn count(&self, table: Table) -> Result<u64> {
        let state = self.state.lock().unwrap();
        let count = match table {
            Table::Blocks => state.blocks.len(),
            Table::Transactions => state.transactions.len(),
            Table::Rounds => state.rounds.len(),
        };
        Ok(count as u64)
    }

    async fn first_block(&self) -> Result<Option<Block>> {
        Ok(self.state.lock().unwrap().blocks.values().next().cloned())
    }

    async fn last_block(&self) -> Result<Option<Block>> {
        Ok(self.state.lock().unwrap().blocks.values().next_back().cloned())
    }

    async fn clear(&self, table: Table) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match table {
            Table::Blocks => {
                return Err(SnapshotError::integrity("blocks must be deleted row by row").into())
            }
            Table::Transactions => state.transactions.clear(),
            Table::Rounds => state.rounds.clear(),
        }
        Ok(())
    }

    async fn delete_blocks_from(&self, height: u64) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        if state.transactions.iter().any(|t| t.block_height >= height) {
            return Err(anyhow!("FOREIGN KEY constraint failed"));
        }
        let removed = state.blocks.split_off(&height);
        Ok(removed.len() as u64)
    }

    fn stream_blocks(&self) -> BoxStream<'_, Result<Block>> {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(late) = state.late_rows.take() {
                state.blocks.extend(late.blocks.into_iter().map(|b| (b.height, b)));
                state.transactions.extend(late.transactions);
            }
        }
        let rows = self.blocks();
        self.cursor(Table::Blocks, rows)
    }

    fn stream_transactions(&self) -> BoxStream<'_, Result<Transaction>> {
        let rows = self.transactions();
        self.cursor(Table::Transactions, rows)
    }

    fn stream_rounds(&self) -> BoxStream<'_, Result<Round>> {
        let rows = self.rounds();
        self.cursor(Table::Rounds, rows)
    }

    async fn save_blocks(&self, blocks: Vec<Block>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.saves.push((Table::Blocks, blocks.len()));
        for block in blocks {
            if state.blocks.contains_key(&block.height) {
                return Err(anyhow!("UNIQUE constraint failed: blocks.height {}", block.height));
            }
            state.blocks.insert(block.height, block);
        }
        Ok(())
    }

    async fn save_transactions(&self, transactions: Vec<Transaction>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.saves.push((Table::Transactions, transactions.len()));
        for transaction in transactions {
            let parent_exists = state
                .blocks
                .get(&transaction.block_height)
                .is_some_and(|b| b.id == transaction.block_id);
            if !parent_exists {
                return Err(anyhow!(
                    "FOREIGN KEY constraint failed: transaction {} references block {}",
                    transaction.id,
                    transaction.block_id
                ));
            }
            state.transactions.push(transaction);
        }
        Ok(())
    }

    async fn save_rounds(&self, rounds: Vec<Round>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.saves.push((Table::Rounds, rounds.len()));
        state.rounds.extend(rounds);
        Ok(())
    }

    async fn rollback_to_round(&self, round_info: &RoundInfo) -> Result<()> {
        let last_height = round_info.last_height();
        let mut state = self.state.lock().unwrap();
        state.rounds.retain(|r| r.round <= round_info.round);
        state.transactions.retain(|t| t.block_height <= last_height);
        let _ = state.blocks.split_off(&(last_height + 1));
        Ok(())
    }
}
