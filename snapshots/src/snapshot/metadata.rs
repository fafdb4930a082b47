use serde::{Deserialize, Serialize};

use crate::ledger::Table;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStats {
    pub count: u64,
    pub start_height: u64,
    pub end_height: u64,
}

/// Descriptor of one snapshot. Transactions and rounds carry the block
/// table's height span, not their own extents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaData {
    pub blocks: TableStats,
    pub transactions: TableStats,
    pub rounds: TableStats,
    pub folder: String,
    pub skip_compression: bool,
    pub network: String,
    pub package_version: String,
    pub codec: String,
}

pub fn folder_name(start_height: u64, end_height: u64) -> String {
    format!("{}-{}", start_height, end_height)
}

impl MetaData {
    pub fn new(
        network: impl Into<String>,
        codec: impl Into<String>,
        skip_compression: bool,
        blocks: TableStats,
        transaction_count: u64,
        round_count: u64,
    ) -> Self {
        let span = |count| TableStats {
            count,
            start_height: blocks.start_height,
            end_height: blocks.end_height,
        };

        Self {
            blocks,
            transactions: span(transaction_count),
            rounds: span(round_count),
            folder: folder_name(blocks.start_height, blocks.end_height),
            skip_compression,
            network: network.into(),
            package_version: env!("CARGO_PKG_VERSION").to_string(),
            codec: codec.into(),
        }
    }

    pub fn stats(&self, table: Table) -> &TableStats {
        match table {
            Table::Blocks => &self.blocks,
            Table::Transactions => &self.transactions,
            Table::Rounds => &self.rounds,
        }
    }

    pub fn stats_mut(&mut self, table: Table) -> &mut TableStats {
        match table {
            Table::Blocks => &mut self.blocks,
            Table::Transactions => &mut self.transactions,
            Table::Rounds => &mut self.rounds,
        }
    }
}
