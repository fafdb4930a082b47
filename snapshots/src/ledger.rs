//! Ledger row types for the three snapshotted tables.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::SnapshotError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Blocks,
    Transactions,
    Rounds,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Blocks, Table::Transactions, Table::Rounds];

    /// Table name; also the file name inside a snapshot folder
    pub fn name(&self) -> &'static str {
        match self {
            Table::Blocks => "blocks",
            Table::Transactions => "transactions",
            Table::Rounds => "rounds",
        }
    }

    /// Column the dump cursor orders by
    pub fn ordering_column(&self) -> &'static str {
        match self {
            Table::Blocks => "height",
            Table::Transactions => "timestamp",
            Table::Rounds => "round",
        }
    }

    pub(crate) fn tag(&self) -> u8 {
        match self {
            Table::Blocks => 1,
            Table::Transactions => 2,
            Table::Rounds => 3,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Table {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocks" => Ok(Table::Blocks),
            "transactions" => Ok(Table::Transactions),
            "rounds" => Ok(Table::Rounds),
            other => Err(SnapshotError::configuration(format!(
                "unknown table '{}'",
                other
            ))),
        }
    }
}

/// A row of one of the snapshotted tables
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const TABLE: Table;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub version: u32,
    pub timestamp: u64,
    pub previous_block: Option<String>,
    pub height: u64,
    pub number_of_transactions: u32,
    pub total_amount: u64,
    pub total_fee: u64,
    pub reward: u64,
    pub payload_length: u32,
    pub payload_hash: String,
    pub generator_public_key: String,
    pub block_signature: String,
}

impl Record for Block {
    const TABLE: Table = Table::Blocks;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub version: u32,
    pub block_id: String,
    pub block_height: u64,
    pub sequence: u32,
    pub timestamp: u64,
    pub sender_public_key: String,
    pub recipient_id: Option<String>,
    pub type_group: u32,
    pub type_id: u32,
    pub vendor_field: Option<String>,
    pub amount: u64,
    pub fee: u64,
    pub serialized: Vec<u8>,
    /// Type-specific payload as a JSON document
    pub asset: Option<String>,
}

impl Record for Transaction {
    const TABLE: Table = Table::Transactions;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub public_key: String,
    pub balance: u64,
    pub round: u64,
}

impl Record for Round {
    const TABLE: Table = Table::Rounds;
}

/// Position of a height inside the fixed-size delegate rounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundInfo {
    pub round: u64,
    /// First height of the round
    pub round_height: u64,
    pub next_round: u64,
    pub max_delegates: u64,
}

impl RoundInfo {
    pub fn from_height(height: u64, max_delegates: u64) -> Self {
        let max_delegates = max_delegates.max(1);
        let round = height.saturating_sub(1) / max_delegates + 1;

        Self {
            round,
            round_height: (round - 1) * max_delegates + 1,
            next_round: round + 1,
            max_delegates,
        }
    }

    /// Last height that still belongs to this round
    pub fn last_height(&self) -> u64 {
        self.round_height + self.max_delegates - 1
    }
}
