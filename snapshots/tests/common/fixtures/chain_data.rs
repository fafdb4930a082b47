//! Linked chain data for tests

use snapshots::{Block, NetworkConfig, Round, Sha256BlockFactory, Transaction};

pub const NETWORK: &str = "testnet";

/// Id stored for the genesis block in the source ledger; differs from the
/// id computed from the genesis definition
pub const STALE_GENESIS_ID: &str = "stale-genesis-id";

pub const MAX_DELEGATES: u64 = 4;

pub fn genesis_definition() -> Block {
    Block {
        id: String::new(),
        version: 0,
        timestamp: 0,
        previous_block: None,
        height: 1,
        number_of_transactions: 0,
        total_amount: 12_500_000_000_000_000,
        total_fee: 0,
        reward: 0,
        payload_length: 0,
        payload_hash: "e3b0c44298fc1c149afbf4c8996fb924".to_string(),
        generator_public_key: "03genesis".to_string(),
        block_signature: "3045genesis".to_string(),
    }
}

pub fn network_config() -> NetworkConfig {
    NetworkConfig {
        name: NETWORK.to_string(),
        max_delegates: MAX_DELEGATES,
        genesis_block: genesis_definition(),
    }
}

pub fn computed_genesis_id() -> String {
    Sha256BlockFactory::compute_id(&genesis_definition()).unwrap()
}

#[derive(Debug, Clone, Default)]
pub struct ChainData {
    pub blocks: Vec<Block>,
    pub transactions: Vec<Transaction>,
    pub rounds: Vec<Round>,
}

/// Build `block_count` linked blocks with `transactions_per_block`
/// transactions each (genesis included) and the rounds covering them.
/// The genesis block carries [`STALE_GENESIS_ID`].
pub fn build_chain(block_count: u64, transactions_per_block: u32) -> ChainData {
    let mut data = ChainData::default();
    let mut previous: Option<String> = None;

    for height in 1..=block_count {
        let mut block = if height == 1 {
            genesis_definition()
        } else {
            Block {
                id: String::new(),
                version: 0,
                timestamp: height * 8,
                previous_block: previous.clone(),
                height,
                number_of_transactions: transactions_per_block,
                total_amount: 0,
                total_fee: 0,
                reward: 200_000_000,
                payload_length: transactions_per_block * 32,
                payload_hash: format!("payload-{:08}", height),
                generator_public_key: delegate_key((height - 1) % MAX_DELEGATES),
                block_signature: format!("3045sig{:08}", height),
            }
        };
        block.number_of_transactions = transactions_per_block;
        block.id = if height == 1 {
            STALE_GENESIS_ID.to_string()
        } else {
            Sha256BlockFactory::compute_id(&block).unwrap()
        };

        for sequence in 0..transactions_per_block {
            data.transactions.push(transaction(&block, sequence));
        }

        previous = Some(block.id.clone());
        data.blocks.push(block);
    }

    let round_count = block_count.div_ceil(MAX_DELEGATES);
    for round in 1..=round_count {
        for delegate in 0..MAX_DELEGATES {
            data.rounds.push(Round {
                public_key: delegate_key(delegate),
                balance: 1_000_000 * (delegate + 1),
                round,
            });
        }
    }

    data
}

pub fn delegate_key(index: u64) -> String {
    format!("02delegate{:04}", index)
}

fn transaction(block: &Block, sequence: u32) -> Transaction {
    Transaction {
        id: format!("tx-{:08}-{:04}", block.height, sequence),
        version: 2,
        block_id: block.id.clone(),
        block_height: block.height,
        sequence,
        timestamp: block.timestamp,
        sender_public_key: delegate_key(sequence as u64 % MAX_DELEGATES),
        recipient_id: Some(format!("Addr{:04}", sequence)),
        type_group: 1,
        type_id: 0,
        vendor_field: (sequence % 2 == 0).then(|| "memo".to_string()),
        amount: 100 + sequence as u64,
        fee: 10_000_000,
        serialized: vec![0xff, block.height as u8, sequence as u8],
        asset: None,
    }
}
