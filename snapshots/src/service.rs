//! Snapshot orchestrator: dump, restore, verify and truncate the ledger tables
//!
//! # Ordering
//!
//! - **dump / verify**: the three tables run concurrently; the first failure
//!   fails the whole operation and the remaining jobs are dropped.
//! - **restore**: always a full wipe first, then `blocks` alone, then
//!   `transactions` and `rounds` concurrently. Dependents reference blocks, so
//!   blocks must be complete before either starts.
//!
//! A failed restore can leave the ledger empty or holding only part of the
//! blocks table. Nothing is retried here.

use anyhow::{Context, Result};
use futures::future::{self, try_join, try_join3};
use futures::stream::{StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio::fs;
use tracing::{error, info, instrument, warn};

use crate::chain::{BlockFactory, ChainBlock, ChainVerifier, GenesisFix};
use crate::codec::{Codec, CodecRegistry, DEFAULT_CODEC};
use crate::config::{Config, NetworkConfig};
use crate::database::LedgerStore;
use crate::errors::SnapshotError;
use crate::jobs::TableJob;
use crate::ledger::{Block, Round, RoundInfo, Table, Transaction};
use crate::pipeline::PipelineBuilder;
use crate::progress::ProgressReporter;
use crate::snapshot::{MetaData, SnapshotDir, SnapshotInfo, TableStats};

#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    /// Defaults to the configured network
    pub network: Option<String>,
    /// Defaults to the value set through [`SnapshotService::init`]
    pub skip_compression: Option<bool>,
}

/// Codecs for all three tables, resolved before any stream is opened
#[derive(Debug, Clone, Copy)]
struct TableCodecs {
    blocks: Codec,
    transactions: Codec,
    rounds: Codec,
}

impl TableCodecs {
    fn resolve(codec_name: &str) -> Result<Self, SnapshotError> {
        Ok(Self {
            blocks: CodecRegistry::resolve(codec_name, Table::Blocks)?,
            transactions: CodecRegistry::resolve(codec_name, Table::Transactions)?,
            rounds: CodecRegistry::resolve(codec_name, Table::Rounds)?,
        })
    }

    fn get(&self, table: Table) -> Codec {
        match table {
            Table::Blocks => self.blocks,
            Table::Transactions => self.transactions,
            Table::Rounds => self.rounds,
        }
    }
}

pub struct SnapshotService<S> {
    config: Arc<Config>,
    store: S,
    block_factory: Arc<dyn BlockFactory>,
    verifier: Arc<dyn ChainVerifier>,
    progress: ProgressReporter,
    codec: String,
    skip_compression: bool,
}

impl<S: LedgerStore> SnapshotService<S> {
    pub fn new(
        config: Arc<Config>,
        store: S,
        block_factory: Arc<dyn BlockFactory>,
        verifier: Arc<dyn ChainVerifier>,
        progress: ProgressReporter,
    ) -> Self {
        let codec = config.codec.clone();
        let skip_compression = config.skip_compression;

        Self {
            config,
            store,
            block_factory,
            verifier,
            progress,
            codec,
            skip_compression,
        }
    }

    /// Select the codec and compression used by later dumps. Missing values
    /// fall back to `"default"` and compression on.
    pub fn init(&mut self, codec: Option<&str>, skip_compression: Option<bool>) {
        self.codec = codec.unwrap_or(DEFAULT_CODEC).to_string();
        self.skip_compression = skip_compression.unwrap_or(false);
        info!(
            "Snapshot codec '{}', compression {}",
            self.codec,
            if self.skip_compression { "off" } else { "on" }
        );
    }

    pub fn codec(&self) -> &str {
        &self.codec
    }

    pub fn skip_compression(&self) -> bool {
        self.skip_compression
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// Empty all three tables, dependents first. Blocks are deleted row by
    /// row since they are the referenced parent.
    #[instrument(skip(self))]
    pub async fn truncate(&self) -> Result<()> {
        self.store.clear(Table::Transactions).await?;
        self.store.clear(Table::Rounds).await?;
        let deleted = self.store.delete_blocks_from(0).await?;

        info!("✓ Ledger tables truncated ({} blocks deleted)", deleted);
        Ok(())
    }

    /// Roll the chain back to the end of `round_info` and return the new tip
    #[instrument(skip(self, round_info), fields(round = round_info.round))]
    pub async fn rollback_chain(&self, round_info: &RoundInfo) -> Result<ChainBlock> {
        self.store.rollback_to_round(round_info).await?;

        let last = self.get_last_block().await?;
        info!("✓ Chain rolled back to height {}", last.height());
        Ok(last)
    }

    pub async fn get_last_block(&self) -> Result<ChainBlock> {
        let block = self
            .store
            .last_block()
            .await?
            .ok_or_else(|| SnapshotError::not_found("no block found"))?;

        self.block_factory.from_stored_data(block)
    }

    #[instrument(skip(self, options))]
    pub async fn dump(&self, options: DumpOptions) -> Result<MetaData> {
        let network = options
            .network
            .unwrap_or_else(|| self.config.network.clone());
        let skip_compression = options.skip_compression.unwrap_or(self.skip_compression);
        let codecs = TableCodecs::resolve(&self.codec)?;

        let mut meta = self.compute_metadata(network, skip_compression).await?;
        let dir = self.snapshot_dir(&meta);
        dir.create().await?;

        info!(
            "Starting dump of heights {}..{} to {} (codec '{}', compression {})",
            meta.blocks.start_height,
            meta.blocks.end_height,
            dir.path().display(),
            meta.codec,
            if skip_compression { "off" } else { "on" }
        );

        let job = |table: Table| {
            let pipeline = PipelineBuilder::new(dir.table_path(table), codecs.get(table))
                .compressed(!skip_compression);
            TableJob::new(pipeline, meta.stats(table).count, &self.progress)
        };

        // Rows above the counted tip belong to blocks added while streaming
        let end_height = meta.blocks.end_height;
        let blocks = self
            .store
            .stream_blocks()
            .try_filter(move |block| future::ready(block.height <= end_height))
            .boxed();
        let transactions = self
            .store
            .stream_transactions()
            .try_filter(move |transaction| future::ready(transaction.block_height <= end_height))
            .boxed();

        let written = try_join3(
            job(Table::Blocks).dump(blocks),
            job(Table::Transactions).dump(transactions),
            job(Table::Rounds).dump(self.store.stream_rounds()),
        )
        .await;

        let (blocks, transactions, rounds) = match written {
            Ok(counts) => counts,
            Err(e) => {
                error!(
                    "Dump of {} failed, snapshot left without metadata: {:#}",
                    meta.folder, e
                );
                return Err(e);
            }
        };

        for (table, written) in [
            (Table::Blocks, blocks),
            (Table::Transactions, transactions),
            (Table::Rounds, rounds),
        ] {
            let stats = meta.stats_mut(table);
            if stats.count != written {
                warn!(
                    "{} changed during dump: counted {}, wrote {}",
                    table, stats.count, written
                );
                stats.count = written;
            }
        }

        dir.write_metadata(&meta).await?;
        info!("✓ Snapshot {} created", meta.folder);
        Ok(meta)
    }

    async fn compute_metadata(&self, network: String, skip_compression: bool) -> Result<MetaData> {
        let first = self
            .store
            .first_block()
            .await?
            .ok_or_else(|| SnapshotError::not_found("no block found"))?;
        let last = self
            .store
            .last_block()
            .await?
            .ok_or_else(|| SnapshotError::not_found("no block found"))?;

        let blocks = TableStats {
            count: self.store.count(Table::Blocks).await?,
            start_height: first.height,
            end_height: last.height,
        };
        let transactions = self.store.count(Table::Transactions).await?;
        let rounds = self.store.count(Table::Rounds).await?;

        Ok(MetaData::new(
            network,
            self.codec.clone(),
            skip_compression,
            blocks,
            transactions,
            rounds,
        ))
    }

    /// Replace the ledger with the content of a snapshot
    #[instrument(skip(self, meta), fields(folder = %meta.folder))]
    pub async fn restore(&self, meta: &MetaData) -> Result<()> {
        if meta.network != self.config.network {
            return Err(SnapshotError::configuration(format!(
                "snapshot {} belongs to network '{}', this node runs '{}'",
                meta.folder, meta.network, self.config.network
            ))
            .into());
        }

        let codecs = TableCodecs::resolve(&meta.codec)?;
        let dir = self.snapshot_dir(meta);
        Self::ensure_table_files(&dir).await?;

        let pipeline = |table: Table| {
            PipelineBuilder::new(dir.table_path(table), codecs.get(table))
                .compressed(!meta.skip_compression)
        };
        let genesis = self.genesis_fix(meta, pipeline(Table::Blocks)).await?;
        let chunk_size = self.config.chunk_size;

        self.truncate().await?;

        let job =
            |table: Table| TableJob::new(pipeline(table), meta.stats(table).count, &self.progress);
        let store = &self.store;

        job(Table::Blocks)
            .restore(
                chunk_size,
                |block: &mut Block| genesis.apply_block(block),
                move |chunk: Vec<Block>| store.save_blocks(chunk),
            )
            .await?;

        try_join(
            job(Table::Transactions).restore(
                chunk_size,
                |transaction: &mut Transaction| genesis.apply_transaction(transaction),
                move |chunk: Vec<Transaction>| store.save_transactions(chunk),
            ),
            job(Table::Rounds).restore(
                chunk_size,
                |_: &mut Round| {},
                move |chunk: Vec<Round>| store.save_rounds(chunk),
            ),
        )
        .await?;

        info!("✓ Snapshot {} restored", meta.folder);
        Ok(())
    }

    /// Check every table of a snapshot record by record against its predecessor
    #[instrument(skip(self, meta), fields(folder = %meta.folder))]
    pub async fn verify(&self, meta: &MetaData) -> Result<()> {
        let codecs = TableCodecs::resolve(&meta.codec)?;
        let dir = self.snapshot_dir(meta);
        Self::ensure_table_files(&dir).await?;

        let pipeline = |table: Table| {
            PipelineBuilder::new(dir.table_path(table), codecs.get(table))
                .compressed(!meta.skip_compression)
        };
        let genesis = self.genesis_fix(meta, pipeline(Table::Blocks)).await?;

        let job =
            |table: Table| TableJob::new(pipeline(table), meta.stats(table).count, &self.progress);
        let verifier = self.verifier.as_ref();

        try_join3(
            job(Table::Blocks).verify(
                |block: &mut Block| genesis.apply_block(block),
                |current: &Block, previous: Option<&Block>| {
                    verifier.verify_block(current, previous)
                },
            ),
            job(Table::Transactions).verify(
                |transaction: &mut Transaction| genesis.apply_transaction(transaction),
                |current: &Transaction, previous: Option<&Transaction>| {
                    verifier.verify_transaction(current, previous)
                },
            ),
            job(Table::Rounds).verify(
                |_: &mut Round| {},
                |current: &Round, previous: Option<&Round>| {
                    verifier.verify_round(current, previous)
                },
            ),
        )
        .await?;

        info!("✓ Snapshot {} verified", meta.folder);
        Ok(())
    }

    pub async fn read_metadata(&self, network: &str, folder: &str) -> Result<MetaData> {
        SnapshotDir::new(self.config.network_snapshots_dir(network), folder)
            .read_metadata()
            .await
    }

    pub async fn list_snapshots(&self, network: &str) -> Result<Vec<SnapshotInfo>> {
        let network_dir = self.config.network_snapshots_dir(network);
        if !fs::try_exists(&network_dir).await? {
            return Ok(Vec::new());
        }
        SnapshotDir::list(network_dir).await
    }

    fn snapshot_dir(&self, meta: &MetaData) -> SnapshotDir {
        SnapshotDir::new(self.config.network_snapshots_dir(&meta.network), &meta.folder)
    }

    fn network_config(&self, network: &str) -> Result<&NetworkConfig> {
        self.config.networks.get(network).ok_or_else(|| {
            SnapshotError::configuration(format!("network '{}' is not configured", network))
                .into()
        })
    }

    async fn genesis_fix(&self, meta: &MetaData, blocks: PipelineBuilder) -> Result<GenesisFix> {
        let genesis = self
            .block_factory
            .from_genesis_definition(self.network_config(&meta.network)?)
            .context("Failed to build genesis block from network definition")?;

        let stored_id = Self::stored_genesis_id(blocks).await?;
        if let Some(stored_id) = &stored_id {
            if *stored_id != genesis.computed_id {
                info!(
                    "Snapshot {} stores genesis id {}, using {}",
                    meta.folder, stored_id, genesis.computed_id
                );
            }
        }
        Ok(GenesisFix::new(genesis.computed_id, stored_id))
    }

    /// Identifier the blocks file holds for height 1, if it starts there
    async fn stored_genesis_id(blocks: PipelineBuilder) -> Result<Option<String>> {
        let mut reader = blocks.into_reader::<Block>().await?;
        match reader.next().await {
            Some(first) => {
                let first = first?;
                Ok((first.height == 1).then_some(first.id))
            }
            None => Ok(None),
        }
    }

    async fn ensure_table_files(dir: &SnapshotDir) -> Result<()> {
        for table in Table::ALL {
            let path = dir.table_path(table);
            if !fs::try_exists(&path).await? {
                return Err(SnapshotError::not_found(format!(
                    "table file {}",
                    path.display()
                ))
                .into());
            }
        }
        Ok(())
    }
}
