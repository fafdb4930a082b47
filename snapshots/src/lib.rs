// File: snapshots/src/lib.rs
//! Snapshot engine for the ledger tables of a node.
//!
//! A snapshot is a folder `<start>-<end>` under the network's snapshot
//! directory holding one file per table plus a `meta.json` descriptor.
//! [`SnapshotService`] dumps the `blocks`, `transactions` and `rounds`
//! tables into such a folder, restores them back, verifies a folder record by
//! record and truncates the ledger.

pub mod chain;
pub mod codec;
pub mod config;
pub mod constants;
pub mod database;
pub mod errors;
pub mod jobs;
pub mod ledger;
pub mod pipeline;
pub mod progress;
pub mod service;
pub mod snapshot;

pub use chain::{BlockFactory, ChainBlock, ChainVerifier, GenesisFix, LinkVerifier, Sha256BlockFactory};
pub use codec::{Codec, CodecRegistry};
pub use config::{Config, ConfigManager, NetworkConfig};
pub use database::{Database, LedgerStore};
pub use errors::SnapshotError;
pub use ledger::{Block, Record, Round, RoundInfo, Table, Transaction};
pub use progress::{ProgressReporter, ProgressSink, TracingProgressSink};
pub use service::{DumpOptions, SnapshotService};
pub use snapshot::{MetaData, SnapshotInfo, TableStats};
