// File: snapshots/src/snapshot/mod.rs

//! On-disk snapshot layout and its metadata descriptor
//!
//! A snapshot is a directory named after the block height span it covers:
//!
//! ```text
//! <snapshots_path>/<network>/<start>-<end>/
//!     blocks
//!     transactions
//!     rounds
//!     meta.json
//! ```
//!
//! `meta.json` is written last, after every table file is complete, so a
//! directory without it is an interrupted dump and never a valid snapshot.

pub mod layout;
pub mod metadata;

pub use layout::{SnapshotDir, SnapshotInfo};
pub use metadata::{folder_name, MetaData, TableStats};
