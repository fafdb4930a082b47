//! Central repository for snapshot engine constants
//!
//! Organized by category so limits and defaults have a single source of truth.

/// Snapshot file format
pub mod codec {
    /// Magic bytes at the start of every table file
    pub const MAGIC: &[u8; 4] = b"LSNP";

    /// Bumped whenever the frame layout changes
    pub const FORMAT_VERSION: u8 = 1;

    /// Upper bound for a single encoded record
    pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;
}

/// Snapshot directory layout
pub mod layout {
    /// Metadata descriptor written once all table files are complete
    pub const METADATA_FILE: &str = "meta.json";

    /// Scratch name used while the descriptor is written
    pub const METADATA_TMP_FILE: &str = "meta.json.tmp";
}

/// Stream pipeline tuning
pub mod pipeline {
    /// Records buffered between the async side and a blocking codec thread
    pub const CHANNEL_CAPACITY: usize = 256;

    /// Buffer size of the file reader/writer at the end of each pipeline
    pub const IO_BUFFER_BYTES: usize = 64 * 1024;

    /// Fixed gzip member header written for every table file: no flags,
    /// zero mtime, default level, unknown OS. The gzip CRC does not cover
    /// these bytes, so readers compare them verbatim.
    pub const GZIP_HEADER: [u8; 10] = [0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0x00, 0xff];
}

/// Default configuration values
pub mod defaults {
    /// Records per bulk save during restore
    pub const CHUNK_SIZE: usize = 1000;

    /// Delegates per round when the network config does not say otherwise
    pub const MAX_DELEGATES: u64 = 51;

    pub const SNAPSHOTS_PATH: &str = "data/snapshots";

    pub const DATABASE_PATH: &str = "data/ledger.db";
}

/// Progress reporting
pub mod progress {
    /// Log a progress line every this many records per table
    pub const LOG_INTERVAL: u64 = 10_000;
}
