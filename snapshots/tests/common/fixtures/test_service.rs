//! Service construction over a temporary snapshot directory

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use snapshots::{
    Config, MetaData, ProgressReporter, Sha256BlockFactory, SnapshotService, Table,
};

use super::chain_data::{network_config, NETWORK};
use super::memory_store::MemoryStore;
use super::recording::{RecordingSink, RecordingVerifier};

/// A service over a [`MemoryStore`] whose snapshots live in a temp dir that
/// is removed on drop
pub struct TestService {
    pub dir: TempDir,
    pub config: Arc<Config>,
    pub store: MemoryStore,
    pub sink: Arc<RecordingSink>,
    pub verifier: Arc<RecordingVerifier>,
    pub service: SnapshotService<MemoryStore>,
}

impl TestService {
    pub fn new(store: MemoryStore) -> Self {
        Self::build(store, RecordingVerifier::default(), None)
    }

    pub fn with_chunk_size(store: MemoryStore, chunk_size: usize) -> Self {
        Self::build(store, RecordingVerifier::default(), Some(chunk_size))
    }

    pub fn with_verifier(store: MemoryStore, verifier: RecordingVerifier) -> Self {
        Self::build(store, verifier, None)
    }

    fn build(store: MemoryStore, verifier: RecordingVerifier, chunk_size: Option<usize>) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = Config::for_network(network_config(), dir.path().to_string_lossy());
        if let Some(chunk_size) = chunk_size {
            config.chunk_size = chunk_size;
        }
        let config = Arc::new(config);

        let sink = Arc::new(RecordingSink::default());
        let verifier = Arc::new(verifier);
        let service = SnapshotService::new(
            config.clone(),
            store.clone(),
            Arc::new(Sha256BlockFactory),
            verifier.clone(),
            ProgressReporter::new(sink.clone()),
        );

        Self {
            dir,
            config,
            store,
            sink,
            verifier,
            service,
        }
    }

    /// Another service sharing this one's snapshot directory and config but
    /// backed by `store`
    pub fn service_for(&self, store: MemoryStore) -> SnapshotService<MemoryStore> {
        SnapshotService::new(
            self.config.clone(),
            store,
            Arc::new(Sha256BlockFactory),
            self.verifier.clone(),
            ProgressReporter::new(self.sink.clone()),
        )
    }

    pub fn snapshot_path(&self, meta: &MetaData) -> PathBuf {
        self.dir.path().join(&meta.network).join(&meta.folder)
    }

    pub fn table_file(&self, meta: &MetaData, table: Table) -> PathBuf {
        self.snapshot_path(meta).join(table.name())
    }

    pub fn network_dir(&self) -> PathBuf {
        self.dir.path().join(NETWORK)
    }
}

/// Flip one bit of the byte at `position` (clamped to the file)
pub fn corrupt_byte(path: &Path, position: usize) {
    let mut bytes = std::fs::read(path).expect("Failed to read table file");
    let position = position.min(bytes.len() - 1);
    bytes[position] ^= 0x20;
    std::fs::write(path, bytes).expect("Failed to write table file");
}
