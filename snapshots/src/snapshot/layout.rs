use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use glob::glob;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use super::MetaData;
use crate::constants::layout::{METADATA_FILE, METADATA_TMP_FILE};
use crate::errors::SnapshotError;
use crate::ledger::Table;

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub folder: String,
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub meta: MetaData,
}

/// One snapshot folder inside a network's snapshot directory
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    path: PathBuf,
}

impl SnapshotDir {
    pub fn new(network_dir: impl AsRef<Path>, folder: &str) -> Self {
        Self {
            path: network_dir.as_ref().join(folder),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table_path(&self, table: Table) -> PathBuf {
        self.path.join(table.name())
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.path.join(METADATA_FILE)
    }

    /// Create the folder for a new dump. A folder that already holds a
    /// descriptor is a finished snapshot and is never reused.
    pub async fn create(&self) -> Result<()> {
        if fs::try_exists(self.metadata_path()).await? {
            return Err(SnapshotError::integrity(format!(
                "snapshot {} already exists",
                self.path.display()
            ))
            .into());
        }

        if fs::try_exists(&self.path).await? {
            warn!(
                "Reusing incomplete snapshot directory {} (no {})",
                self.path.display(),
                METADATA_FILE
            );
        }

        fs::create_dir_all(&self.path)
            .await
            .map_err(|e| anyhow!("Failed to create snapshot directory {}: {}", self.path.display(), e))?;
        debug!("Snapshot directory ready: {}", self.path.display());
        Ok(())
    }

    /// Write the descriptor through a temporary file so it appears atomically
    pub async fn write_metadata(&self, meta: &MetaData) -> Result<()> {
        let content = serde_json::to_vec_pretty(meta)?;
        let tmp_path = self.path.join(METADATA_TMP_FILE);

        fs::write(&tmp_path, content)
            .await
            .map_err(|e| anyhow!("Failed to write {}: {}", tmp_path.display(), e))?;
        fs::rename(&tmp_path, self.metadata_path()).await?;

        info!("✓ Metadata written for snapshot {}", meta.folder);
        Ok(())
    }

    pub async fn read_metadata(&self) -> Result<MetaData> {
        let path = self.metadata_path();
        if !fs::try_exists(&path).await? {
            return Err(SnapshotError::not_found(format!(
                "snapshot metadata {} (incomplete or missing snapshot)",
                path.display()
            ))
            .into());
        }

        let content = fs::read(&path)
            .await
            .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;
        let meta: MetaData = serde_json::from_slice(&content)
            .map_err(|e| anyhow!("Failed to parse {}: {}", path.display(), e))?;
        Ok(meta)
    }

    async fn size_bytes(&self) -> Result<u64> {
        let mut total = fs::metadata(self.metadata_path()).await?.len();
        for table in Table::ALL {
            if let Ok(metadata) = fs::metadata(self.table_path(table)).await {
                total += metadata.len();
            }
        }
        Ok(total)
    }

    /// All complete snapshots of a network, newest (highest end height) first
    pub async fn list(network_dir: impl AsRef<Path>) -> Result<Vec<SnapshotInfo>> {
        let network_dir = network_dir.as_ref();
        let pattern = format!("{}/*/{}", network_dir.display(), METADATA_FILE);

        let mut snapshots = Vec::new();
        for entry in glob(&pattern).map_err(|e| anyhow!("Glob pattern error: {}", e))? {
            let meta_path = entry.map_err(|e| anyhow!("Glob entry error: {}", e))?;
            let Some(folder) = meta_path
                .parent()
                .and_then(|dir| dir.file_name())
                .and_then(|name| name.to_str())
            else {
                continue;
            };

            let dir = SnapshotDir::new(network_dir, folder);
            let meta = match dir.read_metadata().await {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("Skipping snapshot {}: {}", folder, e);
                    continue;
                }
            };

            let modified = fs::metadata(&meta_path).await?.modified()?;
            snapshots.push(SnapshotInfo {
                folder: folder.to_string(),
                path: dir.path().display().to_string(),
                created_at: DateTime::<Utc>::from(modified),
                size_bytes: dir.size_bytes().await?,
                meta,
            });
        }

        snapshots.sort_by(|a, b| b.meta.blocks.end_height.cmp(&a.meta.blocks.end_height));
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::TableStats;
    use tempfile::TempDir;

    fn meta(start: u64, end: u64) -> MetaData {
        let blocks = TableStats {
            count: end - start + 1,
            start_height: start,
            end_height: end,
        };
        MetaData::new("testnet", "default", false, blocks, 0, 0)
    }

    #[tokio::test]
    async fn test_missing_metadata_is_not_found() {
        let root = TempDir::new().unwrap();
        let dir = SnapshotDir::new(root.path(), "1-10");
        dir.create().await.unwrap();

        let err = dir.read_metadata().await.unwrap_err();
        assert!(matches!(
            SnapshotError::find(&err),
            Some(SnapshotError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_finished_snapshot_is_not_reused() {
        let root = TempDir::new().unwrap();
        let dir = SnapshotDir::new(root.path(), "1-10");
        dir.create().await.unwrap();
        dir.write_metadata(&meta(1, 10)).await.unwrap();

        assert_eq!(dir.read_metadata().await.unwrap(), meta(1, 10));
        assert!(dir.create().await.is_err());
    }

    #[tokio::test]
    async fn test_list_skips_incomplete_and_sorts_newest_first() {
        let root = TempDir::new().unwrap();

        for (start, end) in [(1, 10), (1, 30), (1, 20)] {
            let dir = SnapshotDir::new(root.path(), &format!("{}-{}", start, end));
            dir.create().await.unwrap();
            dir.write_metadata(&meta(start, end)).await.unwrap();
        }
        SnapshotDir::new(root.path(), "1-40").create().await.unwrap();

        let listed = SnapshotDir::list(root.path()).await.unwrap();
        let folders: Vec<&str> = listed.iter().map(|s| s.folder.as_str()).collect();
        assert_eq!(folders, vec!["1-30", "1-20", "1-10"]);
    }
}
