// File: snapshots/src/config/mod.rs
pub mod manager;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
pub use manager::ConfigManager;

use crate::codec::DEFAULT_CODEC;
use crate::constants::defaults;
use crate::ledger::Block;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name of the active network; must match one of the network files
    pub network: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default)]
    pub skip_compression: bool,
    #[serde(default = "default_snapshots_path")]
    pub snapshots_path: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    // Populated from individual network config files
    #[serde(skip)]
    pub networks: HashMap<String, NetworkConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(skip)]
    pub name: String,
    #[serde(default = "default_max_delegates")]
    pub max_delegates: u64,
    /// Canonical genesis definition shipped with the network
    pub genesis_block: Block,
}

fn default_chunk_size() -> usize {
    defaults::CHUNK_SIZE
}

fn default_codec() -> String {
    DEFAULT_CODEC.to_string()
}

fn default_snapshots_path() -> String {
    defaults::SNAPSHOTS_PATH.to_string()
}

fn default_database_path() -> String {
    defaults::DATABASE_PATH.to_string()
}

fn default_max_delegates() -> u64 {
    defaults::MAX_DELEGATES
}

impl Config {
    /// Configuration with defaults for a single known network
    pub fn for_network(network: NetworkConfig, snapshots_path: impl Into<String>) -> Self {
        let mut networks = HashMap::new();
        let name = network.name.clone();
        networks.insert(name.clone(), network);

        Self {
            network: name,
            chunk_size: default_chunk_size(),
            codec: default_codec(),
            skip_compression: false,
            snapshots_path: snapshots_path.into(),
            database_path: default_database_path(),
            networks,
        }
    }

    pub fn active_network(&self) -> Result<&NetworkConfig> {
        self.networks
            .get(&self.network)
            .ok_or_else(|| anyhow!("Network '{}' is not configured", self.network))
    }

    /// Directory holding all snapshots of a network
    pub fn network_snapshots_dir(&self, network: &str) -> PathBuf {
        PathBuf::from(&self.snapshots_path).join(network)
    }
}
