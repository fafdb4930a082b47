// File: snapshots/src/config/manager.rs
use super::{Config, NetworkConfig};
use anyhow::{anyhow, Result};
use glob::glob;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

use crate::codec::CodecRegistry;

pub struct ConfigManager {
    current_config: Arc<Config>,
}

impl ConfigManager {
    pub async fn new(config_dir: String) -> Result<Self> {
        let config = Self::load_configuration(&config_dir).await?;
        Ok(Self {
            current_config: Arc::new(config),
        })
    }

    pub fn get_current_config(&self) -> Arc<Config> {
        self.current_config.clone()
    }

    async fn load_configuration(config_dir: &str) -> Result<Config> {
        let main_config_path = format!("{}/main.toml", config_dir);
        let main_config_content = fs::read_to_string(&main_config_path).await
            .map_err(|e| anyhow!("Failed to read main config {}: {}", main_config_path, e))?;

        let mut config: Config = toml::from_str(&main_config_content)
            .map_err(|e| anyhow!("Failed to parse main config: {}", e))?;

        // Every other *.toml file describes one network, named after the file
        let pattern = format!("{}/*.toml", config_dir);
        let mut networks = HashMap::new();

        for entry in glob(&pattern).map_err(|e| anyhow!("Glob pattern error: {}", e))? {
            let path = entry.map_err(|e| anyhow!("Glob entry error: {}", e))?;
            let filename = path.file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| anyhow!("Invalid filename"))?;

            if filename == "main.toml" {
                continue;
            }

            let network_name = filename.strip_suffix(".toml")
                .ok_or_else(|| anyhow!("Invalid config filename: {}", filename))?;

            debug!("Loading network config: {}", path.display());

            let content = fs::read_to_string(&path).await
                .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;

            let mut network: NetworkConfig = toml::from_str(&content)
                .map_err(|e| anyhow!("Failed to parse {}: {}", path.display(), e))?;
            network.name = network_name.to_string();

            networks.insert(network_name.to_string(), network);
        }

        config.networks = networks;
        Self::validate_configuration(&config)?;

        info!(
            "Loaded configuration for network '{}' ({} networks known, codec '{}', chunk size {})",
            config.network,
            config.networks.len(),
            config.codec,
            config.chunk_size
        );

        Ok(config)
    }

    fn validate_configuration(config: &Config) -> Result<()> {
        if config.chunk_size == 0 {
            return Err(anyhow!("chunk_size must be greater than zero"));
        }

        if !CodecRegistry::names().contains(&config.codec.as_str()) {
            return Err(anyhow!(
                "Unknown codec '{}' (available: {})",
                config.codec,
                CodecRegistry::names().join(", ")
            ));
        }

        let network = config.active_network()?;
        if network.genesis_block.height != 1 {
            return Err(anyhow!(
                "Genesis block of network '{}' must have height 1, found {}",
                network.name,
                network.genesis_block.height
            ));
        }

        Ok(())
    }
}
