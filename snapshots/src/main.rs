// File: snapshots/src/main.rs
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use snapshots::{
    ConfigManager, Database, DumpOptions, LinkVerifier, ProgressReporter, RoundInfo,
    Sha256BlockFactory, SnapshotService,
};

#[derive(Parser)]
#[command(name = "snapshots")]
#[command(version, about = "Dump, restore and verify ledger snapshots")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding main.toml and the network files
    #[arg(short, long, global = true, default_value = "config")]
    config: String,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump the ledger tables into a new snapshot folder
    Dump {
        /// Network folder to write into (defaults to the configured network)
        #[arg(short, long)]
        network: Option<String>,

        /// Codec name (defaults to the configured codec)
        #[arg(long)]
        codec: Option<String>,

        /// Write plain files instead of gzip
        #[arg(long)]
        skip_compression: bool,
    },

    /// Wipe the ledger and load a snapshot into it
    Restore {
        /// Snapshot folder, e.g. 1-1000
        folder: String,
    },

    /// Check a snapshot record by record without touching the ledger
    Verify {
        /// Snapshot folder, e.g. 1-1000
        folder: String,

        #[arg(short, long)]
        network: Option<String>,
    },

    /// Delete every row of the ledger tables
    Truncate,

    /// Roll the chain back to the end of the round containing a height
    Rollback {
        #[arg(long)]
        height: u64,
    },

    /// List complete snapshots, newest first
    List {
        #[arg(short, long)]
        network: Option<String>,
    },

    /// Show the chain tip
    LastBlock,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    let env_filter = EnvFilter::from_default_env()
        .add_directive(format!("snapshots={}", level).parse()?)
        .add_directive("sqlx=warn".parse()?);

    fmt().with_env_filter(env_filter).init();

    info!("Starting snapshot tool v{}", env!("CARGO_PKG_VERSION"));

    let config_manager = ConfigManager::new(cli.config.clone()).await?;
    let config = config_manager.get_current_config();
    info!(
        "Configuration loaded: network '{}', {} networks known",
        config.network,
        config.networks.len()
    );

    let database = Database::new(&config.database_path).await?;
    info!("Database initialized");

    let mut service = SnapshotService::new(
        config.clone(),
        database,
        Arc::new(Sha256BlockFactory),
        Arc::new(LinkVerifier),
        ProgressReporter::default(),
    );

    let result = run(&mut service, cli.command, &config.network).await;
    if let Err(e) = &result {
        error!("Command failed: {:#}", e);
    }
    result
}

async fn run(
    service: &mut SnapshotService<Database>,
    command: Commands,
    active_network: &str,
) -> Result<()> {
    match command {
        Commands::Dump {
            network,
            codec,
            skip_compression,
        } => {
            let codec = codec.unwrap_or_else(|| service.codec().to_string());
            let skip_compression = skip_compression || service.skip_compression();
            service.init(Some(&codec), Some(skip_compression));
            let meta = service
                .dump(DumpOptions {
                    network,
                    skip_compression: None,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }

        Commands::Restore { folder } => {
            let meta = service.read_metadata(active_network, &folder).await?;
            service.restore(&meta).await?;
            println!("✓ Restored snapshot {}", meta.folder);
        }

        Commands::Verify { folder, network } => {
            let network = network.as_deref().unwrap_or(active_network);
            let meta = service.read_metadata(network, &folder).await?;
            service.verify(&meta).await?;
            println!("✓ Snapshot {} is valid", meta.folder);
        }

        Commands::Truncate => {
            service.truncate().await?;
            println!("✓ Ledger truncated");
        }

        Commands::Rollback { height } => {
            let max_delegates = service.config().active_network()?.max_delegates;
            let round_info = RoundInfo::from_height(height, max_delegates);
            let tip = service.rollback_chain(&round_info).await?;
            println!(
                "✓ Rolled back to round {}, tip {} at height {}",
                round_info.round,
                tip.id(),
                tip.height()
            );
        }

        Commands::List { network } => {
            let network = network.as_deref().unwrap_or(active_network);
            let snapshots = service.list_snapshots(network).await?;
            if snapshots.is_empty() {
                println!("No snapshots for network '{}'", network);
            }
            for snapshot in snapshots {
                println!(
                    "{}  blocks={} transactions={} rounds={} codec={} size={}B created={}",
                    snapshot.folder,
                    snapshot.meta.blocks.count,
                    snapshot.meta.transactions.count,
                    snapshot.meta.rounds.count,
                    snapshot.meta.codec,
                    snapshot.size_bytes,
                    snapshot.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
        }

        Commands::LastBlock => {
            let tip = service.get_last_block().await?;
            println!(
                "height={} id={} timestamp={} consistent={}",
                tip.height(),
                tip.id(),
                tip.data.timestamp,
                tip.is_id_consistent()
            );
        }
    }

    Ok(())
}
