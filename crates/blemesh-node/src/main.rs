// ============================================
// File: crates/blemesh-node/src/main.rs
// ============================================
//! # Mesh Node Entry Point
//!
//! ## Creation Reason
//! Command-line binary running one mesh node over the UDP bearer.
//!
//! ## Main Functionality
//! - CLI argument parsing with clap
//! - Logging initialization with tracing
//! - Configuration loading and validation
//! - Key inspection (NID, Network ID, AID)
//! - Node execution until Ctrl+C
//!
//! ## Usage
//! ```bash
//! blemesh-node start -c node.toml
//! blemesh-node validate -c node.toml
//! blemesh-node keys -c node.toml
//! blemesh-node --log-level debug start
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `RUST_LOG` wins over `--log-level` and `node.log_level`
//! - Without `node.store_path` all configuration is lost on exit
//!
//! ## Last Modified
//! v0.1.0 - Initial CLI implementation

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use blemesh_bearer::traits::Persistence;
use blemesh_bearer::{JsonFileStore, MemoryStore, UdpBearer};
use blemesh_core::crypto::{kdf, NetworkKeys};
use blemesh_node::{MeshNode, NodeConfig, NodeNotification};

// ============================================
// CLI Definition
// ============================================

/// Mesh security and relay node
#[derive(Parser, Debug)]
#[command(name = "blemesh-node")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log filter, overrides `node.log_level`
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the node
    Start {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/blemesh/node.toml")]
        config: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/blemesh/node.toml")]
        config: PathBuf,
    },

    /// Show identifiers derived from the configured and stored keys
    Keys {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/blemesh/node.toml")]
        config: PathBuf,
    },
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start { config } => cmd_start(config, cli.log_level).await,
        Commands::Validate { config } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            cmd_validate(config).await
        }
        Commands::Keys { config } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            cmd_keys(config).await
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

// ============================================
// Commands
// ============================================

/// Starts the node.
async fn cmd_start(config_path: PathBuf, log_level: Option<String>) -> anyhow::Result<()> {
    let config = load_or_default_config(&config_path).await?;
    init_logging(log_level.as_deref().unwrap_or(&config.node.log_level));

    let bearer = Arc::new(
        UdpBearer::bind_addr(config.bearer.bind_addr, config.bearer.peers.clone()).await?,
    );
    let store: Arc<dyn Persistence> = match &config.node.store_path {
        Some(path) => Arc::new(JsonFileStore::open(path).await?),
        None => {
            info!("No store_path configured, state is kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    info!("════════════════════════════════════════");
    info!("Primary:    {:#06x}", config.provisioning.unicast_address);
    info!("Elements:   {}", config.composition.elements.len());
    info!("Bearer:     {}", bearer.local_addr());
    info!("Peers:      {}", config.bearer.peers.len());
    info!("════════════════════════════════════════");

    let node = MeshNode::new(config, bearer, store).await?;
    let handle = node.handle();

    let mut notifications = handle.subscribe();
    tokio::spawn(async move {
        while let Ok(notification) = notifications.recv().await {
            match notification {
                NodeNotification::Heartbeat(report) => info!(
                    src = %report.src,
                    dst = %report.dst,
                    hops = report.hops,
                    "Heartbeat received"
                ),
                other => info!(?other, "Node notification"),
            }
        }
    });

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_handle.shutdown();
        }
    });

    node.run().await?;
    Ok(())
}

/// Validates configuration file.
async fn cmd_validate(config_path: PathBuf) -> anyhow::Result<()> {
    if !config_path.exists() {
        println!("⚠️  Config file not found: {}", config_path.display());
        println!("   Node will use default values.");
        return Ok(());
    }

    let config = NodeConfig::load(&config_path).await?;

    println!("✅ Configuration is valid");
    println!();
    println!("Node:");
    println!("   Primary:    {:#06x}", config.provisioning.unicast_address);
    println!("   Elements:   {}", config.composition.elements.len());
    println!(
        "   Provisioned: {}",
        if config.provisioning.net_key.is_some() { "yes" } else { "no" }
    );
    println!();
    println!("Bearer:");
    println!("   Bind:       {}", config.bearer.bind_addr);
    println!("   Peers:      {}", config.bearer.peers.len());
    println!();
    println!("Features:");
    println!("   Relay:      {:?}", config.features.relay);
    println!("   Default TTL: {}", config.features.default_ttl);
    println!();
    println!("Limits:");
    println!("   Subnets:    {}", config.limits.subnets);
    println!("   AppKeys:    {}", config.limits.app_keys);
    println!("   Replay:     {}", config.limits.replay_list);
    println!();

    Ok(())
}

/// Prints NID and Network ID of the NetKey and the AID of stored AppKeys.
async fn cmd_keys(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load_or_default_config(&config_path).await?;

    println!();
    match &config.provisioning.net_key {
        Some(_) => {
            let keys = NetworkKeys::derive(&config.provisioning.net_key()?);
            println!("NetKey {:#05x}:", config.provisioning.net_key_index);
            println!("   NID:        {:#04x}", keys.nid);
            println!("   Network ID: {}", hex::encode(keys.network_id));
        }
        None => println!("NetKey:       not configured"),
    }

    if let Some(path) = &config.node.store_path {
        let stored = JsonFileStore::open(path).await?.load().await?;
        for subnet in &stored.subnets {
            let keys = NetworkKeys::derive(&blemesh_core::crypto::Key128::from_bytes(subnet.key));
            println!(
                "Stored NetKey {:#05x}: NID {:#04x}, Network ID {}",
                subnet.net_idx,
                keys.nid,
                hex::encode(keys.network_id)
            );
        }
        for app in &stored.app_keys {
            println!(
                "Stored AppKey {:#05x} (NetKey {:#05x}): AID {:#04x}",
                app.app_idx,
                app.net_idx,
                kdf::k4(&app.key)
            );
        }
    }
    println!();

    Ok(())
}

// ============================================
// Helper Functions
// ============================================

/// Initializes the tracing subscriber.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .ok();
}

/// Loads config or returns default when the file does not exist.
async fn load_or_default_config(path: &Path) -> anyhow::Result<NodeConfig> {
    if path.exists() {
        Ok(NodeConfig::load(path).await?)
    } else {
        Ok(NodeConfig::default())
    }
}
