//! Custody Engine launcher
//!
//! Run modes:
//!   custody-engine run                          - Start every adapter (and the ops API if configured)
//!   custody-engine new-address --coin C --uhash U - Issue one deposit address
//!   custody-engine currencies                   - Print the configured catalog
//!
//! Configuration comes from the environment (see `EngineConfig::from_env`)
//! and the network file it points to.

use clap::{Parser, Subcommand};
use custody_engine::common::logging::{init_from_config, log_system_event};
use custody_engine::{api, CustodyStore, EngineConfig, EventBus, NetworksFile, Registry, SqliteCustodyStore};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "custody-engine")]
#[command(about = "Multi-chain custodial deposit and withdrawal engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the watchers, sweepers and the optional ops API
    Run {
        /// Ops API port (overrides CUSTODY_API_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Issue (or look up) the deposit address of a user
    NewAddress {
        /// Coin id, e.g. USDT_ETH_ETH
        #[arg(short, long)]
        coin: String,

        /// User identifier
        #[arg(short, long)]
        uhash: String,
    },

    /// Print every configured currency with its decimals
    Currencies,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let mut config = EngineConfig::from_env()?;
    init_from_config(&config)?;

    match cli.command {
        Commands::Run { port } => {
            if port.is_some() {
                config.api_port = port;
            }
            run(config).await?;
        }
        Commands::NewAddress { coin, uhash } => {
            new_address(config, &coin, &uhash).await?;
        }
        Commands::Currencies => {
            print_currencies(config)?;
        }
    }

    Ok(())
}

fn build_registry(config: &EngineConfig) -> Result<Registry, Box<dyn std::error::Error>> {
    if let Some(parent) = std::path::Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let store: Arc<dyn CustodyStore> = Arc::new(SqliteCustodyStore::new(&config.db_path)?);
    let networks = NetworksFile::load(&config.networks_path)?;

    Ok(Registry::from_config(config, &networks, store, EventBus::default())?)
}

/// Start the engine and block until Ctrl+C
async fn run(config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.print_summary();

    let registry = Arc::new(build_registry(&config)?);
    log_system_event("*", "engine_starting", None);

    let mut handles = registry.start_all();

    if let Some(port) = config.api_port {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = api::serve(registry, port).await {
                log_system_event("*", "api_stopped", Some(&e.to_string()));
            }
        }));
    }

    println!("Watching {} network(s): {}", registry.networks().len(), registry.networks().join(", "));
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    log_system_event("*", "engine_stopping", None);

    for handle in handles {
        handle.abort();
    }

    Ok(())
}

/// Address issuance needs no chain access, so the catalog is merged directly
async fn new_address(config: EngineConfig, coin: &str, uhash: &str) -> Result<(), Box<dyn std::error::Error>> {
    let registry = build_registry(&config)?;
    for network in registry.networks() {
        registry.merge_catalog(&network).await;
    }

    let issued = registry.issue_address(coin, uhash).await?;
    println!("{}", serde_json::to_string_pretty(&issued)?);
    Ok(())
}

fn print_currencies(config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = build_registry(&config)?;

    for network in registry.networks() {
        let Some(adapter) = registry.adapter(&network) else {
            continue;
        };
        println!("{} ({:?})", network, adapter.family());
        for (currency, decimals) in adapter.list_currencies() {
            println!("  {:<24} {} decimals", currency, decimals);
        }
    }

    Ok(())
}
