//! launchindex CLI: run the indexer and query what it has stored.
//!
//! # Commands
//! ```text
//! launchindex run                      --config launchindex.toml
//! launchindex status
//! launchindex tokens latest            [--limit N]
//! launchindex tokens top               [--hours 12] [--limit N]
//! launchindex tokens get               <address>
//! launchindex tokens transfers         <address> [--limit N]
//! launchindex convictions by-token     <address>
//! launchindex convictions by-owner     <address>
//! launchindex dead-letters             [--limit N]
//! launchindex check-config
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use launchindex_core::indexer::IndexerConfig;
use launchindex_core::store::{Store, TokenQueries, DEFAULT_QUERY_LIMIT, DEFAULT_TOP_WINDOW_SECS};
use launchindex_core::types::normalize_address;
use launchindex_evm::{HttpRpcClient, IndexerBuilder};
use launchindex_storage::StoreHandle;

mod logging;

const DEFAULT_CONFIG: &str = "launchindex.toml";

#[derive(Parser)]
#[command(
    name = "launchindex",
    about = "Token launch indexer for the v0/v1 factory protocol",
    long_about = "
LaunchIndex follows the launch factories, discovers every token and
collectible contract they deploy, and keeps a queryable store of tokens,
transfers and collectible ownership.

ENVIRONMENT VARIABLES:
  LAUNCHINDEX_CONFIG               Config file (default: ./launchindex.toml)
  LAUNCHINDEX_RPC_URL              JSON-RPC endpoint
  LAUNCHINDEX_DATABASE_URL         sqlite://path.db or memory
  LAUNCHINDEX_CONFIRMATION_DEPTH   Blocks behind head treated as final
  LAUNCHINDEX_FACTORY_V0_ADDRESS   (and _V1_, _START_BLOCK, CHILD_V0_START_BLOCK …)
  RUST_LOG                         Overrides the configured log filter
",
    version
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, global = true, env = "LAUNCHINDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the indexer until interrupted
    Run,

    /// Show every subscription and how far it has been indexed
    Status,

    /// Query tokens
    #[command(subcommand)]
    Tokens(TokenCommand),

    /// Query collectibles
    #[command(subcommand)]
    Convictions(ConvictionCommand),

    /// List events that could not be decoded
    #[command(name = "dead-letters")]
    DeadLetters {
        #[arg(long, default_value_t = 100)]
        limit: u32,
    },

    /// Validate the configuration and print it
    #[command(name = "check-config")]
    CheckConfig,
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Most recently created tokens
    Latest {
        #[arg(long, default_value_t = DEFAULT_QUERY_LIMIT)]
        limit: u32,
    },
    /// Tokens with the most transfers in a trailing window
    Top {
        /// Window length in hours
        #[arg(long, default_value_t = DEFAULT_TOP_WINDOW_SECS / 3600)]
        hours: i64,
        #[arg(long, default_value_t = DEFAULT_QUERY_LIMIT)]
        limit: u32,
    },
    /// A single token by address
    Get { address: String },
    /// Transfers of one token, newest first
    Transfers {
        address: String,
        #[arg(long, default_value_t = 100)]
        limit: u32,
    },
}

#[derive(Subcommand)]
enum ConvictionCommand {
    /// Collectibles minted against a token
    #[command(name = "by-token")]
    ByToken { address: String },
    /// Collectibles currently held by an owner
    #[command(name = "by-owner")]
    ByOwner { address: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    logging::init_tracing(&config.logging);

    match cli.command {
        Commands::Run => cmd_run(config).await,
        Commands::CheckConfig => {
            config.validate()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print!("{}", toml::to_string_pretty(&config)?);
            }
            Ok(())
        }
        Commands::Status => cmd_status(&config, cli.json).await,
        Commands::Tokens(cmd) => {
            let db = open(&config).await?;
            match cmd {
                TokenCommand::Latest { limit } => print_rows(&db.queries.latest_tokens(limit).await?, cli.json),
                TokenCommand::Top { hours, limit } => {
                    let since = chrono::Utc::now().timestamp() - hours * 3600;
                    print_rows(&db.queries.top_tokens_by_transfers(since, limit).await?, cli.json)
                }
                TokenCommand::Get { address } => {
                    let address = address_arg(&address)?;
                    match db.queries.token(&address).await? {
                        Some(token) => print(&token, cli.json),
                        None => bail!("no token {address}"),
                    }
                }
                TokenCommand::Transfers { address, limit } => {
                    let address = address_arg(&address)?;
                    print_rows(&db.queries.transfers_by_token(&address, limit).await?, cli.json)
                }
            }
        }
        Commands::Convictions(cmd) => {
            let db = open(&config).await?;
            let rows = match cmd {
                ConvictionCommand::ByToken { address } => {
                    db.queries.convictions_by_token(&address_arg(&address)?).await?
                }
                ConvictionCommand::ByOwner { address } => {
                    db.queries.convictions_by_owner(&address_arg(&address)?).await?
                }
            };
            print_rows(&rows, cli.json)
        }
        Commands::DeadLetters { limit } => {
            let db = open(&config).await?;
            print_rows(&db.queries.dead_letters(limit).await?, cli.json)
        }
    }
}

/// Explicit path, else `./launchindex.toml` if present, else defaults; then
/// `LAUNCHINDEX_*` overrides.
fn load_config(path: Option<&Path>) -> Result<IndexerConfig> {
    let mut config = match path {
        Some(path) => IndexerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).exists() => IndexerConfig::from_file(DEFAULT_CONFIG)?,
        None => IndexerConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

async fn open(config: &IndexerConfig) -> Result<StoreHandle> {
    launchindex_storage::open(&config.database_url)
        .await
        .with_context(|| format!("opening {}", config.database_url))
}

fn address_arg(s: &str) -> Result<String> {
    Ok(normalize_address(s)?)
}

async fn cmd_run(mut config: IndexerConfig) -> Result<()> {
    config.validate()?;
    let db = open(&config).await?;
    let client = Arc::new(HttpRpcClient::default_for(config.rpc_url.clone())?);

    tracing::info!(
        chain = %config.chain,
        rpc = %config.rpc_url,
        database = %config.database_url,
        factories = config.factories.len(),
        confirmation_depth = config.confirmation_depth,
        "starting launchindex"
    );

    let (supervisor, handle) = IndexerBuilder::from_config(config).build(client, db.store.clone())?;
    let mut task = tokio::spawn(supervisor.run());

    tokio::select! {
        joined = &mut task => {
            joined.context("supervisor task failed")??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("installing Ctrl-C handler")?;
            tracing::info!("interrupt received, shutting down");
        }
    }
    handle.shutdown();
    task.await.context("supervisor task failed")??;

    let stats = handle.stats();
    tracing::info!(
        events = stats.events,
        discovered = stats.discovered,
        dead_letters = stats.dead_letters,
        "stopped"
    );
    Ok(())
}

#[derive(Serialize)]
struct SubscriptionStatus {
    address: String,
    version: String,
    kind: String,
    start_block: u64,
    indexed_through: Option<u64>,
}

async fn cmd_status(config: &IndexerConfig, json: bool) -> Result<()> {
    let db = open(config).await?;
    let checkpoints = db.queries.checkpoints().await?;
    let rows: Vec<SubscriptionStatus> = db
        .store
        .subscriptions()
        .await?
        .into_iter()
        .map(|sub| {
            let indexed_through = checkpoints
                .iter()
                .find(|cp| cp.address == sub.address)
                .map(|cp| match cp.log_index {
                    Some(_) => cp.block_number.saturating_sub(1),
                    None => cp.block_number,
                });
            SubscriptionStatus {
                address: sub.address,
                version: sub.version.to_string(),
                kind: sub.kind.to_string(),
                start_block: sub.start_block,
                indexed_through,
            }
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    println!("{:<44} {:<4} {:<11} {:>12} {:>12}", "ADDRESS", "VER", "KIND", "START", "INDEXED");
    for row in &rows {
        println!(
            "{:<44} {:<4} {:<11} {:>12} {:>12}",
            row.address,
            row.version,
            row.kind,
            row.start_block,
            row.indexed_through.map(|b| b.to_string()).unwrap_or_else(|| "-".into()),
        );
    }
    println!("\n{} subscriptions", rows.len());
    Ok(())
}

fn print<T: Serialize>(value: &T, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", serde_json::to_string(value)?);
    }
    Ok(())
}

/// One row per line, or a single JSON array with `--json`.
fn print_rows<T: Serialize>(rows: &[T], json: bool) -> Result<()> {
    if json {
        return print(&rows, true);
    }
    for row in rows {
        println!("{}", serde_json::to_string(row)?);
    }
    Ok(())
}
