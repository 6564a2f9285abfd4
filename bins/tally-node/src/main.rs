//! tally-node: inspect and maintain a node's persistent block index.
//!
//! Opens the RocksDB block tree under the data directory, rebuilds the
//! in-memory block DAG, and reports on it. Also toggles the reindex marker
//! and named flags.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tracing::{info, warn};

use tally_core::block_index::{BlockIndexMap, NodeId};
use tally_core::constants::NetworkType;
use tally_core::pow::difficulty_from_bits;
use tally_node_lib::{BlockTreeDb, IndexCache, NodeConfig, RocksStore};

/// Tally block index tool.
#[derive(Parser, Debug)]
#[command(name = "tally-node", version, about = "Inspect and maintain the Tally block index")]
struct Cli {
    /// Data directory (default: platform data dir / tally / <network>)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Network: mainnet, testnet, or regtest
    #[arg(long, global = true)]
    network: Option<NetworkType>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the block index and print a summary with chain tips.
    Load,
    /// Print the chain tips of the loaded block index.
    Tips,
    /// Read a named flag, or set it when a value is given.
    Flag {
        name: String,
        value: Option<bool>,
    },
    /// Set or clear the reindex marker.
    Reindex {
        #[arg(value_enum)]
        state: Toggle,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Toggle {
    On,
    Off,
}

impl Cli {
    /// Layer command-line overrides on top of file and environment config.
    fn into_config(self) -> Result<(NodeConfig, Command)> {
        let mut config = NodeConfig::load(self.config.as_deref()).context("failed to load configuration")?;
        if let Some(dir) = self.data_dir {
            config.data_dir = Some(dir);
        }
        if let Some(network) = self.network {
            config.network = network;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        Ok((config, self.command))
    }
}

fn main() -> Result<()> {
    let (config, command) = Cli::parse().into_config()?;
    init_logging(&config.log_level, &config.log_format);

    let db_path = config.db_path();
    info!(network = %config.network, path = %db_path.display(), "opening block index");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create {}", db_path.display()))?;
    let db = BlockTreeDb::open(&db_path, &config.store)
        .with_context(|| format!("failed to open block index at {}", db_path.display()))?;

    let output = match command {
        Command::Load => {
            db.write_flag("txindex", config.txindex)?;
            let cache = open_cache(db, &config)?;
            let map = cache.index();
            let best = map.best_header();
            json!({
                "network": config.network,
                "path": db_path.display().to_string(),
                "reindexing": cache.is_reindexing(),
                "stats": cache.load_stats(),
                "nodes": map.len(),
                "last_file": cache.last_file(),
                "max_file": cache.db().read_max_block_file()?,
                "best": best.map(|id| node_json(map, id)),
                "tips": tips_json(map, best),
            })
        }
        Command::Tips => {
            let cache = open_cache(db, &config)?;
            let map = cache.index();
            tips_json(map, map.best_header())
        }
        Command::Flag { name, value } => {
            if let Some(value) = value {
                db.write_flag(&name, value)?;
                info!(flag = %name, value, "flag updated");
            }
            json!({ "name": name, "value": db.read_flag(&name)? })
        }
        Command::Reindex { state } => {
            db.write_reindexing(matches!(state, Toggle::On))?;
            json!({ "reindexing": db.read_reindexing()? })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn open_cache(db: BlockTreeDb<RocksStore>, config: &NodeConfig) -> Result<IndexCache<RocksStore>> {
    let cache = IndexCache::open(db, config.network.params()).context("failed to load block index")?;
    if cache.is_reindexing() {
        warn!("reindex requested; the block index will be rebuilt from block files");
    }
    Ok(cache)
}

fn node_json(map: &BlockIndexMap, id: NodeId) -> Value {
    let node = &map[id];
    json!({
        "hash": node.hash.to_string(),
        "height": node.height,
        "tx_count": node.tx_count,
        "status": node.status.bits(),
        "bits": format!("{:08x}", node.header.bits),
        "difficulty": difficulty_from_bits(node.header.bits),
        "prev": node.parent.map(|p| map[p].hash.to_string()),
    })
}

fn tips_json(map: &BlockIndexMap, active: Option<NodeId>) -> Value {
    map.chain_tips(active)
        .into_iter()
        .map(|tip| {
            json!({
                "height": tip.height,
                "hash": tip.hash.to_string(),
                "branchlen": tip.branch_len,
                "status": tip.status,
            })
        })
        .collect()
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Pass `format = "json"` for structured JSON output. Any other value
/// defaults to human-readable text. Logs go to stderr so stdout stays
/// machine-readable.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "tally-node",
            "flag",
            "txindex",
            "true",
            "--network",
            "regtest",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.network, Some(NetworkType::Regtest));
        assert_eq!(cli.log_format.as_deref(), Some("json"));
        match cli.command {
            Command::Flag { name, value } => {
                assert_eq!(name, "txindex");
                assert_eq!(value, Some(true));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_parses_reindex_toggle() {
        let cli = Cli::try_parse_from(["tally-node", "reindex", "off"]).unwrap();
        assert!(matches!(cli.command, Command::Reindex { state: Toggle::Off }));
        assert!(Cli::try_parse_from(["tally-node", "reindex", "maybe"]).is_err());
    }
}
