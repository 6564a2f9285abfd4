//! Node configuration for the Tally block index.
//!
//! [`NodeConfig`] is built in layers: compiled defaults, then an optional
//! TOML file, then `TALLY_*` environment variables. Nested fields use a
//! double underscore, e.g. `TALLY_STORE__CACHE_SIZE_MB=64`.

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File, FileFormat, Map};
use serde::{Deserialize, Serialize};

use tally_core::constants::NetworkType;

use crate::storage::StoreOptions;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "TALLY";

/// Configuration for a node's block index.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory for persistent data. Defaults to a per-network
    /// directory under the platform data directory.
    pub data_dir: Option<PathBuf>,
    /// Network whose proof-of-work rules stored headers are checked against.
    pub network: NetworkType,
    /// Log level filter string (e.g. "info", "debug", "tally_node_lib=trace").
    pub log_level: String,
    /// Log output format, "text" or "json".
    pub log_format: String,
    /// RocksDB tuning.
    pub store: StoreOptions,
    /// Maintain the transaction index.
    pub txindex: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            network: NetworkType::default(),
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            store: StoreOptions::default(),
            txindex: false,
        }
    }
}

impl NodeConfig {
    /// Load configuration from defaults, an optional TOML file, and the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`load`](Self::load), reading environment overrides from `env`
    /// instead of the process environment when given.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );
        builder.build()?.try_deserialize()
    }

    /// Root data directory, resolving the per-network default.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tally")
                .join(self.network.data_dir_suffix())
        })
    }

    /// Path to the RocksDB block index directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("blocks").join("index")
    }
}
