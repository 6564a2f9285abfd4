//! # tally-node
//!
//! Persistent block index: storage, loader, and cache.
//!
//! - [`storage`]: key-value store abstraction with RocksDB and in-memory backends
//! - [`schema`]: keyspace prefixes and key builders
//! - [`block_tree::BlockTreeDb`]: batch writer, index loader, and auxiliary records
//! - [`index_cache::IndexCache`]: in-memory DAG with dirty tracking and flush
//! - [`config::NodeConfig`]: node configuration

pub mod block_tree;
pub mod config;
pub mod index_cache;
pub mod schema;
pub mod storage;

pub use block_tree::{BlockTreeDb, LoadStats};
pub use config::NodeConfig;
pub use index_cache::{IndexCache, SharedIndex};
pub use storage::{KeyValueStore, KvCursor, MemoryStore, RocksStore, StoreOptions, WriteBatch};
