//! Layered coin views over the UTXO set.
//!
//! A coin view answers "which outputs of this transaction are still
//! spendable, and as of which chain tip". Views layer: callers normally
//! talk to a [`CachedCoinView`] that buffers per-block mutations in memory
//! and forwards misses to a durable backing view, flushing dirty entries
//! periodically and discarding or undoing state on a reorg.
//!
//! This crate holds the contract ([`CoinView`]), the in-memory reference
//! view, the write-back cache, and the stack traversal utility. The
//! durable RocksDB view lives in `coinview-store`.

mod cache;
mod error;
mod in_memory;
mod stack;
mod stats;
mod view;

pub use cache::{CacheConfig, CachedCoinView};
pub use error::CoinViewError;
pub use in_memory::InMemoryCoinView;
pub use stack::CoinViewStack;
pub use stats::{CachePerformanceCounter, CacheStatsSnapshot};
pub use view::{ChainMetadataStore, CoinView};

pub use coinview_primitives::{
    FetchCoinsResponse, OutputSnapshot, RewindData, UnspentOutputs, genesis_block_hash,
};

/// Result type for coin-view operations.
pub type Result<T> = std::result::Result<T, CoinViewError>;
