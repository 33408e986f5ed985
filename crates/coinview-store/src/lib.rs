//! Durable coin view backed by RocksDB.
//!
//! Coin records, the rewind log and chain metadata live in separate column
//! families; every block transition commits as one atomic [`rocksdb::WriteBatch`]
//! so the tip, the coin changes and their undo entry can never diverge.
//!
//! RocksDB access is single-threaded by construction: a dedicated worker
//! thread owns the storage and async callers talk to it through the
//! [`DurableCoinView`] handle.

mod error;
mod storage;
mod worker;

pub use error::Error;
pub use storage::CoinStorage;
pub use worker::DurableCoinView;

/// Result type for durable storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Column family names for RocksDB.
mod cf {
    /// Coin records.
    /// Key: txid (32 bytes, raw)
    /// Value: UnspentOutputs (serialized)
    pub const COINS: &str = "coins";

    /// Rewind log.
    /// Key: sequence number (u64, big-endian)
    /// Value: RewindData (serialized)
    pub const REWIND: &str = "rewind";

    /// Chain metadata.
    /// Keys: "tip", "rewind_seq", "coin_count"
    pub const META: &str = "meta";
}

/// Metadata keys.
mod meta_keys {
    pub const TIP: &[u8] = b"tip";
    pub const REWIND_SEQ: &[u8] = b"rewind_seq";
    pub const COIN_COUNT: &[u8] = b"coin_count";
}
