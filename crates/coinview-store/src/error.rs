//! Error types for the durable coin store.

use bitcoin::BlockHash;
use coinview::CoinViewError;

/// Errors that can occur during durable storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// RocksDB error.
    #[error("RocksDB error: {0}")]
    Rocksdb(#[from] rocksdb::Error),

    /// Bincode serialization/deserialization error.
    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    /// The caller's assumed prior tip does not match the stored tip.
    #[error("tip mismatch: changes assume {provided} but storage is at {current}")]
    TipMismatch {
        provided: BlockHash,
        current: BlockHash,
    },

    /// Rewind requested at genesis with an empty rewind log.
    #[error("no rewind data available")]
    NoRewindDataAvailable,

    /// A column family handle is missing; the database was opened without it.
    #[error("column family {0} is missing")]
    ColumnFamilyMissing(&'static str),

    /// Stored metadata bytes have an unexpected shape.
    #[error("corrupt metadata under key {0:?}")]
    CorruptMetadata(&'static [u8]),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Error> for CoinViewError {
    fn from(err: Error) -> Self {
        match err {
            Error::TipMismatch { provided, current } => {
                CoinViewError::tip_mismatch(provided, current)
            }
            Error::NoRewindDataAvailable => CoinViewError::NoRewindDataAvailable,
            other => CoinViewError::Storage(other.to_string()),
        }
    }
}
