//! Error type shared by every coin-view layer.

use bitcoin::BlockHash;

/// Errors surfaced by coin-view operations.
#[derive(Debug, thiserror::Error)]
pub enum CoinViewError {
    /// The caller's assumed prior tip does not match the view's current
    /// tip. Never retried automatically; the caller must re-derive the
    /// correct parent state (usually a concurrent reorg).
    #[error("tip mismatch: changes assume {provided} but the view is at {current}")]
    TipMismatch {
        /// The tip the caller assumed.
        provided: BlockHash,
        /// The tip the view is actually at.
        current: BlockHash,
    },

    /// Rewind requested but no undo information exists.
    #[error("no rewind data available")]
    NoRewindDataAvailable,

    /// The durable backend's worker is gone and can no longer answer.
    #[error("coin store worker terminated")]
    BackendGone,

    /// Storage engine failure, propagated verbatim and never masked.
    #[error("storage error: {0}")]
    Storage(String),
}

impl CoinViewError {
    /// Construct the optimistic-concurrency guard failure.
    pub fn tip_mismatch(provided: BlockHash, current: BlockHash) -> Self {
        Self::TipMismatch { provided, current }
    }
}
