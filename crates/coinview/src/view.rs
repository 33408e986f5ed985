//! The coin-view contract.

use crate::Result;
use bitcoin::{BlockHash, Txid};
use coinview_primitives::{FetchCoinsResponse, OutputSnapshot, UnspentOutputs};
use std::any::Any;
use std::sync::Arc;

/// Abstract capability every coin-view layer supports.
///
/// All operations return copies; callers never receive a reference into a
/// layer's internal map. Implementations are safe to share across tasks.
#[async_trait::async_trait]
pub trait CoinView: Send + Sync + 'static {
    /// For each requested txid, return a copy of its current coin record,
    /// or `None` if unknown or fully spent, together with the tip hash the
    /// batch is consistent with.
    ///
    /// Calling with an empty slice is the supported way to learn the tip.
    async fn fetch_coins(&self, txids: &[Txid]) -> Result<FetchCoinsResponse>;

    /// Atomically apply one block's coin-set changes.
    ///
    /// Fails with [`CoinViewError::TipMismatch`](crate::CoinViewError) when
    /// `old_block_hash` is not the view's current tip. `original_outputs`,
    /// when provided, carries the pre-image of each changed record aligned
    /// with `unspent_outputs` (`None` = the record did not exist before);
    /// layers that keep an undo log build it from these.
    async fn save_changes(
        &self,
        unspent_outputs: Vec<UnspentOutputs>,
        original_outputs: Option<Vec<Option<OutputSnapshot>>>,
        old_block_hash: BlockHash,
        next_block_hash: BlockHash,
    ) -> Result<()>;

    /// Undo the most recent transition and return the resulting tip.
    async fn rewind(&self) -> Result<BlockHash>;

    /// The tip hash the view currently reflects.
    async fn current_tip(&self) -> Result<BlockHash> {
        Ok(self.fetch_coins(&[]).await?.block_hash)
    }

    /// The view this layer wraps, `None` at the bottom of a stack.
    fn backing(&self) -> Option<Arc<dyn CoinView>> {
        None
    }

    /// Downcast support for [`CoinViewStack::find`](crate::CoinViewStack::find).
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A tightly-coupled durable subsystem that must be persisted before the
/// cache's own tip becomes durable, e.g. a chain-metadata store keyed by
/// block hash. The cache awaits this to completion before committing its
/// flush; the ordering is a design requirement, not incidental.
#[async_trait::async_trait]
pub trait ChainMetadataStore: Send + Sync {
    async fn flush(&self, durable: bool) -> Result<()>;
}
