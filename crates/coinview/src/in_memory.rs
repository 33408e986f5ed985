//! Map-backed, non-durable coin view.
//!
//! Serves as the bottom of the stack in tests and as the template for the
//! cache's own bookkeeping. No undo log: rewinding is always rejected.

use crate::view::CoinView;
use crate::{CoinViewError, Result};
use bitcoin::{BlockHash, Txid};
use coinview_primitives::{FetchCoinsResponse, OutputSnapshot, UnspentOutputs};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

struct Inner {
    coins: HashMap<Txid, UnspentOutputs>,
    tip: BlockHash,
}

/// In-memory coin view.
pub struct InMemoryCoinView {
    inner: RwLock<Inner>,
    /// When set, fully spent records stay in the map instead of being
    /// deleted, so that a cache layered on top still sees them until its
    /// own flush discharges them.
    retain_prunable: bool,
}

impl InMemoryCoinView {
    /// Create an empty view at the given tip.
    pub fn new(tip: BlockHash) -> Self {
        Self {
            inner: RwLock::new(Inner {
                coins: HashMap::new(),
                tip,
            }),
            retain_prunable: false,
        }
    }

    /// Create an empty view that keeps fully spent records visible.
    /// Use this variant when the view directly backs a cache.
    pub fn retaining_prunable(tip: BlockHash) -> Self {
        Self {
            retain_prunable: true,
            ..Self::new(tip)
        }
    }

    /// Number of records currently held.
    pub fn coin_count(&self) -> usize {
        self.inner.read().coins.len()
    }
}

#[async_trait::async_trait]
impl CoinView for InMemoryCoinView {
    async fn fetch_coins(&self, txids: &[Txid]) -> Result<FetchCoinsResponse> {
        let inner = self.inner.read();
        let unspent_outputs = txids
            .iter()
            .map(|txid| inner.coins.get(txid).cloned())
            .collect();
        Ok(FetchCoinsResponse::new(unspent_outputs, inner.tip))
    }

    async fn save_changes(
        &self,
        unspent_outputs: Vec<UnspentOutputs>,
        _original_outputs: Option<Vec<Option<OutputSnapshot>>>,
        old_block_hash: BlockHash,
        next_block_hash: BlockHash,
    ) -> Result<()> {
        let mut inner = self.inner.write();

        if inner.tip != old_block_hash {
            return Err(CoinViewError::tip_mismatch(old_block_hash, inner.tip));
        }

        for incoming in unspent_outputs {
            let txid = incoming.txid;
            let prunable = match inner.coins.get_mut(&txid) {
                Some(existing) => {
                    // Merge rather than overwrite, preserving spends applied
                    // by concurrent logic paths.
                    existing.merge_spends(&incoming);
                    existing.is_prunable()
                }
                None => {
                    let prunable = incoming.is_prunable();
                    inner.coins.insert(txid, incoming);
                    prunable
                }
            };

            if prunable && !self.retain_prunable {
                inner.coins.remove(&txid);
            }
        }

        inner.tip = next_block_hash;
        Ok(())
    }

    async fn rewind(&self) -> Result<BlockHash> {
        Err(CoinViewError::NoRewindDataAvailable)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::{Amount, ScriptBuf, TxOut};

    fn hash(byte: u8) -> BlockHash {
        BlockHash::from_byte_array([byte; 32])
    }

    fn txid(byte: u8) -> Txid {
        Txid::from_byte_array([byte; 32])
    }

    fn txout(sats: u64) -> TxOut {
        TxOut {
            value: Amount::from_sat(sats),
            script_pubkey: ScriptBuf::from_bytes(vec![0x51]),
        }
    }

    #[tokio::test]
    async fn empty_fetch_reports_tip() {
        let view = InMemoryCoinView::new(hash(1));
        let response = view.fetch_coins(&[]).await.unwrap();
        assert!(response.unspent_outputs.is_empty());
        assert_eq!(response.block_hash, hash(1));
    }

    #[tokio::test]
    async fn apply_then_fetch_round_trips() {
        let view = InMemoryCoinView::new(hash(0));
        let coins = UnspentOutputs::new(txid(1), 1, false, vec![txout(50), txout(50)]);

        view.save_changes(vec![coins.clone()], None, hash(0), hash(1))
            .await
            .unwrap();

        let response = view.fetch_coins(&[txid(1), txid(2)]).await.unwrap();
        assert_eq!(response.block_hash, hash(1));
        assert_eq!(response.unspent_outputs[0], Some(coins));
        assert_eq!(response.unspent_outputs[1], None);
    }

    #[tokio::test]
    async fn stale_tip_is_rejected() {
        let view = InMemoryCoinView::new(hash(0));
        let coins = UnspentOutputs::new(txid(1), 1, false, vec![txout(50)]);

        let err = view
            .save_changes(vec![coins], None, hash(9), hash(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoinViewError::TipMismatch { .. }));
        assert_eq!(view.coin_count(), 0);
    }

    #[tokio::test]
    async fn merge_spends_existing_record() {
        let view = InMemoryCoinView::new(hash(0));
        let coins = UnspentOutputs::new(txid(1), 1, false, vec![txout(50), txout(50)]);
        view.save_changes(vec![coins], None, hash(0), hash(1))
            .await
            .unwrap();

        let mut spend = UnspentOutputs::new(txid(1), 1, false, vec![txout(50), txout(50)]);
        spend.spend(0);
        view.save_changes(vec![spend], None, hash(1), hash(2))
            .await
            .unwrap();

        let response = view.fetch_coins(&[txid(1)]).await.unwrap();
        let merged = response.unspent_outputs[0].as_ref().unwrap();
        assert!(merged.outputs[0].is_none());
        assert!(merged.outputs[1].is_some());
    }

    #[tokio::test]
    async fn fully_spent_records_are_pruned() {
        let view = InMemoryCoinView::new(hash(0));
        let coins = UnspentOutputs::new(txid(1), 1, false, vec![txout(50)]);
        view.save_changes(vec![coins], None, hash(0), hash(1))
            .await
            .unwrap();

        let mut spend = UnspentOutputs::new(txid(1), 1, false, vec![txout(50)]);
        spend.spend(0);
        view.save_changes(vec![spend], None, hash(1), hash(2))
            .await
            .unwrap();

        assert_eq!(view.coin_count(), 0);
        let response = view.fetch_coins(&[txid(1)]).await.unwrap();
        assert_eq!(response.unspent_outputs[0], None);
    }

    #[tokio::test]
    async fn retain_mode_keeps_fully_spent_records() {
        let view = InMemoryCoinView::retaining_prunable(hash(0));
        let coins = UnspentOutputs::new(txid(1), 1, false, vec![txout(50)]);
        view.save_changes(vec![coins], None, hash(0), hash(1))
            .await
            .unwrap();

        let mut spend = UnspentOutputs::new(txid(1), 1, false, vec![txout(50)]);
        spend.spend(0);
        view.save_changes(vec![spend], None, hash(1), hash(2))
            .await
            .unwrap();

        assert_eq!(view.coin_count(), 1);
        let response = view.fetch_coins(&[txid(1)]).await.unwrap();
        assert!(response.unspent_outputs[0].as_ref().unwrap().is_prunable());
    }

    #[tokio::test]
    async fn rewind_is_rejected() {
        let view = InMemoryCoinView::new(hash(0));
        let err = view.rewind().await.unwrap_err();
        assert!(matches!(err, CoinViewError::NoRewindDataAvailable));
    }
}
