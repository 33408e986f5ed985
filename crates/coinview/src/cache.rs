//! Write-back coin cache.
//!
//! Sits between callers and a durable backing view: answers lookups from
//! memory where possible, buffers per-block mutations as dirty entries,
//! flushes them to the backend periodically or under memory pressure, and
//! discards or delegates state on a rewind.

use crate::stats::CachePerformanceCounter;
use crate::view::{ChainMetadataStore, CoinView};
use crate::{CoinViewError, Result};
use bitcoin::{BlockHash, Txid};
use coinview_primitives::{FetchCoinsResponse, OutputSnapshot, UnspentOutputs};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Cache tuning knobs.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries held before eviction kicks in.
    pub max_cache_items: usize,
    /// Seed for the eviction RNG; random when unset. Fixing the seed makes
    /// eviction reproducible in tests.
    pub eviction_seed: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_items: 100_000,
            eviction_seed: None,
        }
    }
}

/// Cache bookkeeping around one coin record. Never exposed to callers.
struct CacheItem {
    /// The record, or `None` when the backend answered "unknown" (negative
    /// caching: repeat lookups of a missing txid stay in memory).
    coins: Option<UnspentOutputs>,
    /// Whether the record is known to exist durably in the backend.
    exists_in_backend: bool,
    /// Whether the record carries mutations the backend has not seen.
    dirty: bool,
    /// The output list as last known to the backend; `None` when the
    /// record did not exist there. Used to build undo data at flush time.
    original_outputs: Option<OutputSnapshot>,
}

struct CacheState {
    coins: HashMap<Txid, CacheItem>,
    /// Tip the cache currently reflects.
    tip: BlockHash,
    /// Tip the backend was last known to reflect durably. Diverges from
    /// `tip` exactly while unflushed dirty entries exist.
    backend_tip: BlockHash,
    rng: fastrand::Rng,
}

/// Write-back cache over a durable coin view.
pub struct CachedCoinView {
    backend: Arc<dyn CoinView>,
    metadata_store: Option<Arc<dyn ChainMetadataStore>>,
    max_cache_items: usize,
    stats: CachePerformanceCounter,
    /// Serializes `save_changes`/`flush`/`rewind` with each other and with
    /// the map phases of `fetch_coins`. Held across the backend commit of a
    /// flush, which is exactly the at-most-one-outstanding-durable-operation
    /// guarantee.
    mutation: Mutex<()>,
    state: RwLock<CacheState>,
}

impl CachedCoinView {
    /// Create a cache over `backend`, adopting its current tip.
    pub async fn new(backend: Arc<dyn CoinView>, config: CacheConfig) -> Result<Self> {
        let tip = backend.current_tip().await?;
        let rng = match config.eviction_seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };

        Ok(Self {
            backend,
            metadata_store: None,
            max_cache_items: config.max_cache_items,
            stats: CachePerformanceCounter::default(),
            mutation: Mutex::new(()),
            state: RwLock::new(CacheState {
                coins: HashMap::new(),
                tip,
                backend_tip: tip,
                rng,
            }),
        })
    }

    /// Attach a companion metadata store, flushed to completion before each
    /// of this cache's own flushes.
    pub fn with_metadata_store(mut self, store: Arc<dyn ChainMetadataStore>) -> Self {
        self.metadata_store = Some(store);
        self
    }

    /// Number of entries currently cached.
    pub fn entry_count(&self) -> usize {
        self.state.read().coins.len()
    }

    /// Number of entries with unflushed mutations.
    pub fn dirty_count(&self) -> usize {
        self.state.read().coins.values().filter(|item| item.dirty).count()
    }

    /// Instrumentation counters.
    pub fn stats(&self) -> &CachePerformanceCounter {
        &self.stats
    }

    /// Commit all dirty entries to the backend.
    ///
    /// Waits for any in-flight flush or rewind first. On success the dirty
    /// set is clean and fully spent flushed entries are dropped from the
    /// map; on failure the dirty set is left intact and the flush can be
    /// retried.
    pub async fn flush(&self) -> Result<()> {
        let guard = self.mutation.lock().await;
        self.flush_with_guard(&guard).await
    }

    async fn flush_with_guard(&self, _guard: &MutexGuard<'_, ()>) -> Result<()> {
        // The companion store must be durable before our tip is, so that a
        // crash between the two commits never leaves a tip without its
        // metadata.
        if let Some(store) = &self.metadata_store {
            store.flush(true).await?;
        }

        let (dirty_coins, original_outputs, old_tip, next_tip) = {
            let state = self.state.read();
            let mut coins = Vec::new();
            let mut originals = Vec::new();
            for item in state.coins.values().filter(|item| item.dirty) {
                if let Some(record) = &item.coins {
                    coins.push(record.clone());
                    originals.push(item.original_outputs.clone());
                }
            }
            (coins, originals, state.backend_tip, state.tip)
        };

        if dirty_coins.is_empty() && old_tip == next_tip {
            return Ok(());
        }

        let flushed: Vec<(Txid, bool)> = dirty_coins
            .iter()
            .map(|record| (record.txid, record.is_prunable()))
            .collect();

        // Awaited outside the map lock: a slow commit must not block
        // concurrent map reads any longer than the mutation guard demands.
        self.backend
            .save_changes(dirty_coins, Some(original_outputs), old_tip, next_tip)
            .await?;

        let mut state = self.state.write();
        for (txid, prunable) in &flushed {
            if *prunable {
                // Durability obligation discharged; retaining a fully spent
                // record would only consume memory.
                state.coins.remove(txid);
            } else if let Some(item) = state.coins.get_mut(txid) {
                item.dirty = false;
                item.exists_in_backend = true;
                item.original_outputs = item.coins.as_ref().map(|c| c.outputs.clone());
            }
        }
        state.backend_tip = next_tip;

        self.stats.record_flush();
        tracing::debug!(entries = flushed.len(), tip = %next_tip, "Flushed coin cache");

        Ok(())
    }
}

/// Single eviction pass: clean entries are removed with probability 1/3,
/// dirty entries never (that would lose unflushed mutations). A bounded
/// memory policy, not an LRU.
fn evict_entries(state: &mut CacheState) -> u64 {
    let before = state.coins.len();
    let CacheState { coins, rng, .. } = state;
    coins.retain(|_, item| item.dirty || rng.u32(0..3) > 0);
    (before - coins.len()) as u64
}

#[async_trait::async_trait]
impl CoinView for CachedCoinView {
    async fn fetch_coins(&self, txids: &[Txid]) -> Result<FetchCoinsResponse> {
        // Wait for any in-flight flush/rewind before consulting the map.
        let guard = self.mutation.lock().await;

        let mut slots: Vec<Option<UnspentOutputs>> = vec![None; txids.len()];
        let mut missing: Vec<(usize, Txid)> = Vec::new();
        {
            let state = self.state.read();
            for (index, txid) in txids.iter().enumerate() {
                match state.coins.get(txid) {
                    Some(item) => {
                        // A recorded-as-prunable entry answers "absent".
                        slots[index] = item
                            .coins
                            .as_ref()
                            .filter(|coins| !coins.is_prunable())
                            .cloned();
                    }
                    None => missing.push((index, *txid)),
                }
            }
        }
        self.stats.record_hits((txids.len() - missing.len()) as u64);
        self.stats.record_misses(missing.len() as u64);

        if missing.is_empty() {
            let tip = self.state.read().tip;
            return Ok(FetchCoinsResponse::new(slots, tip));
        }
        drop(guard);

        let missing_txids: Vec<Txid> = missing.iter().map(|(_, txid)| *txid).collect();
        // Outside any lock, so a slow backend never blocks other readers.
        let backend_response = self.backend.fetch_coins(&missing_txids).await?;

        let guard = self.mutation.lock().await;
        let (tip, over_limit) = {
            let mut state = self.state.write();
            for ((index, txid), fetched) in
                missing.iter().zip(backend_response.unspent_outputs.into_iter())
            {
                let item = match state.coins.entry(*txid) {
                    // Populated by an interleaved save_changes while we were
                    // waiting on the backend; cache-owned state wins.
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => entry.insert(CacheItem {
                        exists_in_backend: fetched.is_some(),
                        dirty: false,
                        original_outputs: fetched.as_ref().map(|c| c.outputs.clone()),
                        coins: fetched,
                    }),
                };
                slots[*index] = item
                    .coins
                    .as_ref()
                    .filter(|coins| !coins.is_prunable())
                    .cloned();
            }

            let over = state.coins.len() > self.max_cache_items;
            if over {
                let removed = evict_entries(&mut state);
                self.stats.record_evicted(removed);
            }
            (state.tip, state.coins.len() > self.max_cache_items)
        };

        if over_limit {
            // Eviction alone was not enough: force a full flush so every
            // entry becomes clean, then evict again.
            self.flush_with_guard(&guard).await?;
            let mut state = self.state.write();
            let removed = evict_entries(&mut state);
            self.stats.record_evicted(removed);
        }

        Ok(FetchCoinsResponse::new(slots, tip))
    }

    async fn save_changes(
        &self,
        unspent_outputs: Vec<UnspentOutputs>,
        // The cache derives undo shape from its own per-item backend
        // snapshots; supplied pre-images only matter for the durable view.
        _original_outputs: Option<Vec<Option<OutputSnapshot>>>,
        old_block_hash: BlockHash,
        next_block_hash: BlockHash,
    ) -> Result<()> {
        let _guard = self.mutation.lock().await;
        let mut state = self.state.write();

        if state.tip != old_block_hash {
            return Err(CoinViewError::tip_mismatch(old_block_hash, state.tip));
        }

        for incoming in unspent_outputs {
            let txid = incoming.txid;
            let ephemeral = match state.coins.get_mut(&txid) {
                Some(item) => {
                    match &mut item.coins {
                        Some(existing) => existing.merge_spends(&incoming),
                        None => item.coins = Some(incoming),
                    }
                    item.dirty = true;

                    // A coin created and fully spent entirely within the
                    // unflushed horizon never needs to reach the backend.
                    !item.exists_in_backend
                        && item.coins.as_ref().is_some_and(|c| c.is_prunable())
                }
                None => {
                    // Assume the record pre-existed in the backend unless it
                    // is clearly a fresh creation. Historically duplicate
                    // coinbase txids can defeat this heuristic.
                    let exists_in_backend = !incoming.is_fully_unspent();
                    if incoming.is_prunable() && !exists_in_backend {
                        continue;
                    }
                    let original_outputs =
                        exists_in_backend.then(|| incoming.outputs.clone());
                    state.coins.insert(
                        txid,
                        CacheItem {
                            coins: Some(incoming),
                            exists_in_backend,
                            dirty: true,
                            original_outputs,
                        },
                    );
                    false
                }
            };
            if ephemeral {
                state.coins.remove(&txid);
            }
        }

        state.tip = next_block_hash;
        Ok(())
    }

    async fn rewind(&self) -> Result<BlockHash> {
        let _guard = self.mutation.lock().await;

        let buffered = {
            let state = self.state.read();
            state.tip != state.backend_tip
        };

        if buffered {
            // The backend never saw the buffered blocks, so rewinding is
            // satisfied by discarding the unflushed delta wholesale and
            // falling back to the last durable tip. No backend call.
            // TODO: track buffered changes per block so a rewind discards
            // only the most recent block instead of the entire delta.
            let mut state = self.state.write();
            state.coins.clear();
            state.tip = state.backend_tip;
            self.stats.record_rewind();
            tracing::debug!(tip = %state.tip, "Discarded unflushed delta on rewind");
            return Ok(state.tip);
        }

        // Nothing buffered: every cached entry may describe state the
        // backend is about to roll back, so drop them all before asking it
        // to pop its undo log.
        self.state.write().coins.clear();
        let new_tip = self.backend.rewind().await?;

        let mut state = self.state.write();
        state.tip = new_tip;
        state.backend_tip = new_tip;
        self.stats.record_rewind();
        tracing::debug!(tip = %new_tip, "Rewound coin cache with backend");
        Ok(new_tip)
    }

    fn backing(&self) -> Option<Arc<dyn CoinView>> {
        Some(self.backend.clone())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
