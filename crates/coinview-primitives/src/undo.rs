//! Rewind data for chain reorganizations.
//!
//! When a block transition is committed durably, we save which coin records
//! it created and the pre-spend snapshots of the records it partially
//! spent. This allows the transition to be reverted during a reorg without
//! re-deriving state from genesis.

use crate::UnspentOutputs;
use bitcoin::{BlockHash, Txid};
use serde::{Deserialize, Serialize};

/// Undo data for a single committed block transition.
///
/// Entries are appended under a monotonically increasing sequence number;
/// the highest sequence is always the next one popped on rewind, and a
/// consumed entry is deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewindData {
    /// Hash of the block the view was at before this transition.
    pub previous_block_hash: BlockHash,
    /// Coin records created by this transition.
    /// These need to be deleted when reverting.
    pub outputs_to_delete: Vec<Txid>,
    /// Pre-spend snapshots of records this transition partially spent.
    /// These need to be restored when reverting.
    pub outputs_to_restore: Vec<UnspentOutputs>,
}

impl RewindData {
    /// Create an empty entry for a transition away from `previous_block_hash`.
    pub fn new(previous_block_hash: BlockHash) -> Self {
        Self {
            previous_block_hash,
            outputs_to_delete: Vec::new(),
            outputs_to_restore: Vec::new(),
        }
    }

    /// Record a coin record that did not exist before this transition.
    pub fn record_created(&mut self, txid: Txid) {
        self.outputs_to_delete.push(txid);
    }

    /// Record the pre-spend snapshot of a record this transition touched.
    pub fn record_restored(&mut self, snapshot: UnspentOutputs) {
        self.outputs_to_restore.push(snapshot);
    }

    /// Number of records deleted on rollback.
    pub fn delete_count(&self) -> usize {
        self.outputs_to_delete.len()
    }

    /// Number of snapshots restored on rollback.
    pub fn restore_count(&self) -> usize {
        self.outputs_to_restore.len()
    }

    /// True when the transition changed no coin records.
    pub fn is_empty(&self) -> bool {
        self.outputs_to_delete.is_empty() && self.outputs_to_restore.is_empty()
    }

    /// Serialize to bytes for storage.
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("RewindData serialization must not fail; qed")
    }

    /// Deserialize from bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
