//! Per-transaction coin records and the batch lookup response.

use bitcoin::{BlockHash, TxOut, Txid};
use serde::{Deserialize, Serialize};

/// Snapshot of a coin record's output list as last known to the durable
/// backend. `None` slots are outputs that were already spent at that point.
pub type OutputSnapshot = Vec<Option<TxOut>>;

/// The coin state of one confirmed transaction.
///
/// The output list length is fixed when the record is created; applying a
/// spend only ever flips slots from present to absent. The reverse happens
/// solely through a rewind, which restores a previously taken snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutputs {
    /// Id of the transaction that created these outputs.
    pub txid: Txid,
    /// Whether the creating transaction was a coinbase.
    pub is_coinbase: bool,
    /// Height of the block that confirmed the creating transaction.
    pub height: u32,
    /// One slot per output; `None` means already spent.
    pub outputs: Vec<Option<TxOut>>,
}

impl UnspentOutputs {
    /// Create a record whose outputs are all still spendable.
    pub fn new(txid: Txid, height: u32, is_coinbase: bool, outputs: Vec<TxOut>) -> Self {
        Self {
            txid,
            is_coinbase,
            height,
            outputs: outputs.into_iter().map(Some).collect(),
        }
    }

    /// Create a record from an explicit presence/absence slot list.
    pub fn from_slots(
        txid: Txid,
        height: u32,
        is_coinbase: bool,
        outputs: Vec<Option<TxOut>>,
    ) -> Self {
        Self {
            txid,
            is_coinbase,
            height,
            outputs,
        }
    }

    /// Number of outputs that are still spendable.
    pub fn spendable_count(&self) -> usize {
        self.outputs.iter().filter(|slot| slot.is_some()).count()
    }

    /// True when no spendable output remains; such a record may be removed
    /// from live state once its durability obligations are discharged.
    pub fn is_prunable(&self) -> bool {
        self.outputs.iter().all(|slot| slot.is_none())
    }

    /// True when every output is still present, i.e. the record looks like a
    /// brand-new creation with nothing spent yet.
    pub fn is_fully_unspent(&self) -> bool {
        self.outputs.iter().all(|slot| slot.is_some())
    }

    /// Mark a single output as spent. Returns the spent output, or `None`
    /// if the index is out of range or the output was already gone.
    pub fn spend(&mut self, vout: u32) -> Option<TxOut> {
        self.outputs.get_mut(vout as usize)?.take()
    }

    /// Merge the spend state of `incoming` into this record: any output the
    /// incoming record has spent becomes spent here too (logical OR of
    /// spent-ness). Outputs are never resurrected by a merge.
    ///
    /// The output list length is fixed at creation, so slots beyond this
    /// record's own count (a duplicate txid recreated with a different
    /// shape) are ignored.
    pub fn merge_spends(&mut self, incoming: &UnspentOutputs) {
        for (existing, slot) in self.outputs.iter_mut().zip(&incoming.outputs) {
            if slot.is_none() {
                *existing = None;
            }
        }
    }

    /// Serialize for durable storage.
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("UnspentOutputs serialization must not fail; qed")
    }

    /// Deserialize from durable storage bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// Result envelope of a batch coin lookup.
///
/// `unspent_outputs` is aligned positionally with the requested txids; the
/// whole batch is consistent with `block_hash`. Freshly constructed per
/// call and never mutated after return.
#[derive(Debug, Clone)]
pub struct FetchCoinsResponse {
    /// One entry per requested txid; `None` for unknown or fully spent.
    pub unspent_outputs: Vec<Option<UnspentOutputs>>,
    /// The chain tip this answer is consistent with.
    pub block_hash: BlockHash,
}

impl FetchCoinsResponse {
    pub fn new(unspent_outputs: Vec<Option<UnspentOutputs>>, block_hash: BlockHash) -> Self {
        Self {
            unspent_outputs,
            block_hash,
        }
    }
}
