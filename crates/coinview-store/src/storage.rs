//! RocksDB-backed coin storage with a rewind log.

use crate::{Error, Result, cf, meta_keys};
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Network, Txid};
use coinview_primitives::{
    FetchCoinsResponse, OutputSnapshot, RewindData, UnspentOutputs, genesis_block_hash,
};
use parking_lot::RwLock;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use std::path::Path;

/// Convert a txid to its storage key (32 bytes, raw).
fn txid_to_key(txid: &Txid) -> [u8; 32] {
    txid.to_byte_array()
}

/// Rewind log key for a sequence number. Big-endian so the log iterates in
/// append order.
fn seq_to_key(seq: u64) -> [u8; 8] {
    seq.to_be_bytes()
}

/// Durable UTXO coin storage.
///
/// One coin record per transaction, keyed by txid. Each committed block
/// transition appends a [`RewindData`] entry under a monotonically
/// increasing sequence number; rewinding pops the highest entry. When no
/// entry is available the storage falls back to a full reset to genesis.
///
/// Methods take `&self` but callers are expected to serialize mutations;
/// the worker thread in [`crate::DurableCoinView`] does exactly that.
pub struct CoinStorage {
    /// RocksDB instance.
    db: DB,
    /// Network whose genesis the storage bottoms out at.
    network: Network,
    /// Current tip (mirror of the META entry).
    tip: RwLock<BlockHash>,
    /// Next rewind sequence number to assign; 0 means an empty log.
    rewind_seq: RwLock<u64>,
    /// Number of live coin records.
    coin_count: RwLock<u64>,
}

impl CoinStorage {
    /// Open or create coin storage at the given path.
    ///
    /// A freshly created database is initialized to the network's genesis
    /// block hash with an empty coin set and rewind log.
    pub fn open(path: &Path, network: Network) -> Result<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Optimize for UTXO workload
        db_opts.set_write_buffer_size(256 * 1024 * 1024);
        db_opts.set_max_write_buffer_number(4);
        db_opts.set_target_file_size_base(256 * 1024 * 1024);
        db_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        // Enable bloom filters for faster lookups
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        db_opts.set_block_based_table_factory(&block_opts);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(cf::COINS, Options::default()),
            ColumnFamilyDescriptor::new(cf::REWIND, Options::default()),
            ColumnFamilyDescriptor::new(cf::META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let tip = match Self::load_tip(&db)? {
            Some(tip) => tip,
            None => {
                let genesis = genesis_block_hash(network);
                let cf_meta = db
                    .cf_handle(cf::META)
                    .ok_or(Error::ColumnFamilyMissing(cf::META))?;
                db.put_cf(cf_meta, meta_keys::TIP, genesis.to_byte_array())?;
                genesis
            }
        };
        let rewind_seq = Self::load_u64(&db, meta_keys::REWIND_SEQ)?.unwrap_or(0);
        let coin_count = Self::load_u64(&db, meta_keys::COIN_COUNT)?.unwrap_or(0);

        tracing::info!(
            %tip,
            coin_count,
            rewind_depth = rewind_seq,
            "Opened coin storage"
        );

        Ok(Self {
            db,
            network,
            tip: RwLock::new(tip),
            rewind_seq: RwLock::new(rewind_seq),
            coin_count: RwLock::new(coin_count),
        })
    }

    fn load_tip(db: &DB) -> Result<Option<BlockHash>> {
        let cf_meta = db
            .cf_handle(cf::META)
            .ok_or(Error::ColumnFamilyMissing(cf::META))?;
        db.get_cf(cf_meta, meta_keys::TIP)?
            .map(|bytes| {
                let raw: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::CorruptMetadata(meta_keys::TIP))?;
                Ok(BlockHash::from_byte_array(raw))
            })
            .transpose()
    }

    fn load_u64(db: &DB, key: &'static [u8]) -> Result<Option<u64>> {
        let cf_meta = db
            .cf_handle(cf::META)
            .ok_or(Error::ColumnFamilyMissing(cf::META))?;
        db.get_cf(cf_meta, key)?
            .map(|bytes| {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::CorruptMetadata(key))?;
                Ok(u64::from_le_bytes(raw))
            })
            .transpose()
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or(Error::ColumnFamilyMissing(name))
    }

    /// Current tip.
    pub fn tip(&self) -> BlockHash {
        *self.tip.read()
    }

    /// Number of live coin records.
    pub fn coin_count(&self) -> u64 {
        *self.coin_count.read()
    }

    /// Number of block transitions the rewind log can undo.
    pub fn rewind_depth(&self) -> u64 {
        *self.rewind_seq.read()
    }

    /// Look up a batch of coin records, answered consistently with the
    /// current tip.
    pub fn fetch_coins(&self, txids: &[Txid]) -> Result<FetchCoinsResponse> {
        let cf_coins = self.cf(cf::COINS)?;

        let mut unspent_outputs = Vec::with_capacity(txids.len());
        for txid in txids {
            let record = self
                .db
                .get_cf(cf_coins, txid_to_key(txid))?
                .map(|bytes| UnspentOutputs::decode(&bytes))
                .transpose()?;
            unspent_outputs.push(record);
        }

        Ok(FetchCoinsResponse::new(unspent_outputs, self.tip()))
    }

    /// Commit a block transition: apply the coin changes, append the
    /// matching rewind entry and advance the tip, all in one atomic batch.
    ///
    /// `original_outputs`, when supplied, carries each record's output list
    /// as previously committed (`None` for records that did not exist) and
    /// drives undo-log construction. Without pre-images no rewind entry is
    /// written; the transition cannot be undone.
    pub fn save_changes(
        &self,
        unspent_outputs: Vec<UnspentOutputs>,
        original_outputs: Option<Vec<Option<OutputSnapshot>>>,
        old_block_hash: BlockHash,
        next_block_hash: BlockHash,
    ) -> Result<()> {
        let current = self.tip();
        if current != old_block_hash {
            return Err(Error::TipMismatch {
                provided: old_block_hash,
                current,
            });
        }

        let cf_coins = self.cf(cf::COINS)?;
        let cf_rewind = self.cf(cf::REWIND)?;
        let cf_meta = self.cf(cf::META)?;

        let mut undo = original_outputs
            .is_some()
            .then(|| RewindData::new(old_block_hash));

        // Pair each record with its supplied pre-image before sorting so
        // the positional alignment survives.
        let mut changes: Vec<(UnspentOutputs, Option<Option<OutputSnapshot>>)> =
            match original_outputs {
                Some(originals) => unspent_outputs
                    .into_iter()
                    .zip(originals.into_iter().map(Some))
                    .collect(),
                None => unspent_outputs.into_iter().map(|r| (r, None)).collect(),
            };
        // Deterministic commit order regardless of how the caller's map
        // iterated.
        changes.sort_by_key(|(record, _)| record.txid);

        let mut batch = WriteBatch::default();
        let mut coin_count = self.coin_count();

        for (record, supplied) in changes {
            let key = txid_to_key(&record.txid);
            let previous = match supplied {
                Some(Some(snapshot)) => Some(UnspentOutputs::from_slots(
                    record.txid,
                    record.height,
                    record.is_coinbase,
                    snapshot,
                )),
                Some(None) => None,
                // No pre-image list supplied; consult storage so the coin
                // count stays right even without an undo entry.
                None => self
                    .db
                    .get_cf(cf_coins, key)?
                    .map(|bytes| UnspentOutputs::decode(&bytes))
                    .transpose()?,
            };

            if record.is_prunable() {
                match previous {
                    Some(previous) => {
                        batch.delete_cf(cf_coins, key);
                        if let Some(undo) = undo.as_mut() {
                            undo.record_restored(previous);
                        }
                        coin_count = coin_count.saturating_sub(1);
                    }
                    // Created and fully spent within this transition; no
                    // durable trace to write or undo.
                    None => {}
                }
            } else {
                batch.put_cf(cf_coins, key, record.encode());
                match previous {
                    Some(previous) => {
                        if let Some(undo) = undo.as_mut() {
                            undo.record_restored(previous);
                        }
                    }
                    None => {
                        if let Some(undo) = undo.as_mut() {
                            undo.record_created(record.txid);
                        }
                        coin_count += 1;
                    }
                }
            }
        }

        let seq = self.rewind_depth();
        // Even an empty transition gets an entry when undo data is
        // requested, so every committed block can be walked back.
        let next_seq = match &undo {
            Some(undo) => {
                batch.put_cf(cf_rewind, seq_to_key(seq), undo.encode());
                seq + 1
            }
            None => seq,
        };
        batch.put_cf(cf_meta, meta_keys::TIP, next_block_hash.to_byte_array());
        batch.put_cf(cf_meta, meta_keys::REWIND_SEQ, next_seq.to_le_bytes());
        batch.put_cf(cf_meta, meta_keys::COIN_COUNT, coin_count.to_le_bytes());

        self.db.write(batch)?;

        *self.tip.write() = next_block_hash;
        *self.rewind_seq.write() = next_seq;
        *self.coin_count.write() = coin_count;

        tracing::debug!(
            tip = %next_block_hash,
            rewindable = undo.is_some(),
            coin_count,
            "Committed block transition"
        );

        Ok(())
    }

    /// Undo the most recent committed block transition.
    ///
    /// Pops the highest rewind entry and applies it: created records are
    /// deleted, touched records revert to their pre-images and the tip
    /// moves back one block. With an empty (or unreadable) log the storage
    /// falls back to a full reset to genesis; rewinding at genesis with
    /// nothing to undo is an error.
    pub fn rewind(&self) -> Result<BlockHash> {
        let genesis = genesis_block_hash(self.network);
        let seq = self.rewind_depth();

        if seq == 0 {
            if self.tip() == genesis {
                return Err(Error::NoRewindDataAvailable);
            }
            tracing::warn!(
                tip = %self.tip(),
                "Rewind requested with an empty rewind log; resetting to genesis"
            );
            return self.reset_to_genesis();
        }

        let cf_rewind = self.cf(cf::REWIND)?;
        let last = seq - 1;
        let undo = match self.db.get_cf(cf_rewind, seq_to_key(last))? {
            Some(bytes) => match RewindData::decode(&bytes) {
                Ok(undo) => undo,
                Err(error) => {
                    tracing::warn!(
                        seq = last,
                        %error,
                        "Malformed rewind entry; resetting to genesis"
                    );
                    return self.reset_to_genesis();
                }
            },
            None => {
                tracing::warn!(seq = last, "Missing rewind entry; resetting to genesis");
                return self.reset_to_genesis();
            }
        };

        let cf_coins = self.cf(cf::COINS)?;
        let cf_meta = self.cf(cf::META)?;

        let mut batch = WriteBatch::default();
        let mut coin_count = self.coin_count();

        for txid in &undo.outputs_to_delete {
            let key = txid_to_key(txid);
            if self.db.get_cf(cf_coins, key)?.is_some() {
                coin_count = coin_count.saturating_sub(1);
            }
            batch.delete_cf(cf_coins, key);
        }
        for record in &undo.outputs_to_restore {
            let key = txid_to_key(&record.txid);
            if self.db.get_cf(cf_coins, key)?.is_none() {
                coin_count += 1;
            }
            batch.put_cf(cf_coins, key, record.encode());
        }

        let previous_tip = undo.previous_block_hash;
        batch.delete_cf(cf_rewind, seq_to_key(last));
        batch.put_cf(cf_meta, meta_keys::TIP, previous_tip.to_byte_array());
        batch.put_cf(cf_meta, meta_keys::REWIND_SEQ, last.to_le_bytes());
        batch.put_cf(cf_meta, meta_keys::COIN_COUNT, coin_count.to_le_bytes());

        self.db.write(batch)?;

        *self.tip.write() = previous_tip;
        *self.rewind_seq.write() = last;
        *self.coin_count.write() = coin_count;

        tracing::debug!(
            tip = %previous_tip,
            deleted = undo.delete_count(),
            restored = undo.restore_count(),
            "Rewound one block transition"
        );

        Ok(previous_tip)
    }

    /// Drop every coin record and rewind entry and move the tip back to
    /// genesis. Last-resort recovery when the rewind log cannot answer; the
    /// caller is expected to re-sync from scratch afterwards.
    fn reset_to_genesis(&self) -> Result<BlockHash> {
        let cf_coins = self.cf(cf::COINS)?;
        let cf_rewind = self.cf(cf::REWIND)?;
        let cf_meta = self.cf(cf::META)?;

        let mut batch = WriteBatch::default();
        for entry in self.db.iterator_cf(cf_coins, IteratorMode::Start) {
            let (key, _) = entry?;
            batch.delete_cf(cf_coins, key);
        }
        for entry in self.db.iterator_cf(cf_rewind, IteratorMode::Start) {
            let (key, _) = entry?;
            batch.delete_cf(cf_rewind, key);
        }

        let genesis = genesis_block_hash(self.network);
        batch.put_cf(cf_meta, meta_keys::TIP, genesis.to_byte_array());
        batch.put_cf(cf_meta, meta_keys::REWIND_SEQ, 0u64.to_le_bytes());
        batch.put_cf(cf_meta, meta_keys::COIN_COUNT, 0u64.to_le_bytes());

        self.db.write(batch)?;

        *self.tip.write() = genesis;
        *self.rewind_seq.write() = 0;
        *self.coin_count.write() = 0;

        Ok(genesis)
    }

    /// Create a new storage in a temporary directory for testing.
    #[cfg(test)]
    pub fn open_temp() -> Result<(Self, tempfile::TempDir)> {
        let temp_dir = tempfile::tempdir().map_err(Error::Io)?;
        let storage = Self::open(temp_dir.path(), Network::Regtest)?;
        Ok((storage, temp_dir))
    }

    /// Overwrite the top rewind entry with garbage.
    #[cfg(test)]
    pub fn corrupt_top_rewind_entry(&self) -> Result<()> {
        let cf_rewind = self.cf(cf::REWIND)?;
        let last = self.rewind_depth().saturating_sub(1);
        self.db.put_cf(cf_rewind, seq_to_key(last), [0xde, 0xad])?;
        Ok(())
    }
}
