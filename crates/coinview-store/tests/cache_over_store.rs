//! Full-stack tests: write-back cache layered over the durable store.

use bitcoin::hashes::Hash;
use bitcoin::{Amount, BlockHash, Network, ScriptBuf, TxOut, Txid};
use coinview::{CacheConfig, CachedCoinView, CoinView, CoinViewError, CoinViewStack};
use coinview_primitives::{UnspentOutputs, genesis_block_hash};
use coinview_store::DurableCoinView;
use std::sync::Arc;

fn hash(byte: u8) -> BlockHash {
    BlockHash::from_byte_array([byte; 32])
}

fn txid(byte: u8) -> Txid {
    Txid::from_byte_array([byte; 32])
}

fn txout(sats: u64) -> TxOut {
    TxOut {
        value: Amount::from_sat(sats),
        script_pubkey: ScriptBuf::new_p2pkh(&bitcoin::PubkeyHash::all_zeros()),
    }
}

fn full_coins(id: u8, outputs: &[u64]) -> UnspentOutputs {
    UnspentOutputs::new(
        txid(id),
        1,
        false,
        outputs.iter().map(|sats| txout(*sats)).collect(),
    )
}

fn genesis() -> BlockHash {
    genesis_block_hash(Network::Regtest)
}

async fn seeded_cache(store: Arc<DurableCoinView>) -> CachedCoinView {
    CachedCoinView::new(
        store,
        CacheConfig {
            max_cache_items: 100_000,
            eviction_seed: Some(1),
        },
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn flushed_changes_are_visible_to_a_cold_cache() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DurableCoinView::open(dir.path(), Network::Regtest).unwrap());

    let cache = seeded_cache(store.clone()).await;
    cache
        .save_changes(vec![full_coins(1, &[50, 50])], None, genesis(), hash(1))
        .await
        .unwrap();
    let mut spent = full_coins(1, &[50, 50]);
    spent.spend(0);
    cache
        .save_changes(vec![spent, full_coins(2, &[10])], None, hash(1), hash(2))
        .await
        .unwrap();
    cache.flush().await.unwrap();

    // A second cache over the same store starts empty and must see the
    // committed state through fetch misses.
    let cold = seeded_cache(store.clone()).await;
    let response = cold.fetch_coins(&[txid(1), txid(2)]).await.unwrap();
    assert_eq!(response.block_hash, hash(2));
    let t1 = response.unspent_outputs[0].as_ref().unwrap();
    assert!(t1.outputs[0].is_none());
    assert_eq!(t1.outputs[1].as_ref().unwrap().value.to_sat(), 50);
    assert_eq!(response.unspent_outputs[1].as_ref().unwrap().spendable_count(), 1);
}

#[tokio::test]
async fn rewind_after_flush_restores_durable_pre_images() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DurableCoinView::open(dir.path(), Network::Regtest).unwrap());
    let cache = seeded_cache(store.clone()).await;

    cache
        .save_changes(vec![full_coins(1, &[50, 50])], None, genesis(), hash(1))
        .await
        .unwrap();
    cache.flush().await.unwrap();

    let mut spent = full_coins(1, &[50, 50]);
    spent.spend(0);
    cache
        .save_changes(vec![spent], None, hash(1), hash(2))
        .await
        .unwrap();
    cache.flush().await.unwrap();

    // Both tips agree, so the rewind delegates to the store's undo log.
    let tip = cache.rewind().await.unwrap();
    assert_eq!(tip, hash(1));

    let response = cache.fetch_coins(&[txid(1)]).await.unwrap();
    assert_eq!(response.block_hash, hash(1));
    assert!(response.unspent_outputs[0].as_ref().unwrap().is_fully_unspent());

    // One more rewind lands back on genesis; a further one has nothing
    // left to undo.
    assert_eq!(cache.rewind().await.unwrap(), genesis());
    let err = cache.rewind().await.unwrap_err();
    assert!(matches!(err, CoinViewError::NoRewindDataAvailable));
}

#[tokio::test]
async fn unflushed_rewind_never_touches_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DurableCoinView::open(dir.path(), Network::Regtest).unwrap());
    let cache = seeded_cache(store.clone()).await;

    cache
        .save_changes(vec![full_coins(1, &[50])], None, genesis(), hash(1))
        .await
        .unwrap();

    assert_eq!(cache.rewind().await.unwrap(), genesis());

    // The store was never advanced, so it still has nothing to undo.
    let err = store.rewind().await.unwrap_err();
    assert!(matches!(err, CoinViewError::NoRewindDataAvailable));
    let response = store.fetch_coins(&[txid(1)]).await.unwrap();
    assert_eq!(response.block_hash, genesis());
    assert!(response.unspent_outputs[0].is_none());
}

#[tokio::test]
async fn stack_exposes_both_layers() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DurableCoinView::open(dir.path(), Network::Regtest).unwrap());
    let cache = seeded_cache(store.clone()).await;
    let stack = CoinViewStack::new(Arc::new(cache));

    assert_eq!(stack.layers().count(), 2);
    assert!(stack.find::<CachedCoinView>().is_some());

    let durable = stack.find::<DurableCoinView>().unwrap();
    let response = durable.fetch_coins(&[]).await.unwrap();
    assert_eq!(response.block_hash, genesis());

    let bottom = stack.bottom();
    assert!(bottom.as_any().downcast::<DurableCoinView>().is_ok());
}
