//! Single-writer worker around [`CoinStorage`].
//!
//! All RocksDB access funnels through one dedicated thread that owns the
//! storage; async callers hold a cheap cloneable handle and get replies
//! over oneshot channels. Mutations are thereby serialized without any
//! lock spanning an await point.

use crate::{CoinStorage, Error};
use bitcoin::{BlockHash, Network, Txid};
use coinview::{CoinView, CoinViewError};
use coinview_primitives::{FetchCoinsResponse, OutputSnapshot, UnspentOutputs};
use std::any::Any;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Requests processed by the storage worker, in arrival order.
enum StoreRequest {
    FetchCoins {
        txids: Vec<Txid>,
        reply: oneshot::Sender<crate::Result<FetchCoinsResponse>>,
    },
    SaveChanges {
        unspent_outputs: Vec<UnspentOutputs>,
        original_outputs: Option<Vec<Option<OutputSnapshot>>>,
        old_block_hash: BlockHash,
        next_block_hash: BlockHash,
        reply: oneshot::Sender<crate::Result<()>>,
    },
    Rewind {
        reply: oneshot::Sender<crate::Result<BlockHash>>,
    },
}

fn worker_loop(storage: CoinStorage, mut request_rx: mpsc::UnboundedReceiver<StoreRequest>) {
    while let Some(request) = request_rx.blocking_recv() {
        // A dropped reply receiver just means the caller gave up waiting.
        match request {
            StoreRequest::FetchCoins { txids, reply } => {
                let _ = reply.send(storage.fetch_coins(&txids));
            }
            StoreRequest::SaveChanges {
                unspent_outputs,
                original_outputs,
                old_block_hash,
                next_block_hash,
                reply,
            } => {
                let _ = reply.send(storage.save_changes(
                    unspent_outputs,
                    original_outputs,
                    old_block_hash,
                    next_block_hash,
                ));
            }
            StoreRequest::Rewind { reply } => {
                let _ = reply.send(storage.rewind());
            }
        }
    }
    tracing::debug!("Coin storage worker shut down");
}

/// Async handle to RocksDB-backed coin storage.
///
/// The bottom layer of a coin-view stack. Dropping the last handle closes
/// the request channel, which stops the worker and closes the database.
#[derive(Clone)]
pub struct DurableCoinView {
    request_tx: mpsc::UnboundedSender<StoreRequest>,
}

impl DurableCoinView {
    /// Open the storage at `path` and spawn its worker thread.
    pub fn open(path: &Path, network: Network) -> crate::Result<Self> {
        let storage = CoinStorage::open(path, network)?;
        Self::spawn(storage)
    }

    /// Spawn a worker around an already opened storage.
    pub fn spawn(storage: CoinStorage) -> crate::Result<Self> {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("coin-store".into())
            .spawn(move || worker_loop(storage, request_rx))
            .map_err(Error::Io)?;
        Ok(Self { request_tx })
    }

    async fn request<T>(
        &self,
        request: StoreRequest,
        reply_rx: oneshot::Receiver<crate::Result<T>>,
    ) -> coinview::Result<T> {
        self.request_tx
            .send(request)
            .map_err(|_| CoinViewError::BackendGone)?;
        reply_rx
            .await
            .map_err(|_| CoinViewError::BackendGone)?
            .map_err(Error::into)
    }
}

#[async_trait::async_trait]
impl CoinView for DurableCoinView {
    async fn fetch_coins(&self, txids: &[Txid]) -> coinview::Result<FetchCoinsResponse> {
        let (reply, reply_rx) = oneshot::channel();
        self.request(
            StoreRequest::FetchCoins {
                txids: txids.to_vec(),
                reply,
            },
            reply_rx,
        )
        .await
    }

    async fn save_changes(
        &self,
        unspent_outputs: Vec<UnspentOutputs>,
        original_outputs: Option<Vec<Option<OutputSnapshot>>>,
        old_block_hash: BlockHash,
        next_block_hash: BlockHash,
    ) -> coinview::Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.request(
            StoreRequest::SaveChanges {
                unspent_outputs,
                original_outputs,
                old_block_hash,
                next_block_hash,
                reply,
            },
            reply_rx,
        )
        .await
    }

    async fn rewind(&self) -> coinview::Result<BlockHash> {
        let (reply, reply_rx) = oneshot::channel();
        self.request(StoreRequest::Rewind { reply }, reply_rx).await
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
