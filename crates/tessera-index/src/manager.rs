//! Index manager: the boundary between the chain engine and the indexes.
//!
//! Every installed [`Indexer`] is created once, initialised at startup, and
//! then told about each connected or disconnected block inside the same
//! write transaction as the chain's own state change. The manager records
//! each index's tip (`hash || order`) in the `index_tips` namespace and
//! rejects blocks that do not extend (or, on disconnect, are not) that tip.
//!
//! Indexes being dropped carry a marker in `index_drops`; [`IndexManager::init`]
//! finishes any such drop before touching installed indexes.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use tessera_core::types::{Block, Hash256, UtxoViewpoint};

use crate::block_index::{BlockIndex, TopologyIndexer};
use crate::config::IndexConfig;
use crate::drop;
use crate::error::IndexError;
use crate::interrupt::Interrupt;
use crate::kv::{ensure_namespace, KeyValueStore, ReadTx, WriteTx};
use crate::tx_index::{TxIndex, TX_INDEX_KEY};

/// Namespace mapping index key to `tip hash (32) || order (u32 BE)`.
pub const INDEX_TIPS_NS: &str = "index_tips";
/// Namespace holding one key per index whose drop has not finished.
pub const INDEX_DROPS_NS: &str = "index_drops";

const TIP_RECORD_SIZE: usize = 36;

/// An optional index maintained alongside the chain.
///
/// Implementations keep a handle to the store for [`init`](Self::init);
/// every other method works inside the caller's transaction.
pub trait Indexer: Send + Sync {
    /// Stable key under which the index's tip and drop marker are stored.
    fn key(&self) -> &'static str;

    /// Human-readable name for logs.
    fn name(&self) -> &'static str;

    /// Allocate the index's namespaces. Called exactly once per index.
    fn create(&self, tx: &mut dyn WriteTx) -> Result<(), IndexError>;

    /// Load in-memory state from the store.
    fn init(&self, interrupt: &Interrupt) -> Result<(), IndexError>;

    /// Record a newly connected block.
    fn connect_block(
        &self,
        tx: &mut dyn WriteTx,
        block: &Block,
        parent: Option<&Block>,
        view: &UtxoViewpoint,
    ) -> Result<(), IndexError>;

    /// Remove the most recently connected block.
    fn disconnect_block(
        &self,
        tx: &mut dyn WriteTx,
        block: &Block,
        parent: Option<&Block>,
        view: &UtxoViewpoint,
    ) -> Result<(), IndexError>;

    /// The transaction holding the connects and disconnects since the last
    /// commit or rollback was committed.
    fn commit(&self) {}

    /// The transaction holding the connects and disconnects since the last
    /// commit or rollback was discarded. Undo their in-memory effects.
    fn rollback(&self) {}
}

/// The tip recorded for `key`: hash of the last connected block and the
/// number of blocks connected.
pub fn index_tip<R: ReadTx + ?Sized>(tx: &R, key: &str) -> Result<Option<(Hash256, u32)>, IndexError> {
    if !tx.namespace_exists(INDEX_TIPS_NS)? {
        return Ok(None);
    }
    let Some(bytes) = tx.get(INDEX_TIPS_NS, key.as_bytes())? else {
        return Ok(None);
    };
    if bytes.len() != TIP_RECORD_SIZE {
        return Err(IndexError::corruption(
            key,
            format!("index tip is {} bytes, expected {TIP_RECORD_SIZE}", bytes.len()),
        ));
    }
    let hash = Hash256::from_slice(&bytes[..32])
        .ok_or_else(|| IndexError::corruption(key, "index tip hash is malformed"))?;
    let order: [u8; 4] = bytes[32..]
        .try_into()
        .map_err(|_| IndexError::corruption(key, "index tip order is malformed"))?;
    Ok(Some((hash, u32::from_be_bytes(order))))
}

/// Record the tip for `key`.
pub fn put_index_tip<W: WriteTx + ?Sized>(
    tx: &mut W,
    key: &str,
    hash: &Hash256,
    order: u32,
) -> Result<(), IndexError> {
    let mut record = [0u8; TIP_RECORD_SIZE];
    record[..32].copy_from_slice(hash.as_bytes());
    record[32..].copy_from_slice(&order.to_be_bytes());
    tx.put(INDEX_TIPS_NS, key.as_bytes(), &record)?;
    Ok(())
}

/// Whether the index stored under `key` exists (has a tip).
pub fn exists_index<S: KeyValueStore + ?Sized>(store: &S, key: &str) -> Result<bool, IndexError> {
    store.view(|tx| Ok(index_tip(tx, key)?.is_some()))
}

/// Durably mark `key` as being dropped.
pub fn mark_index_deletion<W: WriteTx + ?Sized>(tx: &mut W, key: &str) -> Result<(), IndexError> {
    ensure_namespace(tx, INDEX_DROPS_NS)?;
    tx.put(INDEX_DROPS_NS, key.as_bytes(), &[])?;
    Ok(())
}

/// Whether a drop of `key` was started and has not finished.
pub fn drop_in_progress<S: KeyValueStore + ?Sized>(store: &S, key: &str) -> Result<bool, IndexError> {
    store.view(|tx| {
        if !tx.namespace_exists(INDEX_DROPS_NS)? {
            return Ok(false);
        }
        Ok(tx.get(INDEX_DROPS_NS, key.as_bytes())?.is_some())
    })
}

/// Keys of all unfinished drops.
pub fn pending_drops<S: KeyValueStore + ?Sized>(store: &S) -> Result<Vec<String>, IndexError> {
    store.view(|tx| {
        if !tx.namespace_exists(INDEX_DROPS_NS)? {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        let mut cursor: Option<Vec<u8>> = None;
        loop {
            let rows = tx.range(INDEX_DROPS_NS, cursor.as_deref(), 64)?;
            let Some((last, _)) = rows.last() else {
                break;
            };
            let mut next = last.clone();
            next.push(0);
            for (key, _) in &rows {
                let key = String::from_utf8(key.clone())
                    .map_err(|_| IndexError::corruption(INDEX_DROPS_NS, "drop marker key is not UTF-8"))?;
                keys.push(key);
            }
            cursor = Some(next);
        }
        Ok(keys)
    })
}

/// Sequences index maintenance for the chain engine.
pub struct IndexManager<S: KeyValueStore> {
    store: Arc<S>,
    indexers: Vec<Arc<dyn Indexer>>,
    tx_index: Option<Arc<TxIndex<S>>>,
    config: IndexConfig,
    /// Held across each block transaction and its commit or rollback.
    block_lock: Mutex<()>,
}

impl<S: KeyValueStore + 'static> IndexManager<S> {
    /// A manager with no indexes installed.
    pub fn new(store: Arc<S>, config: IndexConfig) -> Self {
        Self {
            store,
            indexers: Vec::new(),
            tx_index: None,
            config,
            block_lock: Mutex::new(()),
        }
    }

    /// A manager with the block topology index and, if enabled, the
    /// transaction location index.
    pub fn with_default_indexes(store: Arc<S>, config: IndexConfig, topology: Arc<BlockIndex>) -> Self {
        let mut manager = Self::new(Arc::clone(&store), config);
        if manager.config.tx_index {
            let tx_index = Arc::new(TxIndex::with_scan_step(Arc::clone(&store), manager.config.locator_scan_step));
            manager.tx_index = Some(Arc::clone(&tx_index));
            manager.add_indexer(tx_index);
        }
        manager.add_indexer(Arc::new(TopologyIndexer::new(store, topology)));
        manager
    }

    /// Install an index. Indexes are connected in installation order and
    /// disconnected in reverse.
    pub fn add_indexer(&mut self, indexer: Arc<dyn Indexer>) {
        self.indexers.push(indexer);
    }

    /// The transaction location index, if installed by
    /// [`with_default_indexes`](Self::with_default_indexes).
    pub fn tx_index(&self) -> Option<&Arc<TxIndex<S>>> {
        self.tx_index.as_ref()
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Prepare every index for use.
    ///
    /// Finishes interrupted drops, drops the transaction index if it has been
    /// disabled, creates missing indexes, then initialises each one. Any
    /// failure aborts startup.
    pub fn init(&self, interrupt: &Interrupt) -> Result<(), IndexError> {
        self.store.update(|tx| -> Result<(), IndexError> {
            ensure_namespace(tx, INDEX_TIPS_NS)?;
            ensure_namespace(tx, INDEX_DROPS_NS)?;
            Ok(())
        })?;

        for key in pending_drops(&*self.store)? {
            warn!(index = %key, "resuming interrupted index drop");
            drop::drop_index_by_key(&*self.store, &key, self.config.drop_batch_size, interrupt)?;
        }

        if !self.config.tx_index && exists_index(&*self.store, TX_INDEX_KEY)? {
            info!("transaction index disabled, dropping it");
            drop::drop_tx_index(&*self.store, self.config.drop_batch_size, interrupt)?;
        }

        for indexer in &self.indexers {
            if exists_index(&*self.store, indexer.key())? {
                continue;
            }
            self.store.update(|tx| -> Result<(), IndexError> {
                indexer.create(tx)?;
                put_index_tip(tx, indexer.key(), &Hash256::ZERO, 0)
            })?;
            info!(index = indexer.name(), "created index");
        }

        for indexer in &self.indexers {
            interrupt.check()?;
            indexer.init(interrupt)?;
            debug!(index = indexer.name(), "index initialised");
        }
        Ok(())
    }

    /// Connect `block` to every index in its own write transaction.
    ///
    /// If the transaction fails, the in-memory effects of this block are
    /// undone before the error is returned.
    pub fn connect_block(
        &self,
        block: &Block,
        parent: Option<&Block>,
        view: &UtxoViewpoint,
    ) -> Result<(), IndexError> {
        let _guard = self.block_lock.lock();
        let result = self
            .store
            .update(|tx| self.connect_block_in(tx, block, parent, view));
        self.finish(result)
    }

    /// Disconnect `block` from every index in its own write transaction.
    pub fn disconnect_block(
        &self,
        block: &Block,
        parent: Option<&Block>,
        view: &UtxoViewpoint,
    ) -> Result<(), IndexError> {
        let _guard = self.block_lock.lock();
        let result = self
            .store
            .update(|tx| self.disconnect_block_in(tx, block, parent, view));
        self.finish(result)
    }

    /// Connect `block` inside a caller-owned transaction.
    ///
    /// Once that transaction finishes the caller must call
    /// [`commit_pending`](Self::commit_pending) or
    /// [`rollback_pending`](Self::rollback_pending).
    pub fn connect_block_in(
        &self,
        tx: &mut dyn WriteTx,
        block: &Block,
        parent: Option<&Block>,
        view: &UtxoViewpoint,
    ) -> Result<(), IndexError> {
        let hash = block.hash();
        for indexer in &self.indexers {
            let (tip, order) = required_tip(tx, indexer.as_ref())?;
            if tip != block.header.prev_hash {
                return Err(IndexError::Usage(format!(
                    "{}: block {hash} does not extend index tip {tip}",
                    indexer.name()
                )));
            }
            let next_order = order
                .checked_add(1)
                .ok_or_else(|| IndexError::Usage(format!("{}: block order overflow", indexer.name())))?;

            indexer.connect_block(tx, block, parent, view)?;
            put_index_tip(tx, indexer.key(), &hash, next_order)?;
        }
        Ok(())
    }

    /// Disconnect `block` inside a caller-owned transaction. The same
    /// commit/rollback rule as [`connect_block_in`](Self::connect_block_in)
    /// applies.
    pub fn disconnect_block_in(
        &self,
        tx: &mut dyn WriteTx,
        block: &Block,
        parent: Option<&Block>,
        view: &UtxoViewpoint,
    ) -> Result<(), IndexError> {
        let hash = block.hash();
        for indexer in self.indexers.iter().rev() {
            let (tip, order) = required_tip(tx, indexer.as_ref())?;
            if tip != hash {
                return Err(IndexError::Usage(format!(
                    "{}: block {hash} is not the index tip {tip}",
                    indexer.name()
                )));
            }
            let prev_order = order
                .checked_sub(1)
                .ok_or_else(|| IndexError::corruption(indexer.key(), "index tip has order 0"))?;

            indexer.disconnect_block(tx, block, parent, view)?;
            put_index_tip(tx, indexer.key(), &block.header.prev_hash, prev_order)?;
        }
        Ok(())
    }

    /// Keep the in-memory effects of blocks applied through the `_in`
    /// methods; their transaction committed.
    pub fn commit_pending(&self) {
        for indexer in &self.indexers {
            indexer.commit();
        }
    }

    /// Undo the in-memory effects of blocks applied through the `_in`
    /// methods; their transaction was rolled back.
    pub fn rollback_pending(&self) {
        for indexer in self.indexers.iter().rev() {
            indexer.rollback();
        }
    }

    /// Uninstall the transaction location index and drop it with its
    /// dependents. The remaining indexes keep accepting blocks.
    pub fn drop_tx_index(&mut self, interrupt: &Interrupt) -> Result<(), IndexError> {
        if self.tx_index.take().is_some() {
            self.indexers.retain(|indexer| indexer.key() != TX_INDEX_KEY);
            self.config.tx_index = false;
            info!("transaction index uninstalled");
        }
        drop::drop_tx_index(&*self.store, self.config.drop_batch_size, interrupt)
    }

    fn finish(&self, result: Result<(), IndexError>) -> Result<(), IndexError> {
        match &result {
            Ok(()) => self.commit_pending(),
            Err(e) => {
                warn!("index transaction failed, undoing in-memory changes: {e}");
                self.rollback_pending();
            }
        }
        result
    }
}

fn required_tip(tx: &dyn WriteTx, indexer: &dyn Indexer) -> Result<(Hash256, u32), IndexError> {
    index_tip(tx, indexer.key())?
        .ok_or_else(|| IndexError::Usage(format!("{} has not been created", indexer.name())))
}
