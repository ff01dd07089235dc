//! In-memory block topology: block nodes keyed by hash and the current
//! chain tips.
//!
//! Nodes refer to their parent by hash, never by pointer. A node is a chain
//! tip while no added node names it as parent. One reader/writer lock covers
//! the node map, the tip set, and the child counts; every public method
//! takes it exactly once and does no I/O while holding it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use tessera_core::types::{Block, Hash256, UtxoViewpoint};

use crate::error::IndexError;
use crate::interrupt::Interrupt;
use crate::kv::{KeyValueStore, ReadTx, WriteTx};
use crate::manager::Indexer;

/// Key of the topology index in the index tip and drop namespaces.
pub const TOPOLOGY_INDEX_KEY: &str = "block_topology";
const TOPOLOGY_INDEX_NAME: &str = "block topology index";

/// Block hash → `parent (32) || height (u64 BE) || status (1)`.
pub const BLOCK_NODES_NS: &str = "block_nodes";

const NODE_RECORD_SIZE: usize = 41;
const LOAD_PAGE_SIZE: usize = 1024;

bitflags! {
    /// Validation state of a block node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BlockStatus: u8 {
        /// Full block data is in the block store.
        const DATA_STORED      = 0b0000_0001;
        /// Block passed full validation.
        const VALID            = 0b0000_0010;
        /// Block failed validation.
        const VALIDATE_FAILED  = 0b0000_0100;
        /// An ancestor failed validation.
        const INVALID_ANCESTOR = 0b0000_1000;
        /// All ancestors are present in the index.
        const FULLY_LINKED     = 0b0001_0000;
    }
}

impl BlockStatus {
    /// Whether the block or one of its ancestors failed validation.
    pub fn is_invalid(self) -> bool {
        self.intersects(Self::VALIDATE_FAILED | Self::INVALID_ANCESTOR)
    }
}

/// One block in the topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockNode {
    pub hash: Hash256,
    /// Parent hash; `None` for genesis.
    pub parent: Option<Hash256>,
    pub height: u64,
    pub status: BlockStatus,
}

impl BlockNode {
    pub fn new(hash: Hash256, parent: Option<Hash256>, height: u64, status: BlockStatus) -> Self {
        Self {
            hash,
            parent,
            height,
            status,
        }
    }

    fn encode(&self) -> [u8; NODE_RECORD_SIZE] {
        let mut out = [0u8; NODE_RECORD_SIZE];
        out[..32].copy_from_slice(self.parent.unwrap_or(Hash256::ZERO).as_bytes());
        out[32..40].copy_from_slice(&self.height.to_be_bytes());
        out[40] = self.status.bits();
        out
    }

    fn decode(hash: Hash256, bytes: &[u8]) -> Result<Self, IndexError> {
        if bytes.len() != NODE_RECORD_SIZE {
            return Err(IndexError::corruption(
                hash,
                format!("block node is {} bytes, expected {NODE_RECORD_SIZE}", bytes.len()),
            ));
        }
        let parent = Hash256::from_slice(&bytes[..32])
            .ok_or_else(|| IndexError::corruption(hash, "block node parent is malformed"))?;
        let height: [u8; 8] = bytes[32..40]
            .try_into()
            .map_err(|_| IndexError::corruption(hash, "block node height is malformed"))?;
        let status = BlockStatus::from_bits(bytes[40])
            .ok_or_else(|| IndexError::corruption(hash, format!("unknown status bits {:#04x}", bytes[40])))?;
        Ok(Self {
            hash,
            parent: (!parent.is_zero()).then_some(parent),
            height: u64::from_be_bytes(height),
            status,
        })
    }
}

#[derive(Debug, Default)]
struct BlockIndexInner {
    index: HashMap<Hash256, BlockNode>,
    /// Height → nodes at that height with no child. Order within a height is
    /// not significant.
    chain_tips: BTreeMap<u64, Vec<Hash256>>,
    /// Number of indexed children per parent hash.
    children: HashMap<Hash256, usize>,
    /// Nodes whose status changed since the last flush.
    dirty: HashSet<Hash256>,
}

impl BlockIndexInner {
    fn add_tip(&mut self, hash: Hash256, height: u64) {
        self.chain_tips.entry(height).or_default().push(hash);
    }

    fn remove_tip(&mut self, hash: &Hash256, height: u64) {
        let Some(tips) = self.chain_tips.get_mut(&height) else {
            return;
        };
        if let Some(pos) = tips.iter().position(|tip| tip == hash) {
            tips.swap_remove(pos);
        }
        if tips.is_empty() {
            self.chain_tips.remove(&height);
        }
    }

    fn insert(&mut self, node: BlockNode, mark_dirty: bool) {
        self.add_tip(node.hash, node.height);
        if let Some(parent) = node.parent {
            if let Some(parent_height) = self.index.get(&parent).map(|p| p.height) {
                self.remove_tip(&parent, parent_height);
            }
            *self.children.entry(parent).or_default() += 1;
        }
        if mark_dirty {
            self.dirty.insert(node.hash);
        }
        self.index.insert(node.hash, node);
    }
}

/// Concurrency-safe block topology.
#[derive(Debug, Default)]
pub struct BlockIndex {
    inner: RwLock<BlockIndexInner>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. It becomes a chain tip and its parent, if indexed, stops
    /// being one. Adding the same hash twice is a caller error.
    pub fn add_node(&self, node: BlockNode) {
        self.inner.write().insert(node, true);
    }

    /// Remove the node `hash`, which must be a chain tip.
    ///
    /// Its parent becomes a tip again unless another child remains.
    pub fn remove_tip_node(&self, hash: &Hash256) -> Result<BlockNode, IndexError> {
        let mut inner = self.inner.write();
        if inner.children.get(hash).is_some_and(|&n| n > 0) {
            return Err(IndexError::Usage(format!("block {hash} has children and is not a tip")));
        }
        let node = inner
            .index
            .remove(hash)
            .ok_or_else(|| IndexError::Usage(format!("block {hash} is not in the topology index")))?;
        inner.remove_tip(hash, node.height);
        inner.dirty.remove(hash);
        inner.children.remove(hash);

        if let Some(parent) = node.parent {
            let remaining = match inner.children.get_mut(&parent) {
                Some(count) => {
                    *count = count.saturating_sub(1);
                    *count
                }
                None => 0,
            };
            if remaining == 0 {
                inner.children.remove(&parent);
                if let Some(parent_height) = inner.index.get(&parent).map(|p| p.height) {
                    inner.add_tip(parent, parent_height);
                }
            }
        }
        Ok(node)
    }

    /// A copy of the node `hash`.
    pub fn lookup_node(&self, hash: &Hash256) -> Option<BlockNode> {
        self.inner.read().index.get(hash).cloned()
    }

    pub fn have_block(&self, hash: &Hash256) -> bool {
        self.inner.read().index.contains_key(hash)
    }

    pub fn node_status(&self, hash: &Hash256) -> Option<BlockStatus> {
        self.inner.read().index.get(hash).map(|node| node.status)
    }

    /// Whether any indexed node names `hash` as parent.
    pub fn has_children(&self, hash: &Hash256) -> bool {
        self.inner.read().children.get(hash).is_some_and(|&n| n > 0)
    }

    /// Set `flags` on the node `hash`, leaving other bits untouched.
    /// Returns `false` if the node is unknown.
    pub fn set_status_flags(&self, hash: &Hash256, flags: BlockStatus) -> bool {
        let mut inner = self.inner.write();
        let Some(node) = inner.index.get_mut(hash) else {
            return false;
        };
        node.status.insert(flags);
        inner.dirty.insert(*hash);
        true
    }

    /// Clear `flags` on the node `hash`, leaving other bits untouched.
    /// Returns `false` if the node is unknown.
    pub fn unset_status_flags(&self, hash: &Hash256, flags: BlockStatus) -> bool {
        let mut inner = self.inner.write();
        let Some(node) = inner.index.get_mut(hash) else {
            return false;
        };
        node.status.remove(flags);
        inner.dirty.insert(*hash);
        true
    }

    /// All chain tips, lowest height first.
    pub fn chain_tips(&self) -> Vec<Hash256> {
        self.inner
            .read()
            .chain_tips
            .values()
            .flat_map(|tips| tips.iter().copied())
            .collect()
    }

    /// Chain tips at `height`.
    pub fn tips_at(&self, height: u64) -> Vec<Hash256> {
        self.inner
            .read()
            .chain_tips
            .get(&height)
            .cloned()
            .unwrap_or_default()
    }

    pub fn tip_count(&self) -> usize {
        self.inner.read().chain_tips.values().map(Vec::len).sum()
    }

    pub fn len(&self) -> usize {
        self.inner.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().index.is_empty()
    }

    /// Remove every node.
    pub fn clear(&self) {
        *self.inner.write() = BlockIndexInner::default();
    }

    /// Write every node whose status changed since the last flush into `tx`.
    /// Returns the nodes written.
    ///
    /// The dirty set is left as is; call [`mark_flushed`](Self::mark_flushed)
    /// with the returned nodes once `tx` has committed.
    pub fn flush<W: WriteTx + ?Sized>(&self, tx: &mut W) -> Result<Vec<BlockNode>, IndexError> {
        let nodes: Vec<BlockNode> = {
            let inner = self.inner.read();
            inner
                .dirty
                .iter()
                .filter_map(|hash| inner.index.get(hash).cloned())
                .collect()
        };
        for node in &nodes {
            tx.put(BLOCK_NODES_NS, node.hash.as_bytes(), &node.encode())?;
        }
        Ok(nodes)
    }

    /// Clear the dirty mark of each flushed node whose status has not changed
    /// again since it was written.
    pub fn mark_flushed(&self, nodes: &[BlockNode]) {
        let mut inner = self.inner.write();
        for node in nodes {
            if inner.index.get(&node.hash).is_some_and(|current| current.status == node.status) {
                inner.dirty.remove(&node.hash);
            }
        }
    }

    /// Whether `hash` has a status change not yet flushed.
    pub fn is_dirty(&self, hash: &Hash256) -> bool {
        self.inner.read().dirty.contains(hash)
    }
}

/// In-memory change made by a connect or disconnect whose transaction has
/// not finished yet.
#[derive(Debug)]
enum TopologyChange {
    Added { hash: Hash256, flushed: Vec<BlockNode> },
    Removed { node: BlockNode, dirty: bool },
}

/// Persists a [`BlockIndex`] and keeps it in step with connected blocks.
///
/// Connects and disconnects update the in-memory topology straight away and
/// log the change; [`Indexer::rollback`] undoes exactly the logged changes.
pub struct TopologyIndexer<S> {
    store: Arc<S>,
    index: Arc<BlockIndex>,
    pending: Mutex<Vec<TopologyChange>>,
}

impl<S: KeyValueStore> TopologyIndexer<S> {
    pub fn new(store: Arc<S>, index: Arc<BlockIndex>) -> Self {
        Self {
            store,
            index,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn block_index(&self) -> &Arc<BlockIndex> {
        &self.index
    }

    /// Persist pending status changes in their own transaction. Returns the
    /// number of nodes written.
    pub fn flush(&self) -> Result<usize, IndexError> {
        let nodes = self.store.update(|tx| self.index.flush(tx))?;
        self.index.mark_flushed(&nodes);
        Ok(nodes.len())
    }
}

impl<S: KeyValueStore> Indexer for TopologyIndexer<S> {
    fn key(&self) -> &'static str {
        TOPOLOGY_INDEX_KEY
    }

    fn name(&self) -> &'static str {
        TOPOLOGY_INDEX_NAME
    }

    fn create(&self, tx: &mut dyn WriteTx) -> Result<(), IndexError> {
        tx.create_namespace(BLOCK_NODES_NS)?;
        Ok(())
    }

    /// Rebuild the in-memory topology from the persisted node records.
    fn init(&self, interrupt: &Interrupt) -> Result<(), IndexError> {
        let mut nodes = self.store.view(|tx| load_nodes(tx, interrupt))?;
        nodes.sort_by_key(|node| node.height);

        let known: HashSet<Hash256> = nodes.iter().map(|node| node.hash).collect();
        if let Some(orphan) = nodes
            .iter()
            .find(|node| node.parent.is_some_and(|parent| !known.contains(&parent)))
        {
            return Err(IndexError::corruption(orphan.hash, "parent block node is missing"));
        }

        let count = nodes.len();
        self.pending.lock().clear();
        {
            let mut inner = self.index.inner.write();
            *inner = BlockIndexInner::default();
            for node in nodes {
                inner.insert(node, false);
            }
        }
        debug!(nodes = count, tips = self.index.tip_count(), "loaded block topology");
        Ok(())
    }

    fn connect_block(
        &self,
        tx: &mut dyn WriteTx,
        block: &Block,
        parent: Option<&Block>,
        _view: &UtxoViewpoint,
    ) -> Result<(), IndexError> {
        let hash = block.hash();
        let prev = block.header.prev_hash;
        if let Some(parent) = parent {
            if parent.hash() != prev {
                return Err(IndexError::Usage(format!(
                    "block {hash} does not build on supplied parent {}",
                    parent.hash()
                )));
            }
        }
        if self.index.have_block(&hash) {
            return Err(IndexError::Usage(format!("block {hash} is already in the topology index")));
        }

        let (parent_hash, height) = if prev.is_zero() {
            (None, 0)
        } else {
            let parent_node = self
                .index
                .lookup_node(&prev)
                .ok_or_else(|| IndexError::Usage(format!("parent {prev} of block {hash} is not indexed")))?;
            (Some(prev), parent_node.height + 1)
        };

        let node = BlockNode::new(hash, parent_hash, height, BlockStatus::DATA_STORED | BlockStatus::VALID);
        tx.put(BLOCK_NODES_NS, hash.as_bytes(), &node.encode())?;
        let flushed = self.index.flush(tx)?;
        self.index.inner.write().insert(node, false);
        self.pending.lock().push(TopologyChange::Added { hash, flushed });
        trace!(%hash, height, "added block node");
        Ok(())
    }

    fn disconnect_block(
        &self,
        tx: &mut dyn WriteTx,
        block: &Block,
        _parent: Option<&Block>,
        _view: &UtxoViewpoint,
    ) -> Result<(), IndexError> {
        let hash = block.hash();
        if !self.index.have_block(&hash) {
            return Err(IndexError::Usage(format!("block {hash} is not in the topology index")));
        }
        if self.index.has_children(&hash) {
            return Err(IndexError::Usage(format!("block {hash} has children and is not a tip")));
        }
        tx.delete(BLOCK_NODES_NS, hash.as_bytes())?;
        let dirty = self.index.is_dirty(&hash);
        let node = self.index.remove_tip_node(&hash)?;
        self.pending.lock().push(TopologyChange::Removed { node, dirty });
        trace!(%hash, "removed block node");
        Ok(())
    }

    fn commit(&self) {
        for change in self.pending.lock().drain(..) {
            if let TopologyChange::Added { flushed, .. } = change {
                self.index.mark_flushed(&flushed);
            }
        }
    }

    fn rollback(&self) {
        let changes: Vec<TopologyChange> = self.pending.lock().drain(..).collect();
        for change in changes.into_iter().rev() {
            match change {
                TopologyChange::Added { hash, .. } => {
                    if let Err(e) = self.index.remove_tip_node(&hash) {
                        warn!(%hash, "could not undo block node: {e}");
                    }
                }
                TopologyChange::Removed { node, dirty } => {
                    trace!(hash = %node.hash, "restored block node");
                    self.index.inner.write().insert(node, dirty);
                }
            }
        }
    }
}

fn load_nodes<R: ReadTx + ?Sized>(tx: &R, interrupt: &Interrupt) -> Result<Vec<BlockNode>, IndexError> {
    let mut nodes = Vec::new();
    let mut cursor: Option<Vec<u8>> = None;
    loop {
        interrupt.check()?;
        let rows = tx.range(BLOCK_NODES_NS, cursor.as_deref(), LOAD_PAGE_SIZE)?;
        for (key, value) in &rows {
            let hash = Hash256::from_slice(key)
                .ok_or_else(|| IndexError::corruption(BLOCK_NODES_NS, "block node key is not a hash"))?;
            nodes.push(BlockNode::decode(hash, value)?);
        }
        match rows.last() {
            Some((last, _)) if rows.len() == LOAD_PAGE_SIZE => {
                let mut next = last.clone();
                next.push(0);
                cursor = Some(next);
            }
            _ => break,
        }
    }
    Ok(nodes)
}
