//! Transaction location index.
//!
//! Maps each transaction hash to the block containing it and the byte range
//! of the transaction within the serialized block. Instead of repeating the
//! 32-byte block hash in every entry, each connected block is assigned a
//! sequential 4-byte *locator* and entries reference that:
//!
//! | namespace               | key             | value                       |
//! |-------------------------|-----------------|-----------------------------|
//! | `tx_locations`          | tx hash (32)    | locator ‖ offset ‖ len (12) |
//! | `block_locator_by_hash` | block hash (32) | locator (4)                 |
//! | `block_hash_by_locator` | locator (4)     | block hash (32)             |
//!
//! All integers are big-endian. Assigned locators always form the range
//! `[1, current_locator]`.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};

use tessera_core::constants::{DEFAULT_LOCATOR_SCAN_STEP, HASH_SIZE, LOCATOR_SIZE, TX_ENTRY_SIZE};
use tessera_core::types::{Block, BlockRegion, Hash256, TxLoc, UtxoViewpoint};

use crate::error::IndexError;
use crate::interrupt::Interrupt;
use crate::kv::{KeyValueStore, ReadTx, WriteTx};
use crate::manager::Indexer;

/// Key of the transaction index in the index tip and drop namespaces.
pub const TX_INDEX_KEY: &str = "tx_index";
const TX_INDEX_NAME: &str = "transaction index";

/// Transaction hash → location entry.
pub const TX_LOCATIONS_NS: &str = "tx_locations";
/// Block hash → locator.
pub const LOCATOR_BY_HASH_NS: &str = "block_locator_by_hash";
/// Locator → block hash.
pub const HASH_BY_LOCATOR_NS: &str = "block_hash_by_locator";

/// Transaction location index over a [`KeyValueStore`].
pub struct TxIndex<S> {
    store: Arc<S>,
    /// Highest assigned locator; 0 when no block is indexed.
    cur_locator: AtomicU32,
    /// Counter value as of the last commit, while a transaction that moved
    /// it is still open.
    committed_locator: Mutex<Option<u32>>,
    scan_step: u32,
}

impl<S: KeyValueStore> TxIndex<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_scan_step(store, DEFAULT_LOCATOR_SCAN_STEP)
    }

    /// Use `scan_step` for the forward phase of the startup scan.
    pub fn with_scan_step(store: Arc<S>, scan_step: u32) -> Self {
        Self {
            store,
            cur_locator: AtomicU32::new(0),
            committed_locator: Mutex::new(None),
            scan_step: scan_step.max(1),
        }
    }

    /// Highest assigned locator.
    pub fn current_locator(&self) -> u32 {
        self.cur_locator.load(Ordering::Acquire)
    }

    fn move_counter(&self, locator: u32) {
        let mut committed = self.committed_locator.lock();
        committed.get_or_insert(self.current_locator());
        self.cur_locator.store(locator, Ordering::Release);
    }

    /// Where the transaction with `tx_hash` is stored.
    ///
    /// `Ok(None)` if the transaction is not indexed. A malformed entry or one
    /// whose locator has no block is reported as corruption.
    pub fn tx_block_region(&self, tx_hash: &Hash256) -> Result<Option<BlockRegion>, IndexError> {
        self.store.view(|tx| fetch_block_region(tx, tx_hash))
    }

    /// Locator assigned to the block with `hash`, if indexed.
    pub fn block_locator(&self, hash: &Hash256) -> Result<Option<u32>, IndexError> {
        self.store.view(|tx| fetch_locator_by_hash(tx, hash))
    }

    /// Block hash assigned `locator`, if any.
    pub fn block_hash(&self, locator: u32) -> Result<Option<Hash256>, IndexError> {
        self.store.view(|tx| fetch_hash_by_locator(tx, locator))
    }
}

impl<S: KeyValueStore> Indexer for TxIndex<S> {
    fn key(&self) -> &'static str {
        TX_INDEX_KEY
    }

    fn name(&self) -> &'static str {
        TX_INDEX_NAME
    }

    fn create(&self, tx: &mut dyn WriteTx) -> Result<(), IndexError> {
        tx.create_namespace(LOCATOR_BY_HASH_NS)?;
        tx.create_namespace(HASH_BY_LOCATOR_NS)?;
        tx.create_namespace(TX_LOCATIONS_NS)?;
        Ok(())
    }

    /// Recover the locator counter from the persisted locator → hash
    /// mapping with a forward scan followed by a binary search.
    fn init(&self, interrupt: &Interrupt) -> Result<(), IndexError> {
        let step = self.scan_step;
        let highest = self.store.view(|tx| {
            scan_highest_locator(step, interrupt, |locator| {
                Ok(tx.get(HASH_BY_LOCATOR_NS, &locator.to_be_bytes())?.is_some())
            })
        })?;
        self.cur_locator.store(highest, Ordering::Release);
        *self.committed_locator.lock() = None;
        debug!(locator = highest, "current block locator");
        Ok(())
    }

    fn connect_block(
        &self,
        tx: &mut dyn WriteTx,
        block: &Block,
        _parent: Option<&Block>,
        _view: &UtxoViewpoint,
    ) -> Result<(), IndexError> {
        let hash = block.hash();
        if fetch_locator_by_hash(&*tx, &hash)?.is_some() {
            return Err(IndexError::Usage(format!("block {hash} is already indexed")));
        }
        let locator = self
            .current_locator()
            .checked_add(1)
            .ok_or_else(|| IndexError::Usage("block locator space exhausted".into()))?;

        let locations = block.tx_locations()?;
        let mut buf = vec![0u8; locations.len() * TX_ENTRY_SIZE];
        for ((entry, loc), transaction) in buf
            .chunks_exact_mut(TX_ENTRY_SIZE)
            .zip(&locations)
            .zip(&block.transactions)
        {
            encode_tx_entry(entry, locator, loc);
            tx.put(TX_LOCATIONS_NS, transaction.txid().as_bytes(), entry)?;
        }

        tx.put(LOCATOR_BY_HASH_NS, hash.as_bytes(), &locator.to_be_bytes())?;
        tx.put(HASH_BY_LOCATOR_NS, &locator.to_be_bytes(), hash.as_bytes())?;

        self.move_counter(locator);
        trace!(locator, %hash, txs = locations.len(), "indexed block transactions");
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
        let current = self.current_locator();
        let locator = fetch_locator_by_hash(&*tx, &hash)?
            .ok_or_else(|| IndexError::Usage(format!("block {hash} is not indexed")))?;
        if locator != current {
            return Err(IndexError::Usage(format!(
                "block {hash} has locator {locator}, only the most recent block ({current}) can be disconnected"
            )));
        }
        let previous = locator
            .checked_sub(1)
            .ok_or_else(|| IndexError::corruption(hash, "block locator is 0"))?;

        let mut removed = HashSet::with_capacity(block.transactions.len());
        for transaction in &block.transactions {
            let txid = transaction.txid();
            // A txid repeated within the block has one entry.
            if !removed.insert(txid) {
                continue;
            }
            if tx.get(TX_LOCATIONS_NS, txid.as_bytes())?.is_none() {
                return Err(IndexError::Usage(format!(
                    "transaction {txid} has no location entry to remove"
                )));
            }
            tx.delete(TX_LOCATIONS_NS, txid.as_bytes())?;
        }

        tx.delete(LOCATOR_BY_HASH_NS, hash.as_bytes())?;
        tx.delete(HASH_BY_LOCATOR_NS, &locator.to_be_bytes())?;

        self.move_counter(previous);
        trace!(locator, %hash, "removed block transactions");
        Ok(())
    }

    fn commit(&self) {
        self.committed_locator.lock().take();
    }

    fn rollback(&self) {
        if let Some(committed) = self.committed_locator.lock().take() {
            self.cur_locator.store(committed, Ordering::Release);
            debug!(locator = committed, "restored block locator");
        }
    }
}

/// Find the highest locator for which `probe` succeeds, assuming successes
/// form a prefix `[1, K]` of the locator space.
///
/// Probes `1, 1 + step, 1 + 2*step, ...` until one fails, then bisects the
/// gap between the last success and that failure. Returns 0 if locator 1
/// does not exist. `interrupt` is checked before every probe.
pub fn scan_highest_locator<F>(step: u32, interrupt: &Interrupt, mut probe: F) -> Result<u32, IndexError>
where
    F: FnMut(u32) -> Result<bool, IndexError>,
{
    let step = step.max(1);
    let mut highest_known = 0u32;
    let mut test = 1u32;

    let mut next_unknown = loop {
        interrupt.check()?;
        if !probe(test)? {
            break test;
        }
        highest_known = test;
        trace!(locator = test, "forward scan hit");
        test = match test.checked_add(step) {
            Some(next) => next,
            None if test == u32::MAX => return Ok(u32::MAX),
            None => u32::MAX,
        };
    };

    if next_unknown == 1 {
        return Ok(0);
    }

    loop {
        interrupt.check()?;
        let mid = highest_known + (next_unknown - highest_known) / 2;
        if probe(mid)? {
            highest_known = mid;
        } else {
            next_unknown = mid;
        }
        trace!(highest_known, next_unknown, "binary search step");
        if highest_known + 1 == next_unknown {
            break;
        }
    }
    Ok(highest_known)
}

fn encode_tx_entry(entry: &mut [u8], locator: u32, loc: &TxLoc) {
    entry[0..4].copy_from_slice(&locator.to_be_bytes());
    entry[4..8].copy_from_slice(&loc.offset.to_be_bytes());
    entry[8..12].copy_from_slice(&loc.len.to_be_bytes());
}

fn be_u32(bytes: &[u8]) -> Option<u32> {
    let array: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(array))
}

fn fetch_locator_by_hash<R: ReadTx + ?Sized>(tx: &R, hash: &Hash256) -> Result<Option<u32>, IndexError> {
    let Some(bytes) = tx.get(LOCATOR_BY_HASH_NS, hash.as_bytes())? else {
        return Ok(None);
    };
    if bytes.len() != LOCATOR_SIZE {
        return Err(IndexError::corruption(
            hash,
            format!("block locator is {} bytes, expected {LOCATOR_SIZE}", bytes.len()),
        ));
    }
    Ok(be_u32(&bytes))
}

fn fetch_hash_by_locator<R: ReadTx + ?Sized>(tx: &R, locator: u32) -> Result<Option<Hash256>, IndexError> {
    let Some(bytes) = tx.get(HASH_BY_LOCATOR_NS, &locator.to_be_bytes())? else {
        return Ok(None);
    };
    Hash256::from_slice(&bytes).map(Some).ok_or_else(|| {
        IndexError::corruption(
            format!("locator {locator}"),
            format!("block hash is {} bytes, expected {HASH_SIZE}", bytes.len()),
        )
    })
}

fn fetch_block_region<R: ReadTx + ?Sized>(tx: &R, tx_hash: &Hash256) -> Result<Option<BlockRegion>, IndexError> {
    let Some(entry) = tx.get(TX_LOCATIONS_NS, tx_hash.as_bytes())? else {
        return Ok(None);
    };
    if entry.len() < TX_ENTRY_SIZE {
        return Err(IndexError::corruption(
            tx_hash,
            format!("location entry is {} bytes, expected {TX_ENTRY_SIZE}", entry.len()),
        ));
    }
    let (Some(locator), Some(offset), Some(len)) = (be_u32(&entry[0..4]), be_u32(&entry[4..8]), be_u32(&entry[8..12]))
    else {
        return Err(IndexError::corruption(tx_hash, "location entry is malformed"));
    };

    let hash = fetch_hash_by_locator(tx, locator)?.ok_or_else(|| {
        IndexError::corruption(tx_hash, format!("block locator {locator} has no block hash"))
    })?;
    Ok(Some(BlockRegion { hash, offset, len }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use tessera_core::types::{BlockHeader, OutPoint, Transaction, TxInput, TxOutput};

    fn make_tx(seed: u32, script_len: usize) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint {
                    hash: Hash256([seed as u8; 32]),
                    index: seed,
                },
                sequence: 0,
                sign_script: vec![0xAB; script_len],
            }],
            outputs: vec![TxOutput {
                amount: seed as u64,
                pk_script: vec![1, 2, 3],
            }],
            lock_time: seed,
        }
    }

    fn make_block(prev: Hash256, seed: u32, tx_count: u32) -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                prev_hash: prev,
                tx_root: Hash256::ZERO,
                timestamp: seed as u64,
                difficulty: 0,
                nonce: seed as u64,
            },
            transactions: (0..tx_count).map(|i| make_tx(seed * 1000 + i, i as usize)).collect(),
        }
    }

    fn temp_index() -> (Arc<MemoryStore>, TxIndex<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let index = TxIndex::new(Arc::clone(&store));
        store.update(|tx| index.create(tx)).unwrap();
        index.init(&Interrupt::never()).unwrap();
        (store, index)
    }

    fn connect(store: &MemoryStore, index: &TxIndex<MemoryStore>, block: &Block) -> Result<(), IndexError> {
        store.update(|tx| index.connect_block(tx, block, None, &UtxoViewpoint::new()))
    }

    fn disconnect(store: &MemoryStore, index: &TxIndex<MemoryStore>, block: &Block) -> Result<(), IndexError> {
        store.update(|tx| index.disconnect_block(tx, block, None, &UtxoViewpoint::new()))
    }

    /// Write locators `1..=k` directly.
    fn seed_locators(store: &MemoryStore, k: u32) {
        store
            .update(|tx| -> Result<(), IndexError> {
                for locator in 1..=k {
                    let mut hash = [0u8; 32];
                    hash[..4].copy_from_slice(&locator.to_be_bytes());
                    tx.put(HASH_BY_LOCATOR_NS, &locator.to_be_bytes(), &hash)?;
                }
                Ok(())
            })
            .unwrap();
    }

    // ------------------------------------------------------------------
    // Create / init
    // ------------------------------------------------------------------

    #[test]
    fn create_twice_fails() {
        let (store, index) = temp_index();
        let err = store.update(|tx| index.create(tx)).unwrap_err();
        assert!(matches!(err, IndexError::Store(_)));
    }

    #[test]
    fn empty_index_starts_at_zero() {
        let (_store, index) = temp_index();
        assert_eq!(index.current_locator(), 0);
    }

    #[test]
    fn init_recovers_counter_from_store() {
        for k in [1u32, 2, 7, 10, 11, 99, 250] {
            let store = Arc::new(MemoryStore::new());
            let index = TxIndex::with_scan_step(Arc::clone(&store), 10);
            store.update(|tx| index.create(tx)).unwrap();
            seed_locators(&store, k);
            index.init(&Interrupt::never()).unwrap();
            assert_eq!(index.current_locator(), k, "k={k}");
        }
    }

    #[test]
    fn init_is_interruptible() {
        let (store, index) = temp_index();
        seed_locators(&store, 5);
        let (handle, signal) = crate::interrupt::interrupt_channel();
        handle.interrupt();
        assert_eq!(index.init(&signal), Err(IndexError::Interrupted));
    }

    // ------------------------------------------------------------------
    // Locator scan
    // ------------------------------------------------------------------

    fn scan(k: u32, step: u32) -> (u32, Vec<u32>) {
        let mut probes = Vec::new();
        let found = scan_highest_locator(step, &Interrupt::never(), |locator| {
            probes.push(locator);
            Ok(locator <= k)
        })
        .unwrap();
        (found, probes)
    }

    #[test]
    fn scan_recovers_reference_heights() {
        for k in [0u32, 1, 99_999, 100_000, 100_001, 5_000_000] {
            let (found, _) = scan(k, DEFAULT_LOCATOR_SCAN_STEP);
            assert_eq!(found, k, "k={k}");
        }
    }

    #[test]
    fn scan_probe_sequence() {
        // Empty: one probe.
        assert_eq!(scan(0, 100_000).1, vec![1]);

        // K = 100_000: forward 1 (hit), 100_001 (miss), then bisect.
        let (_, probes) = scan(100_000, 100_000);
        assert_eq!(&probes[..3], &[1, 100_001, 50_001]);
        assert!(probes.len() <= 2 + 17);

        // K = 5_000_000: 51 forward probes, then at most 17 bisection probes.
        let (_, probes) = scan(5_000_000, 100_000);
        assert_eq!(probes[50], 5_000_001);
        assert!(probes.len() <= 51 + 17);
    }

    #[test]
    fn scan_step_of_one_is_linear() {
        let (found, probes) = scan(4, 1);
        assert_eq!(found, 4);
        assert_eq!(probes, vec![1, 2, 3, 4, 5, 4]);
    }

    #[test]
    fn scan_near_locator_space_end() {
        let (found, _) = scan(u32::MAX, 100_000);
        assert_eq!(found, u32::MAX);
        let (found, _) = scan(u32::MAX - 1, 100_000);
        assert_eq!(found, u32::MAX - 1);
    }

    #[test]
    fn scan_propagates_probe_errors() {
        let result = scan_highest_locator(10, &Interrupt::never(), |_| {
            Err(IndexError::corruption("probe", "boom"))
        });
        assert!(result.unwrap_err().is_corruption());
    }

    // ------------------------------------------------------------------
    // Connect / disconnect / lookup
    // ------------------------------------------------------------------

    #[test]
    fn connect_assigns_sequential_locators() {
        let (store, index) = temp_index();
        let b1 = make_block(Hash256::ZERO, 1, 3);
        let b2 = make_block(b1.hash(), 2, 2);
        connect(&store, &index, &b1).unwrap();
        connect(&store, &index, &b2).unwrap();

        assert_eq!(index.current_locator(), 2);
        assert_eq!(index.block_locator(&b1.hash()).unwrap(), Some(1));
        assert_eq!(index.block_locator(&b2.hash()).unwrap(), Some(2));
        assert_eq!(index.block_hash(2).unwrap(), Some(b2.hash()));
        assert_eq!(store.namespace_len(TX_LOCATIONS_NS), Some(5));
    }

    #[test]
    fn lookup_returns_region_within_block() {
        let (store, index) = temp_index();
        let block = make_block(Hash256::ZERO, 1, 4);
        connect(&store, &index, &block).unwrap();

        let raw = block.serialize();
        for transaction in &block.transactions {
            let region = index.tx_block_region(&transaction.txid()).unwrap().unwrap();
            assert_eq!(region.hash, block.hash());
            assert_eq!(region.slice(&raw).unwrap(), transaction.serialize().as_slice());
        }
    }

    #[test]
    fn lookup_missing_is_none() {
        let (_store, index) = temp_index();
        assert_eq!(index.tx_block_region(&Hash256([7; 32])).unwrap(), None);
    }

    #[test]
    fn short_entry_is_corruption() {
        let (store, index) = temp_index();
        let txid = Hash256([3; 32]);
        store
            .update(|tx| tx.put(TX_LOCATIONS_NS, txid.as_bytes(), &[0, 0, 0, 1]))
            .unwrap();
        match index.tx_block_region(&txid) {
            Err(IndexError::Corruption { key, .. }) => assert_eq!(key, txid.to_string()),
            other => panic!("expected corruption, got {other:?}"),
        }
    }

    #[test]
    fn dangling_locator_is_corruption() {
        let (store, index) = temp_index();
        let txid = Hash256([4; 32]);
        let mut entry = [0u8; TX_ENTRY_SIZE];
        encode_tx_entry(&mut entry, 42, &TxLoc { offset: 92, len: 10 });
        store
            .update(|tx| tx.put(TX_LOCATIONS_NS, txid.as_bytes(), &entry))
            .unwrap();
        let err = index.tx_block_region(&txid).unwrap_err();
        assert!(err.is_corruption());
        assert!(err.to_string().contains(&txid.to_string()));
    }

    #[test]
    fn duplicate_tx_hash_keeps_latest() {
        let (store, index) = temp_index();
        let b1 = make_block(Hash256::ZERO, 1, 1);
        let mut b2 = make_block(b1.hash(), 2, 1);
        b2.transactions.push(b1.transactions[0].clone());
        connect(&store, &index, &b1).unwrap();
        connect(&store, &index, &b2).unwrap();

        let region = index
            .tx_block_region(&b1.transactions[0].txid())
            .unwrap()
            .unwrap();
        assert_eq!(region.hash, b2.hash());
    }

    #[test]
    fn connect_then_disconnect_restores_state() {
        let (store, index) = temp_index();
        let b1 = make_block(Hash256::ZERO, 1, 2);
        connect(&store, &index, &b1).unwrap();
        let before = store.view(|tx| tx.range(TX_LOCATIONS_NS, None, 100)).unwrap();

        let b2 = make_block(b1.hash(), 2, 3);
        connect(&store, &index, &b2).unwrap();
        disconnect(&store, &index, &b2).unwrap();

        assert_eq!(index.current_locator(), 1);
        assert_eq!(store.view(|tx| tx.range(TX_LOCATIONS_NS, None, 100)).unwrap(), before);
        assert_eq!(index.block_locator(&b2.hash()).unwrap(), None);
        assert_eq!(index.block_hash(2).unwrap(), None);
    }

    #[test]
    fn disconnect_out_of_order_rejected() {
        let (store, index) = temp_index();
        let b1 = make_block(Hash256::ZERO, 1, 1);
        let b2 = make_block(b1.hash(), 2, 1);
        connect(&store, &index, &b1).unwrap();
        connect(&store, &index, &b2).unwrap();

        assert!(matches!(disconnect(&store, &index, &b1), Err(IndexError::Usage(_))));
        assert_eq!(index.current_locator(), 2);
    }

    #[test]
    fn disconnect_unknown_block_rejected() {
        let (store, index) = temp_index();
        let block = make_block(Hash256::ZERO, 1, 1);
        assert!(matches!(disconnect(&store, &index, &block), Err(IndexError::Usage(_))));
    }

    #[test]
    fn disconnect_with_missing_entry_fails_without_changes() {
        let (store, index) = temp_index();
        let block = make_block(Hash256::ZERO, 1, 2);
        connect(&store, &index, &block).unwrap();
        let victim = block.transactions[1].txid();
        store
            .update(|tx| tx.delete(TX_LOCATIONS_NS, victim.as_bytes()))
            .unwrap();

        assert!(matches!(disconnect(&store, &index, &block), Err(IndexError::Usage(_))));
        assert_eq!(index.current_locator(), 1);
        assert_eq!(index.block_locator(&block.hash()).unwrap(), Some(1));
    }

    #[test]
    fn connect_same_block_twice_rejected() {
        let (store, index) = temp_index();
        let block = make_block(Hash256::ZERO, 1, 1);
        connect(&store, &index, &block).unwrap();
        assert!(matches!(connect(&store, &index, &block), Err(IndexError::Usage(_))));
        assert_eq!(index.current_locator(), 1);
    }

    #[test]
    fn failed_connect_does_not_advance_counter() {
        let (store, index) = temp_index();
        let block = make_block(Hash256::ZERO, 1, 2);
        let result: Result<(), IndexError> = store.update(|tx| {
            tx.delete_namespace(HASH_BY_LOCATOR_NS)?;
            index.connect_block(tx, &block, None, &UtxoViewpoint::new())
        });
        assert!(result.is_err());
        assert_eq!(index.current_locator(), 0);
        assert_eq!(store.namespace_len(TX_LOCATIONS_NS), Some(0));
    }

    #[test]
    fn reinit_after_connects_matches_counter() {
        let (store, index) = temp_index();
        let mut prev = Hash256::ZERO;
        for seed in 1..=25 {
            let block = make_block(prev, seed, 1);
            connect(&store, &index, &block).unwrap();
            prev = block.hash();
        }
        let fresh = TxIndex::with_scan_step(Arc::clone(&store), 4);
        fresh.init(&Interrupt::never()).unwrap();
        assert_eq!(fresh.current_locator(), 25);
    }

    #[test]
    fn repeated_txid_in_block_disconnects() {
        let (store, index) = temp_index();
        let mut block = make_block(Hash256::ZERO, 1, 2);
        block.transactions.push(block.transactions[1].clone());
        connect(&store, &index, &block).unwrap();
        assert_eq!(store.namespace_len(TX_LOCATIONS_NS), Some(3));

        disconnect(&store, &index, &block).unwrap();
        assert_eq!(index.current_locator(), 0);
        assert_eq!(store.namespace_len(TX_LOCATIONS_NS), Some(0));
        assert_eq!(index.block_locator(&block.hash()).unwrap(), None);
    }

    #[test]
    fn rollback_restores_committed_counter() {
        let (store, index) = temp_index();
        let b1 = make_block(Hash256::ZERO, 1, 1);
        connect(&store, &index, &b1).unwrap();
        index.commit();

        let b2 = make_block(b1.hash(), 2, 1);
        let b3 = make_block(b2.hash(), 3, 1);
        let result: Result<(), IndexError> = store.update(|tx| {
            index.connect_block(tx, &b2, None, &UtxoViewpoint::new())?;
            index.connect_block(tx, &b3, None, &UtxoViewpoint::new())?;
            Err(IndexError::Usage("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(index.current_locator(), 3);

        index.rollback();
        assert_eq!(index.current_locator(), 1);
        connect(&store, &index, &b2).unwrap();
        index.commit();
        assert_eq!(index.block_hash(2).unwrap(), Some(b2.hash()));

        // Nothing pending: rollback is a no-op.
        index.rollback();
        assert_eq!(index.current_locator(), 2);
    }
}
