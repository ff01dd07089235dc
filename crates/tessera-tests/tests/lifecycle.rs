//! Index lifecycle tests: reorganisations, restarts and resumable drops.

use std::sync::Arc;

use tessera_core::types::{Block, Hash256, UtxoViewpoint};
use tessera_index::manager::{drop_in_progress, exists_index};
use tessera_index::tx_index::{HASH_BY_LOCATOR_NS, TX_INDEX_KEY, TX_LOCATIONS_NS};
use tessera_index::{
    interrupt_channel, BlockIndex, BlockStatus, IndexConfig, IndexError, IndexManager, Interrupt, KeyValueStore,
    MemoryStore, TopologyIndexer,
};
use tessera_tests::counting::CountingStore;
use tessera_tests::helpers::{make_block, make_chain};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const BATCH: usize = 8;

fn config() -> IndexConfig {
    IndexConfig {
        drop_batch_size: BATCH,
        locator_scan_step: 5,
        ..IndexConfig::default()
    }
}

fn connect_all<S: KeyValueStore + 'static>(manager: &IndexManager<S>, blocks: &[Block], parent: Option<&Block>) {
    let view = UtxoViewpoint::new();
    let mut parent = parent;
    for block in blocks {
        manager.connect_block(block, parent, &view).unwrap();
        parent = Some(block);
    }
}

// ---------------------------------------------------------------------------
// Reorganisation
// ---------------------------------------------------------------------------

#[test]
fn reorg_to_sibling_branch() {
    let topology = Arc::new(BlockIndex::new());
    let manager =
        IndexManager::with_default_indexes(Arc::new(MemoryStore::new()), config(), Arc::clone(&topology));
    manager.init(&Interrupt::never()).unwrap();
    let view = UtxoViewpoint::new();

    let main = make_chain(Hash256::ZERO, 0, 4, 2);
    connect_all(&manager, &main, None);

    manager.disconnect_block(&main[3], Some(&main[2]), &view).unwrap();
    manager.disconnect_block(&main[2], Some(&main[1]), &view).unwrap();

    let side_2 = make_block(main[1].hash(), 2, 3, 1);
    let side_3 = make_block(side_2.hash(), 3, 1, 1);
    connect_all(&manager, &[side_2.clone(), side_3.clone()], Some(&main[1]));

    assert_eq!(topology.chain_tips(), vec![side_3.hash()]);
    assert_eq!(topology.len(), 4);
    assert!(!topology.have_block(&main[2].hash()));

    let tx_index = manager.tx_index().unwrap();
    assert_eq!(tx_index.current_locator(), 4);
    assert_eq!(tx_index.block_hash(3).unwrap(), Some(side_2.hash()));
    assert_eq!(tx_index.block_locator(&main[3].hash()).unwrap(), None);
    for tx in &main[2].transactions[1..] {
        assert_eq!(tx_index.tx_block_region(&tx.txid()).unwrap(), None);
    }
    let raw = side_2.serialize();
    for tx in &side_2.transactions {
        let region = tx_index.tx_block_region(&tx.txid()).unwrap().unwrap();
        assert_eq!(region.hash, side_2.hash());
        assert_eq!(region.slice(&raw).unwrap(), tx.serialize().as_slice());
    }
}

#[test]
fn connect_must_extend_tip() {
    let manager =
        IndexManager::with_default_indexes(Arc::new(MemoryStore::new()), config(), Arc::new(BlockIndex::new()));
    manager.init(&Interrupt::never()).unwrap();
    let main = make_chain(Hash256::ZERO, 0, 3, 0);
    connect_all(&manager, &main, None);

    let stale = make_block(main[0].hash(), 1, 0, 7);
    let err = manager
        .connect_block(&stale, Some(&main[0]), &UtxoViewpoint::new())
        .unwrap_err();
    assert!(matches!(err, IndexError::Usage(_)));
    assert_eq!(manager.tx_index().unwrap().current_locator(), 3);
}

// ---------------------------------------------------------------------------
// Restart
// ---------------------------------------------------------------------------

#[test]
fn status_flags_survive_restart() {
    let store = Arc::new(MemoryStore::new());
    let chain = make_chain(Hash256::ZERO, 0, 5, 0);
    {
        let topology = Arc::new(BlockIndex::new());
        let indexer = Arc::new(TopologyIndexer::new(Arc::clone(&store), Arc::clone(&topology)));
        let mut manager = IndexManager::new(Arc::clone(&store), config());
        manager.add_indexer(indexer.clone());
        manager.init(&Interrupt::never()).unwrap();
        connect_all(&manager, &chain, None);

        assert!(topology.set_status_flags(&chain[3].hash(), BlockStatus::VALIDATE_FAILED));
        assert!(topology.set_status_flags(&chain[4].hash(), BlockStatus::INVALID_ANCESTOR));
        assert!(topology.unset_status_flags(&chain[4].hash(), BlockStatus::VALID));
        assert_eq!(indexer.flush().unwrap(), 2);
        assert_eq!(indexer.flush().unwrap(), 0);
    }

    let topology = Arc::new(BlockIndex::new());
    let mut manager = IndexManager::new(Arc::clone(&store), config());
    manager.add_indexer(Arc::new(TopologyIndexer::new(Arc::clone(&store), Arc::clone(&topology))));
    manager.init(&Interrupt::never()).unwrap();

    assert_eq!(topology.len(), 5);
    let failed = topology.node_status(&chain[3].hash()).unwrap();
    assert!(failed.contains(BlockStatus::VALIDATE_FAILED | BlockStatus::VALID));
    let descendant = topology.node_status(&chain[4].hash()).unwrap();
    assert!(descendant.contains(BlockStatus::INVALID_ANCESTOR));
    assert!(!descendant.contains(BlockStatus::VALID));
    assert!(descendant.is_invalid());
    assert!(!topology.node_status(&chain[2].hash()).unwrap().is_invalid());
}

// ---------------------------------------------------------------------------
// Resumable drop
// ---------------------------------------------------------------------------

#[test]
fn drop_interrupted_between_batches_then_resumed() {
    let (handle, signal) = interrupt_channel();
    let store = Arc::new(CountingStore::new(MemoryStore::new()).interrupt_after(3, handle));
    let chain = make_chain(Hash256::ZERO, 0, 20, 4);
    let entries: usize = chain.iter().map(|b| b.transactions.len()).sum();
    assert_eq!(entries, 100);

    {
        let mut manager =
            IndexManager::with_default_indexes(Arc::clone(&store), config(), Arc::new(BlockIndex::new()));
        manager.init(&Interrupt::never()).unwrap();
        connect_all(&manager, &chain, None);
        assert_eq!(store.deleting_commits(), 0);

        assert_eq!(manager.drop_tx_index(&signal), Err(IndexError::Interrupted));
    }

    assert_eq!(store.deleting_commits(), 3);
    assert_eq!(store.max_deletes(), BATCH);
    assert_eq!(store.inner().namespace_len(TX_LOCATIONS_NS), Some(entries - 3 * BATCH));
    assert_eq!(store.inner().namespace_len(HASH_BY_LOCATOR_NS), Some(20));
    assert!(drop_in_progress(&*store, TX_INDEX_KEY).unwrap());

    let cfg = IndexConfig {
        tx_index: false,
        ..config()
    };
    let topology = Arc::new(BlockIndex::new());
    let manager = IndexManager::with_default_indexes(Arc::clone(&store), cfg, Arc::clone(&topology));
    manager.init(&Interrupt::never()).unwrap();

    assert!(store.max_deletes() <= BATCH);
    assert!(!drop_in_progress(&*store, TX_INDEX_KEY).unwrap());
    assert!(!exists_index(&*store, TX_INDEX_KEY).unwrap());
    for ns in [TX_LOCATIONS_NS, HASH_BY_LOCATOR_NS] {
        assert_eq!(store.inner().namespace_len(ns), None);
    }
    assert!(manager.tx_index().is_none());
    assert_eq!(topology.len(), 20);
}

#[test]
fn disabling_tx_index_drops_it_in_bounded_batches() {
    let store = Arc::new(CountingStore::new(MemoryStore::new()));
    let chain = make_chain(Hash256::ZERO, 0, 10, 6);
    {
        let manager =
            IndexManager::with_default_indexes(Arc::clone(&store), config(), Arc::new(BlockIndex::new()));
        manager.init(&Interrupt::never()).unwrap();
        connect_all(&manager, &chain, None);
    }
    store.reset();

    let cfg = IndexConfig {
        tx_index: false,
        ..config()
    };
    let manager = IndexManager::with_default_indexes(Arc::clone(&store), cfg, Arc::new(BlockIndex::new()));
    manager.init(&Interrupt::never()).unwrap();

    // 70 entries in batches of 8, plus the tip and marker removals.
    assert!(store.deleting_commits() >= 70 / BATCH);
    assert_eq!(store.max_deletes(), BATCH);
    assert!(!exists_index(&*store, TX_INDEX_KEY).unwrap());
    assert_eq!(store.inner().namespace_len(TX_LOCATIONS_NS), None);
}

#[test]
fn chain_keeps_growing_after_runtime_drop() {
    let store = Arc::new(CountingStore::new(MemoryStore::new()));
    let topology = Arc::new(BlockIndex::new());
    let mut manager = IndexManager::with_default_indexes(Arc::clone(&store), config(), Arc::clone(&topology));
    manager.init(&Interrupt::never()).unwrap();
    let chain = make_chain(Hash256::ZERO, 0, 12, 3);
    connect_all(&manager, &chain[..6], None);

    manager.drop_tx_index(&Interrupt::never()).unwrap();
    assert!(manager.tx_index().is_none());
    assert!(store.max_deletes() <= BATCH);

    connect_all(&manager, &chain[6..], Some(&chain[5]));
    assert_eq!(topology.chain_tips(), vec![chain[11].hash()]);
    assert_eq!(topology.len(), 12);
    assert_eq!(store.inner().namespace_len(TX_LOCATIONS_NS), None);
}
