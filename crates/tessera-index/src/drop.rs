//! Resumable index deletion.
//!
//! Dropping an index can touch millions of keys, far more than one
//! transaction should hold. The drop therefore proceeds in phases, each in
//! its own transaction:
//!
//! 1. mark the index in `index_drops` (before anything is deleted)
//! 2. drop dependent indexes
//! 3. delete the main namespace's entries in batches of at most
//!    `batch_size`, checking the interrupt before each batch
//! 4. delete auxiliary namespaces
//! 5. delete the main namespace and the index tip
//! 6. clear the marker
//!
//! Every phase is idempotent. An interrupted or failed drop leaves the
//! marker in place and [`crate::manager::IndexManager::init`] runs it again.

use tracing::{debug, info};

use crate::block_index::{BLOCK_NODES_NS, TOPOLOGY_INDEX_KEY};
use crate::error::IndexError;
use crate::interrupt::Interrupt;
use crate::kv::{KeyValueStore, WriteTx};
use crate::manager::{drop_in_progress, exists_index, mark_index_deletion, INDEX_DROPS_NS, INDEX_TIPS_NS};
use crate::tx_index::{HASH_BY_LOCATOR_NS, LOCATOR_BY_HASH_NS, TX_INDEX_KEY, TX_LOCATIONS_NS};

/// Key of the address-by-transaction index, which depends on the
/// transaction index.
pub const ADDR_INDEX_KEY: &str = "addr_index";
/// Main namespace of the address-by-transaction index.
pub const ADDR_INDEX_NS: &str = "addr_index_entries";

/// Layout of one droppable index.
struct IndexLayout {
    key: &'static str,
    /// Large namespace deleted in batches.
    main: &'static str,
    /// Small namespaces deleted whole once `main` is empty.
    auxiliary: &'static [&'static str],
}

const TX_INDEX_LAYOUT: IndexLayout = IndexLayout {
    key: TX_INDEX_KEY,
    main: TX_LOCATIONS_NS,
    auxiliary: &[LOCATOR_BY_HASH_NS, HASH_BY_LOCATOR_NS],
};

const ADDR_INDEX_LAYOUT: IndexLayout = IndexLayout {
    key: ADDR_INDEX_KEY,
    main: ADDR_INDEX_NS,
    auxiliary: &[],
};

const TOPOLOGY_INDEX_LAYOUT: IndexLayout = IndexLayout {
    key: TOPOLOGY_INDEX_KEY,
    main: BLOCK_NODES_NS,
    auxiliary: &[],
};

/// Drop the transaction location index, dropping the address index first.
pub fn drop_tx_index<S: KeyValueStore + ?Sized>(
    store: &S,
    batch_size: usize,
    interrupt: &Interrupt,
) -> Result<(), IndexError> {
    drop_index(store, &TX_INDEX_LAYOUT, &[&ADDR_INDEX_LAYOUT], batch_size, interrupt)
}

/// Drop the address-by-transaction index.
pub fn drop_addr_index<S: KeyValueStore + ?Sized>(
    store: &S,
    batch_size: usize,
    interrupt: &Interrupt,
) -> Result<(), IndexError> {
    drop_index(store, &ADDR_INDEX_LAYOUT, &[], batch_size, interrupt)
}

/// Drop the persisted block topology.
pub fn drop_topology_index<S: KeyValueStore + ?Sized>(
    store: &S,
    batch_size: usize,
    interrupt: &Interrupt,
) -> Result<(), IndexError> {
    drop_index(store, &TOPOLOGY_INDEX_LAYOUT, &[], batch_size, interrupt)
}

/// Drop the index stored under `key`.
pub fn drop_index_by_key<S: KeyValueStore + ?Sized>(
    store: &S,
    key: &str,
    batch_size: usize,
    interrupt: &Interrupt,
) -> Result<(), IndexError> {
    match key {
        TX_INDEX_KEY => drop_tx_index(store, batch_size, interrupt),
        ADDR_INDEX_KEY => drop_addr_index(store, batch_size, interrupt),
        TOPOLOGY_INDEX_KEY => drop_topology_index(store, batch_size, interrupt),
        other => Err(IndexError::Usage(format!("unknown index key: {other}"))),
    }
}

fn drop_index<S: KeyValueStore + ?Sized>(
    store: &S,
    layout: &IndexLayout,
    dependents: &[&IndexLayout],
    batch_size: usize,
    interrupt: &Interrupt,
) -> Result<(), IndexError> {
    let resuming = drop_in_progress(store, layout.key)?;
    if !resuming && !exists_index(store, layout.key)? {
        info!(index = layout.key, "index does not exist, nothing to drop");
        return Ok(());
    }

    if !resuming {
        store.update(|tx| mark_index_deletion(tx, layout.key))?;
    }
    info!(index = layout.key, resuming, "dropping index");

    for dependent in dependents {
        drop_index(store, dependent, &[], batch_size, interrupt)?;
    }

    let deleted = incremental_flat_drop(store, layout.main, batch_size, interrupt)?;

    store.update(|tx| -> Result<(), IndexError> {
        for ns in layout.auxiliary {
            delete_namespace_if_exists(tx, ns)?;
        }
        Ok(())
    })?;

    store.update(|tx| -> Result<(), IndexError> {
        delete_namespace_if_exists(tx, layout.main)?;
        if tx.namespace_exists(INDEX_TIPS_NS)? {
            tx.delete(INDEX_TIPS_NS, layout.key.as_bytes())?;
        }
        Ok(())
    })?;

    store.update(|tx| -> Result<(), IndexError> {
        if tx.namespace_exists(INDEX_DROPS_NS)? {
            tx.delete(INDEX_DROPS_NS, layout.key.as_bytes())?;
        }
        Ok(())
    })?;

    info!(index = layout.key, entries = deleted, "dropped index");
    Ok(())
}

/// Delete every key of `ns` in transactions of at most `batch_size`
/// deletes. Returns the number of keys deleted.
fn incremental_flat_drop<S: KeyValueStore + ?Sized>(
    store: &S,
    ns: &str,
    batch_size: usize,
    interrupt: &Interrupt,
) -> Result<u64, IndexError> {
    let batch_size = batch_size.max(1);
    let mut cursor: Option<Vec<u8>> = None;
    let mut total = 0u64;

    loop {
        interrupt.check()?;
        let (deleted, last_key) = store.update(|tx| -> Result<(usize, Option<Vec<u8>>), IndexError> {
            if !tx.namespace_exists(ns)? {
                return Ok((0, None));
            }
            let rows = tx.range(ns, cursor.as_deref(), batch_size)?;
            for (key, _) in &rows {
                tx.delete(ns, key)?;
            }
            Ok((rows.len(), rows.last().map(|(key, _)| key.clone())))
        })?;

        total += deleted as u64;
        debug!(namespace = ns, deleted, total, "deleted index batch");
        if deleted < batch_size {
            break;
        }
        cursor = last_key;
    }
    Ok(total)
}

fn delete_namespace_if_exists(tx: &mut dyn WriteTx, ns: &str) -> Result<(), IndexError> {
    if tx.namespace_exists(ns)? {
        tx.delete_namespace(ns)?;
    }
    Ok(())
}
