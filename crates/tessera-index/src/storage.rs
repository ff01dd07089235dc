//! RocksDB-backed [`KeyValueStore`].
//!
//! Two column families: `namespaces` lists created namespaces, `data` holds
//! every row under a length-prefixed key `[ns.len()] || ns || key`, so each
//! namespace is one contiguous key range. Views read from a RocksDB snapshot;
//! updates stage into an overlay and commit as a single [`WriteBatch`].

use std::path::Path;

use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, Snapshot, WriteBatch, DB};

use crate::error::StoreError;
use crate::kv::{KeyValueStore, Overlay, ReadTx, Rows, StagedTx, WriteTx};

// --- Column family names ---

const CF_NAMESPACES: &str = "namespaces";
const CF_DATA: &str = "data";

/// All column family names.
const ALL_CFS: &[&str] = &[CF_NAMESPACES, CF_DATA];

/// Longest namespace name accepted. Keeps the length prefix below 0xFF so
/// every namespace range has an upper bound.
const MAX_NAMESPACE_LEN: usize = 254;

/// Persistent store over RocksDB column families.
pub struct RocksStore {
    db: DB,
    /// Serialises writers; readers use snapshots and never wait.
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates the column families if they don't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Trigger manual compaction of the data column family.
    ///
    /// Worth calling after dropping a large index to reclaim space from the
    /// deleted keys.
    pub fn compact(&self) -> Result<(), StoreError> {
        let cf = cf_handle(&self.db, CF_DATA)?;
        self.db.compact_range_cf(cf, None::<&[u8]>, None::<&[u8]>);
        Ok(())
    }

    fn commit(&self, overlay: Overlay) -> Result<(), StoreError> {
        let cf_ns = cf_handle(&self.db, CF_NAMESPACES)?;
        let cf_data = cf_handle(&self.db, CF_DATA)?;
        let mut batch = WriteBatch::default();

        for ns in &overlay.dropped {
            let prefix = namespace_prefix(ns)?;
            let end = prefix_successor(&prefix);
            batch.delete_cf(cf_ns, ns.as_bytes());
            batch.delete_range_cf(cf_data, prefix.as_slice(), end.as_slice());
        }
        for ns in &overlay.created {
            namespace_prefix(ns)?;
            batch.put_cf(cf_ns, ns.as_bytes(), b"");
        }
        for (ns, writes) in &overlay.writes {
            for (key, value) in writes {
                let row_key = data_key(ns, key)?;
                match value {
                    Some(value) => batch.put_cf(cf_data, row_key, value),
                    None => batch.delete_cf(cf_data, row_key),
                }
            }
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

impl KeyValueStore for RocksStore {
    fn view<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn ReadTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let snapshot = RocksSnapshot {
            db: &self.db,
            snapshot: self.db.snapshot(),
        };
        f(&snapshot)
    }

    fn update<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn WriteTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let _writer = self.write_lock.lock();
        let base = RocksSnapshot {
            db: &self.db,
            snapshot: self.db.snapshot(),
        };
        let (result, overlay) = {
            let mut staged = StagedTx::new(&base);
            let result = f(&mut staged);
            (result, staged.into_overlay())
        };
        let value = result?;
        self.commit(overlay)?;
        Ok(value)
    }
}

/// Read view pinned to one RocksDB snapshot.
struct RocksSnapshot<'a> {
    db: &'a DB,
    snapshot: Snapshot<'a>,
}

impl RocksSnapshot<'_> {
    fn require(&self, ns: &str) -> Result<(), StoreError> {
        if self.namespace_exists(ns)? {
            Ok(())
        } else {
            Err(StoreError::NamespaceMissing(ns.to_string()))
        }
    }
}

impl ReadTx for RocksSnapshot<'_> {
    fn namespace_exists(&self, ns: &str) -> Result<bool, StoreError> {
        let cf = cf_handle(self.db, CF_NAMESPACES)?;
        let found = self
            .snapshot
            .get_cf(cf, ns.as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(found.is_some())
    }

    fn get(&self, ns: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.require(ns)?;
        let cf = cf_handle(self.db, CF_DATA)?;
        self.snapshot
            .get_cf(cf, data_key(ns, key)?)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn range(&self, ns: &str, start: Option<&[u8]>, limit: usize) -> Result<Rows, StoreError> {
        self.require(ns)?;
        let cf = cf_handle(self.db, CF_DATA)?;
        let prefix = namespace_prefix(ns)?;
        let from = data_key(ns, start.unwrap_or_default())?;

        let mut rows = Vec::new();
        if limit == 0 {
            return Ok(rows);
        }
        let iter = self
            .snapshot
            .iterator_cf(cf, IteratorMode::From(&from, Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            let Some(user_key) = key.strip_prefix(prefix.as_slice()) else {
                break;
            };
            rows.push((user_key.to_vec(), value.to_vec()));
            if rows.len() == limit {
                break;
            }
        }
        Ok(rows)
    }
}

fn cf_handle<'a>(db: &'a DB, name: &str) -> Result<&'a ColumnFamily, StoreError> {
    db.cf_handle(name)
        .ok_or_else(|| StoreError::Backend(format!("missing column family: {name}")))
}

/// `[ns.len()] || ns`.
fn namespace_prefix(ns: &str) -> Result<Vec<u8>, StoreError> {
    if ns.len() > MAX_NAMESPACE_LEN {
        return Err(StoreError::Backend(format!(
            "namespace name too long: {} bytes",
            ns.len()
        )));
    }
    let mut prefix = Vec::with_capacity(1 + ns.len());
    prefix.push(ns.len() as u8);
    prefix.extend_from_slice(ns.as_bytes());
    Ok(prefix)
}

fn data_key(ns: &str, key: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut out = namespace_prefix(ns)?;
    out.extend_from_slice(key);
    Ok(out)
}

/// Smallest key greater than every key starting with `prefix`.
///
/// The first byte is a length `<= MAX_NAMESPACE_LEN`, so a successor always
/// exists.
fn prefix_successor(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return end;
        }
    }
    vec![u8::MAX; prefix.len() + 1]
}
