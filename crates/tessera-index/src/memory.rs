//! In-memory [`KeyValueStore`] for tests and ephemeral nodes.
//!
//! Views hold the read lock; updates hold the write lock for the duration of
//! the closure, so there is exactly one writer and readers never observe a
//! half-applied transaction.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::StoreError;
use crate::kv::{KeyValueStore, Overlay, ReadTx, Rows, StagedTx, WriteTx};

type Namespace = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Debug, Default)]
struct MemoryInner {
    namespaces: BTreeMap<String, Namespace>,
}

impl MemoryInner {
    fn namespace(&self, ns: &str) -> Result<&Namespace, StoreError> {
        self.namespaces
            .get(ns)
            .ok_or_else(|| StoreError::NamespaceMissing(ns.to_string()))
    }

    fn apply(&mut self, overlay: Overlay) {
        for ns in &overlay.dropped {
            self.namespaces.remove(ns);
        }
        for ns in overlay.created {
            self.namespaces.entry(ns).or_default();
        }
        for (ns, writes) in overlay.writes {
            let Some(target) = self.namespaces.get_mut(&ns) else {
                continue;
            };
            for (key, value) in writes {
                match value {
                    Some(value) => {
                        target.insert(key, value);
                    }
                    None => {
                        target.remove(&key);
                    }
                }
            }
        }
    }
}

impl ReadTx for MemoryInner {
    fn namespace_exists(&self, ns: &str) -> Result<bool, StoreError> {
        Ok(self.namespaces.contains_key(ns))
    }

    fn get(&self, ns: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.namespace(ns)?.get(key).cloned())
    }

    fn range(&self, ns: &str, start: Option<&[u8]>, limit: usize) -> Result<Rows, StoreError> {
        let from = start.unwrap_or_default().to_vec();
        Ok(self
            .namespace(ns)?
            .range(from..)
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Namespaced ordered maps behind one reader/writer lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys in `ns`, or `None` if it does not exist.
    pub fn namespace_len(&self, ns: &str) -> Option<usize> {
        self.inner.read().namespaces.get(ns).map(BTreeMap::len)
    }

    /// Names of all existing namespaces, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        self.inner.read().namespaces.keys().cloned().collect()
    }
}

impl KeyValueStore for MemoryStore {
    fn view<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn ReadTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let guard = self.inner.read();
        f(&*guard)
    }

    fn update<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn WriteTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut guard = self.inner.write();
        let (result, overlay) = {
            let mut staged = StagedTx::new(&*guard);
            let result = f(&mut staged);
            (result, staged.into_overlay())
        };
        if result.is_ok() {
            guard.apply(overlay);
        }
        result
    }
}
