//! A store wrapper that observes committed transaction sizes.

use std::sync::atomic::{AtomicUsize, Ordering};

use tessera_index::kv::Rows;
use tessera_index::{InterruptHandle, KeyValueStore, ReadTx, StoreError, WriteTx};

/// Wraps a store and records how many keys each committed update deleted.
///
/// Optionally fires an interrupt once a given number of deleting updates
/// have committed, which lets tests stop a drop partway through.
pub struct CountingStore<S> {
    inner: S,
    max_deletes: AtomicUsize,
    deleting_commits: AtomicUsize,
    trip: Option<(usize, InterruptHandle)>,
}

impl<S: KeyValueStore> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            max_deletes: AtomicUsize::new(0),
            deleting_commits: AtomicUsize::new(0),
            trip: None,
        }
    }

    /// Interrupt `handle` after `commits` deleting updates.
    pub fn interrupt_after(mut self, commits: usize, handle: InterruptHandle) -> Self {
        self.trip = Some((commits, handle));
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Largest number of deletes seen in a single committed update.
    pub fn max_deletes(&self) -> usize {
        self.max_deletes.load(Ordering::SeqCst)
    }

    /// Number of committed updates that deleted at least one key.
    pub fn deleting_commits(&self) -> usize {
        self.deleting_commits.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.max_deletes.store(0, Ordering::SeqCst);
        self.deleting_commits.store(0, Ordering::SeqCst);
    }
}

impl<S: KeyValueStore> KeyValueStore for CountingStore<S> {
    fn view<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn ReadTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.inner.view(f)
    }

    fn update<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn WriteTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut deletes = 0usize;
        let result = self.inner.update(|tx| {
            let mut counting = CountingTx { inner: tx, deletes: 0 };
            let out = f(&mut counting);
            deletes = counting.deletes;
            out
        });
        if result.is_ok() && deletes > 0 {
            self.max_deletes.fetch_max(deletes, Ordering::SeqCst);
            let commits = self.deleting_commits.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((limit, handle)) = &self.trip {
                if commits >= *limit {
                    handle.interrupt();
                }
            }
        }
        result
    }
}

struct CountingTx<'a> {
    inner: &'a mut dyn WriteTx,
    deletes: usize,
}

impl ReadTx for CountingTx<'_> {
    fn namespace_exists(&self, ns: &str) -> Result<bool, StoreError> {
        self.inner.namespace_exists(ns)
    }

    fn get(&self, ns: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(ns, key)
    }

    fn range(&self, ns: &str, start: Option<&[u8]>, limit: usize) -> Result<Rows, StoreError> {
        self.inner.range(ns, start, limit)
    }
}

impl WriteTx for CountingTx<'_> {
    fn create_namespace(&mut self, ns: &str) -> Result<(), StoreError> {
        self.inner.create_namespace(ns)
    }

    fn delete_namespace(&mut self, ns: &str) -> Result<(), StoreError> {
        self.inner.delete_namespace(ns)
    }

    fn put(&mut self, ns: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.inner.put(ns, key, value)
    }

    fn delete(&mut self, ns: &str, key: &[u8]) -> Result<(), StoreError> {
        self.deletes += 1;
        self.inner.delete(ns, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_index::{interrupt_channel, MemoryStore};

    #[test]
    fn counts_deletes_of_committed_updates_only() {
        let store = CountingStore::new(MemoryStore::new());
        store
            .update(|tx| -> Result<(), StoreError> {
                tx.create_namespace("ns")?;
                for i in 0u8..5 {
                    tx.put("ns", &[i], b"v")?;
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(store.deleting_commits(), 0);

        let failed: Result<(), StoreError> = store.update(|tx| {
            tx.delete("ns", &[0])?;
            tx.delete("ns", &[1])?;
            tx.delete("ns", &[2])?;
            Err(StoreError::Backend("abort".into()))
        });
        assert!(failed.is_err());
        assert_eq!(store.max_deletes(), 0);

        store
            .update(|tx| -> Result<(), StoreError> {
                tx.delete("ns", &[0])?;
                tx.delete("ns", &[1])
            })
            .unwrap();
        assert_eq!(store.max_deletes(), 2);
        assert_eq!(store.deleting_commits(), 1);
        assert_eq!(store.inner().namespace_len("ns"), Some(3));
    }

    #[test]
    fn trips_interrupt() {
        let (handle, signal) = interrupt_channel();
        let store = CountingStore::new(MemoryStore::new()).interrupt_after(2, handle);
        store
            .update(|tx| -> Result<(), StoreError> {
                tx.create_namespace("ns")?;
                tx.put("ns", b"a", b"")?;
                tx.put("ns", b"b", b"")
            })
            .unwrap();
        store.update(|tx| tx.delete("ns", b"a")).unwrap();
        assert!(!signal.is_interrupted());
        store.update(|tx| tx.delete("ns", b"b")).unwrap();
        assert!(signal.is_interrupted());
    }
}
