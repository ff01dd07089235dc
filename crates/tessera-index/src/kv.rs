//! Transactional key-value store contract.
//!
//! Indexes never talk to a storage engine directly. They see named
//! namespaces of ordered byte keys through two transaction scopes:
//! [`KeyValueStore::view`] (read-only, consistent snapshot) and
//! [`KeyValueStore::update`] (read-write, committed atomically when the
//! closure returns `Ok`, discarded otherwise).
//!
//! Adapters in [`crate::memory`] and [`crate::storage`] share the write
//! staging in this module: writes land in an [`Overlay`] that later reads of
//! the same transaction observe, and the adapter applies the overlay in one
//! step on commit.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::StoreError;

/// Ordered `(key, value)` rows returned by [`ReadTx::range`].
pub type Rows = Vec<(Vec<u8>, Vec<u8>)>;

/// Read access inside a transaction.
pub trait ReadTx {
    /// Whether `ns` has been created.
    fn namespace_exists(&self, ns: &str) -> Result<bool, StoreError>;

    /// Value stored under `key`, or `None`.
    fn get(&self, ns: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Up to `limit` rows in key order, starting at `start` (inclusive) or
    /// at the first key of the namespace.
    fn range(&self, ns: &str, start: Option<&[u8]>, limit: usize) -> Result<Rows, StoreError>;
}

/// Read-write access inside a transaction.
pub trait WriteTx: ReadTx {
    /// Create `ns`. Fails with [`StoreError::NamespaceExists`] if present.
    fn create_namespace(&mut self, ns: &str) -> Result<(), StoreError>;

    /// Delete `ns` and everything in it.
    fn delete_namespace(&mut self, ns: &str) -> Result<(), StoreError>;

    fn put(&mut self, ns: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&mut self, ns: &str, key: &[u8]) -> Result<(), StoreError>;
}

/// An ACID store organised into namespaces.
pub trait KeyValueStore: Send + Sync {
    /// Run `f` against a read-only snapshot.
    fn view<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn ReadTx) -> Result<T, E>,
        E: From<StoreError>;

    /// Run `f` in a read-write transaction. Changes are committed atomically
    /// iff `f` returns `Ok`.
    fn update<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn WriteTx) -> Result<T, E>,
        E: From<StoreError>;
}

/// Create `ns` unless it already exists.
pub fn ensure_namespace<W: WriteTx + ?Sized>(tx: &mut W, ns: &str) -> Result<(), StoreError> {
    if !tx.namespace_exists(ns)? {
        tx.create_namespace(ns)?;
    }
    Ok(())
}

/// Staged, uncommitted changes of one write transaction.
#[derive(Debug, Default)]
pub(crate) struct Overlay {
    /// Namespaces created in this transaction.
    pub(crate) created: BTreeSet<String>,
    /// Namespaces whose committed contents are discarded on commit.
    pub(crate) dropped: BTreeSet<String>,
    /// Per-namespace puts (`Some`) and deletes (`None`).
    pub(crate) writes: BTreeMap<String, BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

/// A write transaction over a committed read view `B`.
pub(crate) struct StagedTx<'a, B: ReadTx + ?Sized> {
    base: &'a B,
    overlay: Overlay,
}

impl<'a, B: ReadTx + ?Sized> StagedTx<'a, B> {
    pub(crate) fn new(base: &'a B) -> Self {
        Self {
            base,
            overlay: Overlay::default(),
        }
    }

    pub(crate) fn into_overlay(self) -> Overlay {
        self.overlay
    }

    /// Whether committed contents of `ns` are visible to this transaction.
    fn base_visible(&self, ns: &str) -> bool {
        !self.overlay.dropped.contains(ns) && !self.overlay.created.contains(ns)
    }

    fn require(&self, ns: &str) -> Result<(), StoreError> {
        if self.namespace_exists(ns)? {
            Ok(())
        } else {
            Err(StoreError::NamespaceMissing(ns.to_string()))
        }
    }

    fn stage(&mut self, ns: &str, key: &[u8], value: Option<Vec<u8>>) -> Result<(), StoreError> {
        self.require(ns)?;
        self.overlay
            .writes
            .entry(ns.to_string())
            .or_default()
            .insert(key.to_vec(), value);
        Ok(())
    }
}

impl<B: ReadTx + ?Sized> ReadTx for StagedTx<'_, B> {
    fn namespace_exists(&self, ns: &str) -> Result<bool, StoreError> {
        if self.overlay.created.contains(ns) {
            return Ok(true);
        }
        if self.overlay.dropped.contains(ns) {
            return Ok(false);
        }
        self.base.namespace_exists(ns)
    }

    fn get(&self, ns: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.require(ns)?;
        if let Some(staged) = self.overlay.writes.get(ns).and_then(|w| w.get(key)) {
            return Ok(staged.clone());
        }
        if !self.base_visible(ns) {
            return Ok(None);
        }
        self.base.get(ns, key)
    }

    fn range(&self, ns: &str, start: Option<&[u8]>, limit: usize) -> Result<Rows, StoreError> {
        self.require(ns)?;
        let staged = self.overlay.writes.get(ns);
        let staged_len = staged.map_or(0, BTreeMap::len);

        // Every staged key can shadow at most one committed row, so fetching
        // `limit + staged_len` committed rows always covers the first `limit`
        // merged rows.
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        if self.base_visible(ns) {
            for (key, value) in self.base.range(ns, start, limit.saturating_add(staged_len))? {
                if staged.is_some_and(|w| w.contains_key(&key)) {
                    continue;
                }
                merged.insert(key, value);
            }
        }
        if let Some(writes) = staged {
            let from = start.unwrap_or_default().to_vec();
            for (key, value) in writes.range(from..) {
                if let Some(value) = value {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }

        Ok(merged.into_iter().take(limit).collect())
    }
}

impl<B: ReadTx + ?Sized> WriteTx for StagedTx<'_, B> {
    fn create_namespace(&mut self, ns: &str) -> Result<(), StoreError> {
        if self.namespace_exists(ns)? {
            return Err(StoreError::NamespaceExists(ns.to_string()));
        }
        self.overlay.created.insert(ns.to_string());
        Ok(())
    }

    fn delete_namespace(&mut self, ns: &str) -> Result<(), StoreError> {
        self.require(ns)?;
        self.overlay.created.remove(ns);
        self.overlay.dropped.insert(ns.to_string());
        self.overlay.writes.remove(ns);
        Ok(())
    }

    fn put(&mut self, ns: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.stage(ns, key, Some(value.to_vec()))
    }

    fn delete(&mut self, ns: &str, key: &[u8]) -> Result<(), StoreError> {
        self.stage(ns, key, None)
    }
}
