//! ReferenceRegistry: keyed collection of entries behind a single lock.
//!
//! The registry stores and hands out `Arc<ReferenceEntry<T>>` and knows
//! nothing about counts or loading. Every lookup is a single probe under
//! one lock acquisition, so a concurrent remove can never slip between a
//! presence check and the fetch.

use crate::entry::{EntryStatus, ReferenceEntry};
use crate::error::NotFound;
use crate::keyed_slots::KeyedSlots;
use core::hash::BuildHasher;
use parking_lot::RwLock;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::sync::Arc;

pub struct ReferenceRegistry<T, S = RandomState> {
    slots: RwLock<KeyedSlots<String, Arc<ReferenceEntry<T>>, S>>,
}

/// Read-only view of a registered entry: key, count and completion state.
pub struct ReadOnlyEntry<T> {
    entry: Arc<ReferenceEntry<T>>,
}

impl<T> ReadOnlyEntry<T> {
    pub fn key(&self) -> &str {
        self.entry.key()
    }
    pub fn count(&self) -> usize {
        self.entry.count()
    }
    pub fn is_done(&self) -> bool {
        self.entry.is_done()
    }
    pub fn status(&self) -> EntryStatus {
        self.entry.status()
    }
    pub fn debug_snapshot(&self) -> String {
        self.entry.debug_snapshot()
    }
}

impl<T> fmt::Debug for ReadOnlyEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.entry, f)
    }
}

/// Iterator over the entries registered when iteration started.
pub struct Iter<T> {
    inner: std::vec::IntoIter<Arc<ReferenceEntry<T>>>,
}

impl<T> Iterator for Iter<T> {
    type Item = ReadOnlyEntry<T>;
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|entry| ReadOnlyEntry { entry })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> ExactSizeIterator for Iter<T> {}

impl<T> ReferenceRegistry<T> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(KeyedSlots::new()),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: RwLock::new(KeyedSlots::with_capacity_and_hasher(
                capacity,
                RandomState::new(),
            )),
        }
    }
}

impl<T> Default for ReferenceRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> ReferenceRegistry<T, S>
where
    S: BuildHasher + Clone + Default,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            slots: RwLock::new(KeyedSlots::with_hasher(hasher)),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Register `entry` under `key`, overwriting any previous mapping.
    ///
    /// The replaced entry is returned as-is; its count and resource are not
    /// touched.
    pub fn put(
        &self,
        key: impl Into<String>,
        entry: Arc<ReferenceEntry<T>>,
    ) -> Option<Arc<ReferenceEntry<T>>> {
        let key = key.into();
        log::trace!("registering `{key}`");
        let (_, replaced) = self.slots.write().insert_or_replace(key, entry);
        replaced
    }

    pub fn get(&self, key: &str) -> Option<Arc<ReferenceEntry<T>>> {
        self.slots.read().get(key).cloned()
    }

    /// Same single-probe lookup as `get`, shaped as a found/not-found result.
    pub fn try_get(&self, key: &str) -> Result<Arc<ReferenceEntry<T>>, NotFound> {
        self.get(key).ok_or(NotFound)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.slots.read().contains_key(key)
    }

    /// Drop the mapping for `key`; no-op when absent.
    pub fn remove(&self, key: &str) -> Option<Arc<ReferenceEntry<T>>> {
        let removed = self.slots.write().remove(key).map(|(_, entry)| entry);
        if removed.is_some() {
            log::trace!("unregistered `{key}`");
        }
        removed
    }

    /// Drop the mapping for `key` only if it still points at `entry`.
    pub fn remove_entry(&self, key: &str, entry: &Arc<ReferenceEntry<T>>) -> bool {
        let mut slots = self.slots.write();
        let Some(handle) = slots.find(key) else {
            return false;
        };
        let same = slots
            .handle_value(handle)
            .is_some_and(|current| Arc::ptr_eq(current, entry));
        if !same {
            return false;
        }
        let _ = slots.remove_handle(handle);
        drop(slots);
        log::trace!("unregistered `{key}`");
        true
    }

    /// Look up `key`, registering the entry built by `make` when absent.
    ///
    /// Returns the registered entry and whether this call created it. The
    /// probe and the insert happen under one write lock, so concurrent
    /// callers for the same key agree on a single entry.
    pub fn get_or_insert_with<F>(&self, key: &str, make: F) -> (Arc<ReferenceEntry<T>>, bool)
    where
        F: FnOnce() -> ReferenceEntry<T>,
    {
        if let Some(entry) = self.get(key) {
            return (entry, false);
        }
        let mut slots = self.slots.write();
        if let Some(entry) = slots.get(key) {
            return (Arc::clone(entry), false);
        }
        let entry = Arc::new(make());
        let _ = slots.insert_or_replace(key.to_owned(), Arc::clone(&entry));
        drop(slots);
        log::trace!("registering `{key}`");
        (entry, true)
    }

    /// Read-only views of the entries registered right now.
    pub fn iter(&self) -> Iter<T> {
        let entries: Vec<_> = self
            .slots
            .read()
            .iter()
            .map(|(_, _, entry)| Arc::clone(entry))
            .collect();
        Iter {
            inner: entries.into_iter(),
        }
    }

    pub fn statuses(&self) -> Vec<EntryStatus> {
        self.iter().map(|view| view.status()).collect()
    }

    /// Pretty JSON array of every entry's status.
    pub fn debug_snapshot(&self) -> String {
        let statuses = self.statuses();
        serde_json::to_string_pretty(&statuses).unwrap_or_else(|err| format!("{statuses:?} ({err})"))
    }
}

impl<T, S> fmt::Debug for ReferenceRegistry<T, S>
where
    S: BuildHasher + Clone + Default,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.statuses()).finish()
    }
}
