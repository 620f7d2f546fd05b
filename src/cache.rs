//! ResourceCache: deduplicated load-or-join on top of the registry.

use crate::entry::{EntryStatus, ReferenceEntry};
use crate::error::EntryError;
use crate::registry::ReferenceRegistry;
use std::future::Future;
use std::sync::Arc;

/// Produces resources for keys and takes them back once unused.
pub trait Loader<T>: Send + Sync {
    /// Fetch the resource stored under `key`. Runs at most once per key
    /// while a load of that key is in flight.
    fn load(&self, key: &str) -> impl Future<Output = T> + Send;

    /// Dispose of a resource whose last hold was released.
    fn unload(&self, key: &str, resource: T);
}

/// Owned registry plus the loader feeding it.
///
/// `acquire` either starts the load of a key or joins the entry already
/// registered for it; `release` gives one hold back and unregisters the
/// entry once it is fully unloaded, so the next `acquire` loads afresh.
pub struct ResourceCache<T, L> {
    registry: ReferenceRegistry<T>,
    loader: Arc<L>,
}

// Creator's hold on an entry whose load is still running. If the loading
// future is dropped first, the load is abandoned: joined acquires fail over
// to a fresh entry and the orphaned one is unregistered.
struct LoadingHold<'a, T> {
    registry: &'a ReferenceRegistry<T>,
    entry: &'a Arc<ReferenceEntry<T>>,
    key: &'a str,
    armed: bool,
}

impl<'a, T> Drop for LoadingHold<'a, T> {
    fn drop(&mut self) {
        if self.armed {
            log::debug!("load of `{}` dropped before completion", self.key);
            self.registry.remove_entry(self.key, self.entry);
            self.entry.abandon();
        }
    }
}

impl<T, L> ResourceCache<T, L>
where
    T: Clone + Send + 'static,
    L: Loader<T> + 'static,
{
    pub fn new(loader: L) -> Self {
        Self::with_registry(loader, ReferenceRegistry::new())
    }

    pub fn with_registry(loader: L, registry: ReferenceRegistry<T>) -> Self {
        Self {
            registry,
            loader: Arc::new(loader),
        }
    }

    pub fn registry(&self) -> &ReferenceRegistry<T> {
        &self.registry
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn statuses(&self) -> Vec<EntryStatus> {
        self.registry.statuses()
    }

    fn new_entry(&self, key: &str) -> ReferenceEntry<T> {
        let loader = Arc::clone(&self.loader);
        let owned = key.to_owned();
        ReferenceEntry::new(key, move |resource| loader.unload(&owned, resource))
    }

    /// Take one hold on `key`, loading it if no entry is registered.
    pub async fn acquire(&self, key: &str) -> Result<T, EntryError> {
        loop {
            let (entry, created) = self
                .registry
                .get_or_insert_with(key, || self.new_entry(key));

            if created {
                log::debug!("loading `{key}`");
                let mut hold = LoadingHold {
                    registry: &self.registry,
                    entry: &entry,
                    key,
                    armed: true,
                };
                let resource = self.loader.load(key).await;
                hold.armed = false;
                entry.mark_loaded(resource.clone())?;
                return Ok(resource);
            }

            match entry.acquire().await {
                // Lost the race with the last release; register a fresh entry.
                Err(EntryError::Unloaded { .. }) => {
                    log::debug!("`{key}` unloaded under a concurrent acquire, retrying");
                    self.registry.remove_entry(key, &entry);
                }
                // The acquire running the load was dropped; start over.
                Err(EntryError::Abandoned { .. }) => {
                    log::debug!("load of `{key}` abandoned under a joined acquire, retrying");
                    self.registry.remove_entry(key, &entry);
                }
                result => return result,
            }
        }
    }

    /// Give back one hold on `key`. Returns true when that was the last hold;
    /// the resource has then been unloaded and the key unregistered.
    pub fn release(&self, key: &str) -> bool {
        let Some(entry) = self.registry.get(key) else {
            log::warn!("release of unregistered `{key}`");
            return false;
        };
        let unloaded = entry.release();
        if unloaded {
            self.registry.remove_entry(key, &entry);
        }
        unloaded
    }
}
