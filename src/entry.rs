//! ReferenceEntry: load-completion state and reference count for one key.
//!
//! The entry moves through an explicit slot state:
//!
//! ```text
//! Loading(waiters) --mark_loaded--> Loaded(T) --last release--> Unloaded
//!        |                                                         ^
//!        +--last release--> Released --------mark_loaded-----------+
//! ```
//!
//! All transitions happen under the entry's mutex. The unload action runs
//! after the lock is dropped, once `Unloaded` has been published, so it may
//! read the entry's diagnostics without deadlocking.

use crate::error::EntryError;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use tokio::sync::oneshot;

type UnloadFn<T> = Box<dyn FnOnce(T) + Send>;

enum Slot<T> {
    /// Load in flight; one completion signal per pending acquire, FIFO.
    Loading(Vec<oneshot::Sender<T>>),
    Loaded(T),
    /// Last hold went away before the load finished.
    Released,
    /// Resource was handed to the unload action.
    Unloaded,
}

struct State<T> {
    count: usize,
    slot: Slot<T>,
    on_unload: Option<UnloadFn<T>>,
}

/// Read-only facet of an entry, as rendered by `debug_snapshot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryStatus {
    pub key: String,
    pub count: usize,
    pub is_done: bool,
}

impl EntryStatus {
    /// Pretty JSON rendering used for diagnostics.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|err| format!("{self:?} ({err})"))
    }
}

/// Reference-counted, asynchronously completed slot for one resource.
///
/// The creator holds the first reference (`count() == 1`). Every accepted
/// `acquire` adds one, every `release` removes one, and the release that
/// drops the count to zero hands the resource to the unload action.
pub struct ReferenceEntry<T> {
    key: String,
    state: Mutex<State<T>>,
}

enum Admission<T> {
    Ready(T),
    Pending(oneshot::Receiver<T>),
    Refused,
}

// Hold taken by a pending acquire; given back if the acquire is dropped
// before its completion signal resolves.
struct PendingHold<'a, T> {
    entry: &'a ReferenceEntry<T>,
    armed: bool,
}

impl<'a, T> Drop for PendingHold<'a, T> {
    fn drop(&mut self) {
        if self.armed {
            log::debug!("pending acquire of `{}` dropped", self.entry.key);
            // Reaching zero here leaves the entry `Released`. A registry
            // owner unregisters it once its next acquire is refused.
            let _ = self.entry.release();
        }
    }
}

#[inline]
fn increment(count: usize) -> usize {
    match count.checked_add(1) {
        Some(n) => n,
        // Follow Rc semantics: abort on overflow rather than continue unsafely.
        None => std::process::abort(),
    }
}

impl<T> ReferenceEntry<T> {
    pub fn new<F>(key: impl Into<String>, on_unload: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        Self {
            key: key.into(),
            state: Mutex::new(State {
                count: 1,
                slot: Slot::Loading(Vec::new()),
                on_unload: Some(Box::new(on_unload)),
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    /// True once the resource has been produced, including after it was
    /// unloaded again.
    pub fn is_done(&self) -> bool {
        matches!(self.state.lock().slot, Slot::Loaded(_) | Slot::Unloaded)
    }

    /// Number of acquires currently suspended on the load.
    pub fn pending_waiters(&self) -> usize {
        match &self.state.lock().slot {
            Slot::Loading(waiters) => waiters.iter().filter(|tx| !tx.is_closed()).count(),
            _ => 0,
        }
    }

    #[cfg(test)]
    fn waiter_slots(&self) -> usize {
        match &self.state.lock().slot {
            Slot::Loading(waiters) => waiters.len(),
            _ => 0,
        }
    }

    pub fn status(&self) -> EntryStatus {
        let state = self.state.lock();
        EntryStatus {
            key: self.key.clone(),
            count: state.count,
            is_done: matches!(state.slot, Slot::Loaded(_) | Slot::Unloaded),
        }
    }

    pub fn debug_snapshot(&self) -> String {
        self.status().to_json()
    }

    /// Drop one hold. Returns true when this call released the last hold.
    ///
    /// A release against an entry that already reached zero is ignored and
    /// returns false; the unload action never runs twice.
    pub fn release(&self) -> bool {
        let mut state = self.state.lock();
        if state.count == 0 {
            drop(state);
            log::debug!("redundant release of `{}` ignored", self.key);
            return false;
        }
        state.count -= 1;
        if state.count > 0 {
            return false;
        }

        match core::mem::replace(&mut state.slot, Slot::Unloaded) {
            Slot::Loaded(resource) => {
                let on_unload = state.on_unload.take();
                drop(state);
                log::debug!("last hold on `{}` released, unloading", self.key);
                if let Some(on_unload) = on_unload {
                    on_unload(resource);
                }
                true
            }
            Slot::Loading(_) => {
                state.slot = Slot::Released;
                drop(state);
                log::debug!("last hold on `{}` released before its load completed", self.key);
                true
            }
            // Holds are never granted once the count has reached zero.
            other @ (Slot::Released | Slot::Unloaded) => {
                state.slot = other;
                false
            }
        }
    }

    /// Give up an in-flight load, dropping the hold of whoever was running it.
    ///
    /// The entry becomes `Released`, so later acquires are refused, and every
    /// pending acquire resolves with `EntryError::Abandoned`, giving its own
    /// hold back as it does. Returns false when the load is no longer in
    /// flight; nothing changes then.
    pub fn abandon(&self) -> bool {
        let mut state = self.state.lock();
        let waiters = match core::mem::replace(&mut state.slot, Slot::Released) {
            Slot::Loading(waiters) => waiters,
            other => {
                state.slot = other;
                return false;
            }
        };
        // A loading slot always carries at least the loader's hold.
        state.count -= 1;
        drop(state);
        log::debug!(
            "load of `{}` abandoned, failing {} waiter(s)",
            self.key,
            waiters.len()
        );
        drop(waiters);
        true
    }
}

impl<T: Clone> ReferenceEntry<T> {
    /// Publish the loaded resource and resume every pending acquire in the
    /// order it registered.
    ///
    /// If every hold was released while the load was in flight, the resource
    /// goes straight to the unload action.
    pub fn mark_loaded(&self, resource: T) -> Result<(), EntryError> {
        let mut state = self.state.lock();
        match core::mem::replace(&mut state.slot, Slot::Unloaded) {
            Slot::Loading(waiters) => {
                let resumed = waiters.len();
                for tx in waiters {
                    // A closed receiver already gave its hold back.
                    let _ = tx.send(resource.clone());
                }
                state.slot = Slot::Loaded(resource);
                drop(state);
                log::debug!("`{}` loaded, resumed {} waiter(s)", self.key, resumed);
                Ok(())
            }
            Slot::Released => {
                let on_unload = state.on_unload.take();
                drop(state);
                log::debug!("`{}` loaded after its last release, unloading", self.key);
                if let Some(on_unload) = on_unload {
                    on_unload(resource);
                }
                Ok(())
            }
            other @ (Slot::Loaded(_) | Slot::Unloaded) => {
                state.slot = other;
                drop(state);
                log::warn!("`{}` marked loaded twice", self.key);
                Err(EntryError::AlreadyLoaded {
                    key: self.key.clone(),
                })
            }
        }
    }

    /// Take one hold and return the resource, waiting for the load if it is
    /// still in flight.
    ///
    /// The hold is counted as soon as the acquire is accepted. Dropping the
    /// returned future before it resolves gives the hold back.
    pub async fn acquire(&self) -> Result<T, EntryError> {
        let admission = {
            let mut state = self.state.lock();
            let admission = match &mut state.slot {
                Slot::Loaded(resource) => Admission::Ready(resource.clone()),
                Slot::Loading(waiters) => {
                    // Senders of dropped acquires are dead weight.
                    waiters.retain(|tx| !tx.is_closed());
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Admission::Pending(rx)
                }
                Slot::Released | Slot::Unloaded => Admission::Refused,
            };
            if !matches!(admission, Admission::Refused) {
                state.count = increment(state.count);
            }
            admission
        };

        match admission {
            Admission::Ready(resource) => Ok(resource),
            Admission::Refused => {
                log::warn!("acquire of `{}` after it was unloaded", self.key);
                Err(EntryError::Unloaded {
                    key: self.key.clone(),
                })
            }
            Admission::Pending(rx) => {
                let mut hold = PendingHold {
                    entry: self,
                    armed: true,
                };
                match rx.await {
                    Ok(resource) => {
                        hold.armed = false;
                        Ok(resource)
                    }
                    Err(_) => Err(EntryError::Abandoned {
                        key: self.key.clone(),
                    }),
                }
            }
        }
    }
}

impl<T> fmt::Debug for ReferenceEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.status();
        f.debug_struct("ReferenceEntry")
            .field("key", &status.key)
            .field("count", &status.count)
            .field("is_done", &status.is_done)
            .finish()
    }
}

impl<T> fmt::Display for ReferenceEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.debug_snapshot())
    }
}
