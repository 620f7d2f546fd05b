//! load-ref-cache: reference-counted entries for asynchronously loaded
//! resources, keyed by logical path, with deduplicated loads and an
//! unload action that fires once when the last holder lets go.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: one load per key while it is in flight, one shared resource for
//!   every waiter, one unload when the last hold is released.
//! - Layers:
//!   - KeyedSlots<K, V, S>: structural map over a generational slot arena
//!     with a hash index; last-write-wins inserts, single-probe lookups.
//!   - ReferenceEntry<T>: per-key state machine (loading, loaded, released,
//!     unloaded), reference count and FIFO completion signals.
//!   - ReferenceRegistry<T, S>: owned keyed collection of entries behind a
//!     lock; no count or loading logic.
//!   - ResourceCache<T, L>: the load-or-join / release-and-unregister flow
//!     over a registry and a `Loader`.
//!
//! Constraints
//! - Works from a single cooperative thread and from many threads alike:
//!   every entry guards its state with a mutex, the registry guards its map
//!   with a read-write lock.
//! - Resources are handed out by clone (`T: Clone`), typically an `Arc`.
//! - The unload action is an `FnOnce` and runs outside the entry lock.
//!
//! Counting
//! - A new entry starts with one hold, owned by the caller that created it.
//! - `acquire` counts its hold when it is accepted, before it suspends on
//!   the load. Dropping a pending acquire gives the hold back.
//! - `release` at zero is ignored. Reference-count overflow aborts, like
//!   `Rc`.
//!
//! Notes and non-goals
//! - No failure channel: if a load never completes, its waiters keep
//!   waiting. Loader errors belong to the loader.
//! - No eviction beyond "unload when the count reaches zero".
//! - Nothing is persisted; a registry lives as long as its owner.

mod cache;
mod entry;
mod error;
#[cfg(feature = "bench_internal")]
pub mod keyed_slots;
#[cfg(not(feature = "bench_internal"))]
mod keyed_slots;
mod keyed_slots_proptest;
mod registry;

// Public surface
pub use cache::{Loader, ResourceCache};
pub use entry::{EntryStatus, ReferenceEntry};
pub use error::{EntryError, NotFound};
pub use registry::{Iter, ReadOnlyEntry, ReferenceRegistry};
