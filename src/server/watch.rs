//! Per-connection WATCH state.
//!
//! Each WATCH call registers one [`Watcher`] on the cluster-wide listener
//! bus, filtered to the watched keys. Any create, modify, remove or expire
//! event for one of those keys, from any node, flips the watcher's dirty
//! flag. The flag is never cleared: only a fresh WATCH starts clean.
//!
//! Watchers deregister themselves when dropped, so draining the registry
//! at EXEC, DISCARD, UNWATCH or connection close removes every listener.

use crate::Result;
use crate::storage::{Cache, CacheEvent, EventKinds, KeyListener, ListenerBus, ListenerId};
use crate::types::Key;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

/// Listener half of a watcher; may be invoked from any thread.
#[derive(Debug, Default)]
struct DirtyFlag(AtomicBool);

impl KeyListener for DirtyFlag {
    fn on_event(&self, event: &CacheEvent) {
        trace!(key = ?event.key, kind = ?event.kind, origin = event.origin, "Watched key touched");
        self.0.store(true, Ordering::Release);
    }
}

/// Optimistic guard on a set of keys.
pub struct Watcher {
    keys: Vec<Key>,
    flag: Arc<DirtyFlag>,
    id: ListenerId,
    bus: Arc<ListenerBus>,
}

impl Watcher {
    /// Register a watcher for `keys` on the bus behind `cache`.
    pub fn register(cache: &Cache, keys: Vec<Key>) -> Result<Self> {
        let flag = Arc::new(DirtyFlag::default());
        let id = cache.add_listener(flag.clone(), EventKinds::all(), Some(keys.clone()))?;
        Ok(Self {
            keys,
            flag,
            id,
            bus: Arc::clone(cache.engine().bus()),
        })
    }

    /// True once any watched key has changed since registration.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.flag.0.load(Ordering::Acquire)
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.bus.deregister(self.id);
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("keys", &self.keys.len())
            .field("dirty", &self.is_dirty())
            .field("id", &self.id)
            .finish()
    }
}

/// Ordered watchers of one connection.
///
/// A failed WATCH poisons the registry so the next EXEC aborts.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    watchers: Vec<Watcher>,
    poisoned: bool,
}

impl WatchRegistry {
    /// Watch `keys` through `cache`.
    pub fn watch(&mut self, cache: &Cache, keys: Vec<Key>) -> Result<()> {
        match Watcher::register(cache, keys) {
            Ok(watcher) => {
                self.watchers.push(watcher);
                Ok(())
            }
            Err(e) => {
                debug!(error = %e, "WATCH registration failed, poisoning registry");
                self.poisoned = true;
                Err(e)
            }
        }
    }

    /// Drop every watcher and clear the poison flag.
    pub fn clear(&mut self) {
        self.watchers.clear();
        self.poisoned = false;
    }

    /// Whether EXEC must abort.
    pub fn should_abort(&self) -> bool {
        self.poisoned || self.watchers.iter().any(Watcher::is_dirty)
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Move the watchers out, leaving this registry empty.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }
}
