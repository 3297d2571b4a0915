//! ProxyRegistry: a process-wide, lock-protected map from registration path
//! to the live instance serving it, plus a stable first-registration order
//! used by snapshot iteration.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::instance::FailoverInstance;
use crate::upstream::Upstream;

struct Entry {
    instance: Arc<FailoverInstance>,
    upstreams_seen: HashSet<Upstream>,
}

/// One reader/writer lock for the whole registry; entries are taken by
/// value for snapshots so the lock is never held during rendering.
#[derive(Default)]
pub struct ProxyRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<String, Entry>,
    order: Vec<String>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// If `path` is unoccupied, create an entry and append to `order`. If
    /// occupied, replace `instance_ref` with the new instance and union
    /// `upstreams_seen` — supports hot re-provisioning without the registry
    /// accumulating ghosts.
    pub fn register(&self, path: &str, instance: Arc<FailoverInstance>) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        let new_upstreams: HashSet<Upstream> = instance.upstreams().iter().cloned().collect();

        match inner.entries.get_mut(path) {
            Some(entry) => {
                entry.instance = instance;
                entry.upstreams_seen.extend(new_upstreams);
            }
            None => {
                inner.entries.insert(
                    path.to_string(),
                    Entry {
                        instance,
                        upstreams_seen: new_upstreams,
                    },
                );
                inner.order.push(path.to_string());
            }
        }
    }

    /// Delete `path`'s entry only if it still points at `instance` — a stale
    /// cleanup racing a newer registration must not evict the successor.
    pub fn unregister(&self, path: &str, instance: &Arc<FailoverInstance>) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        let is_current = inner
            .entries
            .get(path)
            .is_some_and(|entry| Arc::ptr_eq(&entry.instance, instance));
        if is_current {
            inner.entries.remove(path);
            inner.order.retain(|p| p != path);
        }
    }

    /// Iterate `order`, skip any path whose entry has since been removed,
    /// and snapshot each remaining live instance. Always returns a `Vec`
    /// (never `None`), matching the "never null" status-endpoint invariant.
    pub fn snapshot(&self) -> Vec<Arc<FailoverInstance>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .order
            .iter()
            .filter_map(|path| inner.entries.get(path).map(|e| e.instance.clone()))
            .collect()
    }

    #[cfg(test)]
    fn order_len(&self) -> usize {
        self.inner.read().unwrap().order.len()
    }
}
