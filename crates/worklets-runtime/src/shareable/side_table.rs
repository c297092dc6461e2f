//! Weak side tables owned by each runtime.
//!
//! Entries relate a process-unique id to a per-runtime value without ever
//! owning the Rust-side owner of that id. Lookups only succeed while the
//! owner is alive; dead entries are swept once the table grows past a
//! threshold.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

pub(crate) struct WeakTable<O, V> {
    entries: HashMap<u64, (Weak<O>, V)>,
    min_threshold: usize,
    threshold: usize,
}

impl<O, V: Clone> WeakTable<O, V> {
    pub(crate) fn new(threshold: usize) -> Self {
        Self {
            entries: HashMap::new(),
            min_threshold: threshold,
            threshold,
        }
    }

    pub(crate) fn insert(&mut self, id: u64, owner: &Arc<O>, value: V) {
        self.entries.insert(id, (Arc::downgrade(owner), value));
        if self.entries.len() >= self.threshold {
            self.prune();
            self.threshold = self.min_threshold.max(self.entries.len() * 2);
        }
    }

    /// Returns the live owner and value recorded for `id`.
    pub(crate) fn get(&self, id: u64) -> Option<(Arc<O>, V)> {
        let (owner, value) = self.entries.get(&id)?;
        owner.upgrade().map(|owner| (owner, value.clone()))
    }

    pub(crate) fn value(&self, id: u64) -> Option<V> {
        self.get(id).map(|(_, value)| value)
    }

    /// Drops every entry whose owner is gone. Returns how many were removed.
    pub(crate) fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, (owner, _)| owner.strong_count() > 0);
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!("Pruned {} dead side-table entries", removed);
        }
        removed
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
