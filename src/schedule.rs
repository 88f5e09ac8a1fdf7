//! The layered recalculation queue.
//!
//! Listeners are drained lowest layer first, FIFO within a layer. A
//! promotion re-enqueues the listener at its new layer and leaves the old
//! bucket entry behind; stale entries are recognized and skipped at pop
//! time by comparing against the membership map. Observers (the +inf
//! layer) wait in their own queue and drain only in the read-only phase.

use std::collections::{BTreeMap, VecDeque};

use crate::graph::ListenerId;
use crate::hash::{FxHashMap, FxHashSet};
use crate::layer::Layer;

pub(crate) struct Schedule {
    buckets: BTreeMap<Layer, VecDeque<ListenerId>>,
    /// Queued listeners and the layer their live bucket entry sits in.
    queued: FxHashMap<ListenerId, Layer>,
    observers: VecDeque<ListenerId>,
    observer_set: FxHashSet<ListenerId>,
}

impl Schedule {
    pub(crate) fn new() -> Self {
        Schedule {
            buckets: BTreeMap::new(),
            queued: FxHashMap::default(),
            observers: VecDeque::new(),
            observer_set: FxHashSet::default(),
        }
    }

    /// Enqueues `listener` at `layer`. Re-inserting at a new layer moves
    /// the listener; re-inserting at the same layer is a no-op (the
    /// original FIFO position is kept).
    pub(crate) fn insert(&mut self, listener: ListenerId, layer: Layer) {
        if layer.is_observer() {
            if self.observer_set.insert(listener) {
                self.observers.push_back(listener);
            }
            return;
        }
        if self.queued.get(&listener) == Some(&layer) {
            return;
        }
        self.queued.insert(listener, layer);
        self.buckets.entry(layer).or_default().push_back(listener);
    }

    pub(crate) fn cancel(&mut self, listener: ListenerId) {
        self.queued.remove(&listener);
        if self.observer_set.remove(&listener) {
            self.observers.retain(|queued| *queued != listener);
        }
    }

    pub(crate) fn contains(&self, listener: ListenerId) -> bool {
        self.queued.contains_key(&listener) || self.observer_set.contains(&listener)
    }

    /// Pops the next listener from the lowest non-empty layer, skipping
    /// entries orphaned by promotion or cancellation.
    pub(crate) fn pop_lowest(&mut self) -> Option<ListenerId> {
        loop {
            let (&layer, bucket) = self.buckets.iter_mut().next()?;
            match bucket.pop_front() {
                Some(listener) => {
                    if self.queued.get(&listener) == Some(&layer) {
                        self.queued.remove(&listener);
                        return Some(listener);
                    }
                    // Stale entry; the listener moved or was cancelled.
                }
                None => {
                    self.buckets.remove(&layer);
                }
            }
        }
    }

    pub(crate) fn pop_observer(&mut self) -> Option<ListenerId> {
        while let Some(listener) = self.observers.pop_front() {
            if self.observer_set.remove(&listener) {
                return Some(listener);
            }
        }
        None
    }

    pub(crate) fn clear(&mut self) {
        self.buckets.clear();
        self.queued.clear();
        self.observers.clear();
        self.observer_set.clear();
    }
}
