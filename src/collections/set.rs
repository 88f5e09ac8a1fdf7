use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use crate::cell::Discrete;
use crate::controller::{atomically, change, changed, is_active, used};
use crate::graph::SubjectHandle;
use crate::hash::FxIndexSet;
use crate::layer::Layer;

/// A reactive set: membership reads are tracked, and each writing pass
/// publishes the batch of values added and removed through two discrete
/// cells. The other collections are built over these batches.
pub struct SetCell<T: Hash + Eq + Clone + 'static> {
    core: Rc<SetCore<T>>,
}

struct SetCore<T: Hash + Eq + Clone + 'static> {
    subject: SubjectHandle,
    items: Rc<RefCell<FxIndexSet<T>>>,
    added: Discrete<Vec<T>>,
    removed: Discrete<Vec<T>>,
}

impl<T: Hash + Eq + Clone + 'static> SetCell<T> {
    pub fn new() -> Self {
        Self::named("")
    }

    pub fn named(label: impl Into<String>) -> Self {
        let label = label.into();
        SetCell {
            core: Rc::new(SetCore {
                subject: SubjectHandle::register(Layer::ZERO, label.clone()),
                items: Rc::new(RefCell::new(FxIndexSet::default())),
                added: Discrete::named(format!("{label}.added"), Vec::new()),
                removed: Discrete::named(format!("{label}.removed"), Vec::new()),
            }),
        }
    }

    pub fn insert(&self, value: T) {
        atomically(|| {
            if self.core.items.borrow().contains(&value) {
                return;
            }
            changed(&self.core.subject);
            let mut next = self.core.items.borrow().clone();
            next.insert(value.clone());
            change(&self.core.items, next);
            let mut batch = self.core.added.peek();
            batch.push(value);
            self.core.added.set(batch);
        });
    }

    pub fn remove(&self, value: &T) {
        atomically(|| {
            if !self.core.items.borrow().contains(value) {
                return;
            }
            changed(&self.core.subject);
            let mut next = self.core.items.borrow().clone();
            next.shift_remove(value);
            change(&self.core.items, next);
            let mut batch = self.core.removed.peek();
            batch.push(value.clone());
            self.core.removed.set(batch);
        });
    }

    pub fn contains(&self, value: &T) -> bool {
        self.track_read();
        self.core.items.borrow().contains(value)
    }

    pub fn len(&self) -> usize {
        self.track_read();
        self.core.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The members in insertion order.
    pub fn to_vec(&self) -> Vec<T> {
        self.track_read();
        self.core.items.borrow().iter().cloned().collect()
    }

    /// Like [`to_vec`](SetCell::to_vec), without recording a dependency.
    pub fn peek_vec(&self) -> Vec<T> {
        self.core.items.borrow().iter().cloned().collect()
    }

    /// The values added during the current pass; empty between passes.
    pub fn added(&self) -> Discrete<Vec<T>> {
        self.core.added.clone()
    }

    /// The values removed during the current pass; empty between passes.
    pub fn removed(&self) -> Discrete<Vec<T>> {
        self.core.removed.clone()
    }

    fn track_read(&self) {
        if is_active() {
            used(&self.core.subject);
        }
    }
}

impl<T: Hash + Eq + Clone + 'static> Clone for SetCell<T> {
    fn clone(&self) -> Self {
        SetCell {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Hash + Eq + Clone + 'static> Default for SetCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Hash + Eq + Clone + std::fmt::Debug + 'static> std::fmt::Debug for SetCell<T> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_set().entries(self.core.items.borrow().iter()).finish()
    }
}
