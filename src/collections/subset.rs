use std::hash::Hash;
use std::rc::Rc;

use crate::cell::Discrete;
use crate::collections::set::SetCell;
use crate::controller::{atomically, initialize};
use crate::graph::{Listener, ListenerHandle};

/// A [`SetCell`] constrained to membership in a base set: inserting a
/// value that is not in the base is silently dropped, and removals from
/// the base propagate into the subset.
pub struct Subset<T: Hash + Eq + Clone + 'static> {
    core: Rc<SubsetCore<T>>,
}

struct SubsetCore<T: Hash + Eq + Clone + 'static> {
    base: SetCell<T>,
    items: SetCell<T>,
    listener: ListenerHandle,
}

impl<T: Hash + Eq + Clone + 'static> Subset<T> {
    pub fn new(base: &SetCell<T>) -> Self {
        Self::named("", base)
    }

    pub fn named(label: impl Into<String>, base: &SetCell<T>) -> Self {
        let label = label.into();
        let core = Rc::new_cyclic(|weak| SubsetCore {
            base: base.clone(),
            items: SetCell::named(label.clone()),
            listener: ListenerHandle::register(
                weak.clone() as std::rc::Weak<dyn Listener>,
                label,
            ),
        });
        atomically(|| initialize(&core.listener));
        Subset { core }
    }

    pub fn insert(&self, value: T) {
        atomically(|| {
            if self.core.base.contains(&value) {
                self.core.items.insert(value);
            }
        });
    }

    pub fn remove(&self, value: &T) {
        self.core.items.remove(value);
    }

    pub fn contains(&self, value: &T) -> bool {
        self.core.items.contains(value)
    }

    pub fn len(&self) -> usize {
        self.core.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.items.is_empty()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.core.items.to_vec()
    }

    pub fn added(&self) -> Discrete<Vec<T>> {
        self.core.items.added()
    }

    pub fn removed(&self) -> Discrete<Vec<T>> {
        self.core.items.removed()
    }
}

impl<T: Hash + Eq + Clone + 'static> Listener for SubsetCore<T> {
    fn run(&self) {
        for gone in self.base.removed().get() {
            self.items.remove(&gone);
        }
    }
}

impl<T: Hash + Eq + Clone + 'static> Clone for Subset<T> {
    fn clone(&self) -> Self {
        Subset {
            core: Rc::clone(&self.core),
        }
    }
}
