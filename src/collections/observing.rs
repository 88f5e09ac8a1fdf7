use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use crate::cell::{write_through, Discrete};
use crate::collections::set::SetCell;
use crate::controller::{atomically, initialize, is_active, used};
use crate::graph::{Listener, ListenerHandle, SubjectHandle};
use crate::hash::FxIndexMap;
use crate::layer::Layer;

/// The per-pass report of an [`ObservingMap`]: each key whose value or
/// membership changed, mapped to `(new, old)`. Additions are reported
/// with `new == old`; pure removals are not reported.
pub type ChangeReport<K, V> = FxIndexMap<K, (V, V)>;

/// A windowed key-to-value observer: over a key set and a lookup
/// function, maintains the map of current values and publishes a
/// discrete change report each pass. The lookup may read cells; the map
/// re-evaluates whenever those reads (or the key window) change.
pub struct ObservingMap<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    core: Rc<ObservingCore<K, V>>,
}

struct ObservingCore<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    keys: SetCell<K>,
    lookup: RefCell<Option<Box<dyn FnMut(&K) -> V>>>,
    subject: SubjectHandle,
    listener: ListenerHandle,
    map: Rc<RefCell<FxIndexMap<K, V>>>,
    changes: Discrete<ChangeReport<K, V>>,
}

impl<K, V> ObservingMap<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    pub fn new(keys: &SetCell<K>, lookup: impl FnMut(&K) -> V + 'static) -> Self {
        Self::named("", keys, lookup)
    }

    pub fn named(
        label: impl Into<String>,
        keys: &SetCell<K>,
        lookup: impl FnMut(&K) -> V + 'static,
    ) -> Self {
        let label = label.into();
        let subject = SubjectHandle::register(Layer::ZERO, label.clone());
        let core = Rc::new_cyclic(|weak| ObservingCore {
            keys: keys.clone(),
            lookup: RefCell::new(Some(Box::new(lookup))),
            subject,
            listener: ListenerHandle::register(
                weak.clone() as std::rc::Weak<dyn Listener>,
                label.clone(),
            ),
            map: Rc::new(RefCell::new(FxIndexMap::default())),
            changes: Discrete::named(format!("{label}.changes"), ChangeReport::default()),
        });
        core.listener.own_subject(&core.subject);
        atomically(|| initialize(&core.listener));
        ObservingMap { core }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        if is_active() {
            used(&self.core.subject);
        }
        self.core.map.borrow().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        if is_active() {
            used(&self.core.subject);
        }
        self.core.map.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The discrete change report for the current pass.
    pub fn changes(&self) -> Discrete<ChangeReport<K, V>> {
        self.core.changes.clone()
    }
}

impl<K, V> Listener for ObservingCore<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn run(&self) {
        let removed = self.keys.removed().get();
        let window = self.keys.to_vec();

        let mut map = self.map.borrow().clone();
        let mut report = ChangeReport::default();
        for gone in &removed {
            // Pure removals are dropped from the map but not reported.
            map.shift_remove(gone);
        }
        {
            // The lookup stays in its slot while it runs, so an unwind
            // cannot lose it.
            let mut lookup = self.lookup.borrow_mut();
            let Some(lookup) = lookup.as_mut() else {
                return;
            };
            for key in window {
                let new = lookup(&key);
                match map.get(&key) {
                    Some(old) if *old != new => {
                        report.insert(key.clone(), (new.clone(), old.clone()));
                        map.insert(key, new);
                    }
                    Some(_) => {}
                    None => {
                        report.insert(key.clone(), (new.clone(), new.clone()));
                        map.insert(key, new);
                    }
                }
            }
        }

        if !report.is_empty() {
            self.changes.set(report);
        }
        write_through(&self.subject, &self.map, map);
    }
}

impl<K, V> Clone for ObservingMap<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        ObservingMap {
            core: Rc::clone(&self.core),
        }
    }
}
