use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use crate::cell::{write_through, Discrete, Value};
use crate::collections::set::SetCell;
use crate::controller::{atomically, change, initialize, is_active, used};
use crate::graph::{Listener, ListenerHandle, SubjectHandle};
use crate::layer::Layer;

/// A slice edit: `(start, end, new_len)` replaces `view[start..end]` with
/// `new_len` elements of the new view at that position. Applying a pass's
/// edits in order to the previous view yields the new view.
pub type SliceEdit = (usize, usize, usize);

/// A sort key function, compared by identity so swapping in a new
/// function (even an identical one) re-sorts the view.
pub struct KeyFn<T, K>(Rc<dyn Fn(&T) -> K>);

impl<T, K> KeyFn<T, K> {
    pub fn new(key: impl Fn(&T) -> K + 'static) -> Self {
        KeyFn(Rc::new(key))
    }

    fn apply(&self, value: &T) -> K {
        (self.0)(value)
    }
}

impl<T, K> Clone for KeyFn<T, K> {
    fn clone(&self) -> Self {
        KeyFn(Rc::clone(&self.0))
    }
}

impl<T, K> PartialEq for KeyFn<T, K> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// An ordered view over a [`SetCell`], defined by a key function and a
/// reverse flag (both reactive). Alongside the settled view it maintains
/// a discrete `changes` cell carrying the pass's [`SliceEdit`]s: single
/// insertions and removals for membership changes, one full-view edit
/// when the key function or direction flips.
pub struct SortedIndex<T, K>
where
    T: Hash + Eq + Clone + 'static,
    K: Ord + 'static,
{
    core: Rc<SortedCore<T, K>>,
}

struct SortedCore<T, K>
where
    T: Hash + Eq + Clone + 'static,
    K: Ord + 'static,
{
    set: SetCell<T>,
    key: Value<KeyFn<T, K>>,
    reverse: Value<bool>,
    subject: SubjectHandle,
    listener: ListenerHandle,
    view: Rc<RefCell<Vec<T>>>,
    /// The key/direction the current view was built with; a mismatch on
    /// re-run means a full rebuild.
    shape: Rc<RefCell<(KeyFn<T, K>, bool)>>,
    changes: Discrete<Vec<SliceEdit>>,
}

impl<T, K> SortedIndex<T, K>
where
    T: Hash + Eq + Clone + 'static,
    K: Ord + 'static,
{
    pub fn new(set: &SetCell<T>, key: impl Fn(&T) -> K + 'static, reverse: bool) -> Self {
        Self::named("", set, key, reverse)
    }

    pub fn named(
        label: impl Into<String>,
        set: &SetCell<T>,
        key: impl Fn(&T) -> K + 'static,
        reverse: bool,
    ) -> Self {
        let label = label.into();
        let key = KeyFn::new(key);
        let mut view = set.peek_vec();
        sort_view(&mut view, &key, reverse);
        let subject = SubjectHandle::register(Layer::ZERO, label.clone());
        let core = Rc::new_cyclic(|weak| SortedCore {
            set: set.clone(),
            key: Value::named(format!("{label}.key"), key.clone()),
            reverse: Value::named(format!("{label}.reverse"), reverse),
            subject,
            listener: ListenerHandle::register(
                weak.clone() as std::rc::Weak<dyn Listener>,
                label.clone(),
            ),
            view: Rc::new(RefCell::new(view)),
            shape: Rc::new(RefCell::new((key, reverse))),
            changes: Discrete::named(format!("{label}.changes"), Vec::new()),
        });
        core.listener.own_subject(&core.subject);
        atomically(|| initialize(&core.listener));
        SortedIndex { core }
    }

    /// The settled, ordered view.
    pub fn view(&self) -> Vec<T> {
        if is_active() {
            used(&self.core.subject);
        }
        self.core.view.borrow().clone()
    }

    /// The discrete slice-edit log for the current pass.
    pub fn changes(&self) -> Discrete<Vec<SliceEdit>> {
        self.core.changes.clone()
    }

    pub fn set_reverse(&self, reverse: bool) {
        self.core.reverse.set(reverse);
    }

    pub fn set_key(&self, key: impl Fn(&T) -> K + 'static) {
        self.core.key.set(KeyFn::new(key));
    }
}

fn sort_view<T, K: Ord>(view: &mut [T], key: &KeyFn<T, K>, reverse: bool) {
    view.sort_by(|a, b| {
        let ordering = key.apply(a).cmp(&key.apply(b));
        if reverse {
            ordering.reverse()
        } else {
            ordering
        }
    });
}

impl<T, K> Listener for SortedCore<T, K>
where
    T: Hash + Eq + Clone + 'static,
    K: Ord + 'static,
{
    fn run(&self) {
        let added = self.set.added().get();
        let removed = self.set.removed().get();
        let key = self.key.get();
        let reverse = self.reverse.get();
        let shape_changed = {
            let shape = self.shape.borrow();
            shape.0 != key || shape.1 != reverse
        };

        let mut view = self.view.borrow().clone();
        let mut edits: Vec<SliceEdit> = Vec::new();

        if shape_changed {
            let old_len = view.len();
            view = self.set.to_vec();
            sort_view(&mut view, &key, reverse);
            edits.push((0, old_len, view.len()));
            change(&self.shape, (key.clone(), reverse));
        } else {
            let mut positions: Vec<usize> = removed
                .iter()
                .filter_map(|gone| view.iter().position(|item| item == gone))
                .collect();
            positions.sort_unstable_by(|a, b| b.cmp(a));
            for position in positions {
                edits.push((position, position + 1, 0));
                view.remove(position);
            }

            let mut incoming = added;
            sort_view(&mut incoming, &key, reverse);
            for item in incoming.into_iter().rev() {
                let item_key = key.apply(&item);
                let position = view.partition_point(|existing| {
                    let existing_key = key.apply(existing);
                    if reverse {
                        existing_key > item_key
                    } else {
                        existing_key < item_key
                    }
                });
                edits.push((position, position, 1));
                view.insert(position, item);
            }
        }

        if !edits.is_empty() {
            self.changes.set(edits);
            write_through(&self.subject, &self.view, view);
        }
    }
}

impl<T, K> Clone for SortedIndex<T, K>
where
    T: Hash + Eq + Clone + 'static,
    K: Ord + 'static,
{
    fn clone(&self) -> Self {
        SortedIndex {
            core: Rc::clone(&self.core),
        }
    }
}
