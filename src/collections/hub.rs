use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use crate::cell::schedule_reset;
use crate::controller::{atomically, change, changed, is_active, used};
use crate::graph::SubjectHandle;
use crate::hash::FxHashMap;
use crate::layer::Layer;

/// A publish/subscribe hub over tuple-shaped messages.
///
/// `put` publishes a message for the duration of the current pass;
/// `get` takes a pattern (with `None` as a positional wildcard) and
/// returns the matching messages in publication order, recording the
/// pattern as a dependency so a matching `put` re-runs the reader.
///
/// Patterns are indexed by their rightmost non-wildcard position and
/// value, so a `put` only touches subjects of patterns that can match
/// it — the cost scales with matching patterns, not registered ones.
/// All-wildcard patterns wait on a single catch-all subject.
pub struct Hub<V: Hash + Eq + Clone + 'static> {
    core: Rc<HubCore<V>>,
}

struct HubCore<V: Hash + Eq + Clone + 'static> {
    label: String,
    messages: Rc<RefCell<Vec<Vec<V>>>>,
    reset_queued: Rc<RefCell<bool>>,
    index: RefCell<FxHashMap<(usize, V), Rc<SubjectHandle>>>,
    catch_all: SubjectHandle,
}

impl<V: Hash + Eq + Clone + 'static> Hub<V> {
    pub fn new() -> Self {
        Self::named("hub")
    }

    pub fn named(label: impl Into<String>) -> Self {
        let label = label.into();
        Hub {
            core: Rc::new(HubCore {
                catch_all: SubjectHandle::register(Layer::ZERO, format!("{label}.*")),
                label,
                messages: Rc::new(RefCell::new(Vec::new())),
                reset_queued: Rc::new(RefCell::new(false)),
                index: RefCell::new(FxHashMap::default()),
            }),
        }
    }

    /// Publishes a message for the current pass. Readers whose patterns
    /// match are re-run; the message is gone once the scope commits.
    pub fn put(&self, message: Vec<V>) {
        atomically(|| {
            // Wake before writing, so a reader that already ran this
            // pass is rewound ahead of the message landing.
            let hits: Vec<Rc<SubjectHandle>> = {
                let index = self.core.index.borrow();
                message
                    .iter()
                    .enumerate()
                    .filter_map(|(position, value)| index.get(&(position, value.clone())).cloned())
                    .collect()
            };
            for subject in hits {
                changed(&subject);
            }
            changed(&self.core.catch_all);
            let mut next = self.core.messages.borrow().clone();
            next.push(message);
            change(&self.core.messages, next);
            schedule_reset(&self.core.reset_queued, &self.core.messages, Vec::new());
        });
    }

    /// The messages published this pass that match `pattern`, in
    /// publication order. A position holding `None` matches anything;
    /// lengths must agree exactly.
    pub fn get(&self, pattern: Vec<Option<V>>) -> Vec<Vec<V>> {
        if is_active() {
            self.track_pattern(&pattern);
        }
        self.core
            .messages
            .borrow()
            .iter()
            .filter(|message| matches(&pattern, message.as_slice()))
            .cloned()
            .collect()
    }

    fn track_pattern(&self, pattern: &[Option<V>]) {
        let rightmost = pattern
            .iter()
            .enumerate()
            .rev()
            .find_map(|(position, value)| value.clone().map(|value| (position, value)));
        match rightmost {
            Some(key) => {
                let registered = self.core.index.borrow().get(&key).cloned();
                let subject = registered.unwrap_or_else(|| {
                    let subject = Rc::new(SubjectHandle::register(
                        Layer::ZERO,
                        format!("{}[{}]", self.core.label, key.0),
                    ));
                    self.core
                        .index
                        .borrow_mut()
                        .insert(key, Rc::clone(&subject));
                    subject
                });
                used(&subject);
            }
            None => used(&self.core.catch_all),
        }
    }
}

fn matches<V: PartialEq>(pattern: &[Option<V>], message: &[V]) -> bool {
    pattern.len() == message.len()
        && pattern
            .iter()
            .zip(message)
            .all(|(wanted, got)| wanted.as_ref().map_or(true, |wanted| wanted == got))
}

impl<V: Hash + Eq + Clone + 'static> Clone for Hub<V> {
    fn clone(&self) -> Self {
        Hub {
            core: Rc::clone(&self.core),
        }
    }
}

impl<V: Hash + Eq + Clone + 'static> Default for Hub<V> {
    fn default() -> Self {
        Self::new()
    }
}
