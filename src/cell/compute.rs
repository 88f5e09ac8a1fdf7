use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::controller::{atomically, change, changed, initialize, is_active, is_readonly, used};
use crate::graph::{Listener, ListenerHandle, SubjectHandle};
use crate::layer::Layer;

/// A lazy rule cell: the rule re-runs on read, and only when a recorded
/// dependency has changed since the last run.
///
/// While nothing is linked to the compute's own subject, a dependency
/// change merely marks it stale and the recomputation waits for the next
/// read. Once readers exist, staleness schedules an eager re-run so they
/// are glitch-free like any other listener. A run that turns out to read
/// nothing demotes the cell to a constant: the rule is dropped and
/// subsequent reads are plain.
pub struct Compute<T: Clone + PartialEq + 'static> {
    core: Rc<ComputeCore<T>>,
}

struct ComputeCore<T> {
    subject: SubjectHandle,
    listener: RefCell<Option<ListenerHandle>>,
    rule: RefCell<Option<Box<dyn FnMut() -> T>>>,
    value: Rc<RefCell<Option<T>>>,
    /// Conservatively unlogged on the way up: a rolled-back pass leaves
    /// the cell stale and it recomputes on the next read.
    stale: Rc<RefCell<bool>>,
    demoted: Cell<bool>,
}

impl<T: Clone + PartialEq + 'static> Compute<T> {
    pub fn new(rule: impl FnMut() -> T + 'static) -> Self {
        Self::named("", rule)
    }

    pub fn named(label: impl Into<String>, rule: impl FnMut() -> T + 'static) -> Self {
        let label = label.into();
        let subject = SubjectHandle::register(Layer::ZERO, label.clone());
        let core = Rc::new_cyclic(|weak| ComputeCore {
            subject,
            listener: RefCell::new(Some(ListenerHandle::register(
                weak.clone() as std::rc::Weak<dyn Listener>,
                label,
            ))),
            rule: RefCell::new(Some(Box::new(rule))),
            value: Rc::new(RefCell::new(None)),
            stale: Rc::new(RefCell::new(true)),
            demoted: Cell::new(false),
        });
        if let Some(listener) = core.listener.borrow().as_ref() {
            listener.own_subject(&core.subject);
        }
        Compute { core }
    }

    pub fn get(&self) -> T {
        if !is_active() {
            return atomically(|| self.get());
        }
        if !self.core.demoted.get() && *self.core.stale.borrow() {
            // Refresh before linking the caller, so the recomputation's
            // own publish does not read as an inversion against it.
            if let Some(listener) = self.core.listener.borrow().as_ref() {
                initialize(listener);
            }
        }
        if self.core.demoted.get() {
            // The run decided it depends on nothing; retire the listener
            // half now that no borrow is outstanding.
            self.core.listener.borrow_mut().take();
        }
        used(&self.core.subject);
        self.core
            .value
            .borrow()
            .clone()
            .expect("compute rule has run")
    }
}

impl<T: Clone + PartialEq + 'static> ComputeCore<T> {
    /// Marks the cell constant and drops the rule. The listener handle
    /// itself is retired by the next read: a run may be executing under
    /// an outstanding borrow of the handle slot.
    fn demote(&self) {
        self.demoted.set(true);
        self.rule.borrow_mut().take();
    }
}

impl<T: Clone + PartialEq + 'static> Listener for ComputeCore<T> {
    fn run(&self) {
        // The rule stays in its slot while it runs, so an unwind (user
        // panic or an inversion rewind) cannot lose it.
        let next = {
            let mut rule = self.rule.borrow_mut();
            match rule.as_mut() {
                Some(rule) => rule(),
                None => return,
            }
        };
        change(&self.stale, false);
        let fresh = self.value.borrow().as_ref() != Some(&next);
        if fresh {
            if !is_readonly() {
                changed(&self.subject);
            }
            change(&self.value, Some(next));
        }
        let disconnected = self
            .listener
            .borrow()
            .as_ref()
            .map(|listener| listener.reads_nothing())
            .unwrap_or(true);
        if disconnected {
            self.demote();
        }
    }

    fn dirty(&self) -> bool {
        *self.stale.borrow_mut() = true;
        self.subject.has_listeners()
    }
}

impl<T: Clone + PartialEq + 'static> Clone for Compute<T> {
    fn clone(&self) -> Self {
        Compute {
            core: Rc::clone(&self.core),
        }
    }
}
