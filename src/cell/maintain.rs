use std::cell::RefCell;
use std::rc::Rc;

use crate::cell::{schedule_reset, write_through};
use crate::controller::{atomically, initialize, is_active, run_sealed, used};
use crate::graph::{Listener, ListenerHandle, SubjectHandle};
use crate::layer::Layer;

/// An eager rule cell: the rule re-runs whenever a dependency changes,
/// and its result is published like a write. The cell is also externally
/// writable, and a rule may read the cell's own previous value without
/// creating a self-dependency — which is what makes mutually-defined
/// pairs (each rule reading the other cell) settle instead of looping,
/// as long as their values converge.
///
/// Built in two steps so mutually-referential rules can capture each
/// other's handles:
///
/// ```
/// use espalier::cell::Maintain;
///
/// let celsius = Maintain::cell(0.0_f64);
/// let fahrenheit = Maintain::cell(32.0_f64);
/// fahrenheit.define({
///     let celsius = celsius.clone();
///     move || celsius.get() * 1.8 + 32.0
/// });
/// celsius.define({
///     let fahrenheit = fahrenheit.clone();
///     move || (fahrenheit.get() - 32.0) / 1.8
/// });
///
/// celsius.set(100.0);
/// assert_eq!(fahrenheit.get(), 212.0);
/// ```
pub struct Maintain<T: Clone + PartialEq + 'static> {
    core: Rc<MaintainCore<T>>,
}

struct MaintainCore<T> {
    subject: SubjectHandle,
    listener: ListenerHandle,
    value: Rc<RefCell<T>>,
    rule: RefCell<Option<Box<dyn FnMut() -> T>>>,
    /// Present for discrete maintains: the value the cell rests at
    /// between passes.
    resetting_to: Option<T>,
    reset_queued: Rc<RefCell<bool>>,
}

impl<T: Clone + PartialEq + 'static> Maintain<T> {
    pub fn builder() -> MaintainBuilder<T> {
        MaintainBuilder {
            label: String::new(),
            initial: None,
            make: None,
            resetting_to: None,
        }
    }

    /// An undefined maintain holding `initial`; install the rule later
    /// with [`define`](Maintain::define).
    pub fn cell(initial: T) -> Self {
        Self::builder().initially(initial).build()
    }

    pub fn new(initial: T, rule: impl FnMut() -> T + 'static) -> Self {
        let cell = Self::cell(initial);
        cell.define(rule);
        cell
    }

    /// Installs the rule and runs it once to record its dependencies.
    /// Panics if a rule was already installed.
    pub fn define(&self, rule: impl FnMut() -> T + 'static) {
        {
            let mut slot = self.core.rule.borrow_mut();
            assert!(slot.is_none(), "maintain rule is already defined");
            *slot = Some(Box::new(rule));
        }
        atomically(|| initialize(&self.core.listener));
    }

    pub fn get(&self) -> T {
        if is_active() {
            used(&self.core.subject);
        }
        self.core.value.borrow().clone()
    }

    /// The current layer of the cell's rule listener.
    pub fn layer(&self) -> Layer {
        self.core.listener.layer()
    }

    pub fn set(&self, value: T) {
        atomically(|| {
            if write_through(&self.core.subject, &self.core.value, value) {
                self.core.queue_reset();
            }
        });
    }
}

impl<T: Clone + PartialEq + 'static> MaintainCore<T> {
    fn queue_reset(&self) {
        if let Some(sentinel) = &self.resetting_to {
            schedule_reset(&self.reset_queued, &self.value, sentinel.clone());
        }
    }
}

impl<T: Clone + PartialEq + 'static> Listener for MaintainCore<T> {
    fn run(&self) {
        // The rule stays in its slot while it runs: an unwind (user panic
        // or an inversion rewind) must not lose it.
        let next = {
            let mut rule = self.rule.borrow_mut();
            match rule.as_mut() {
                Some(rule) => rule(),
                None => return,
            }
        };
        if write_through(&self.subject, &self.value, next) {
            self.queue_reset();
        }
    }
}

impl<T: Clone + PartialEq + 'static> Clone for Maintain<T> {
    fn clone(&self) -> Self {
        Maintain {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Clone + PartialEq + std::fmt::Debug + 'static> std::fmt::Debug for Maintain<T> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_tuple("Maintain")
            .field(&*self.core.value.borrow())
            .finish()
    }
}

/// Construction options for [`Maintain`].
pub struct MaintainBuilder<T> {
    label: String,
    initial: Option<T>,
    make: Option<Box<dyn FnOnce() -> T>>,
    resetting_to: Option<T>,
}

impl<T: Clone + PartialEq + 'static> MaintainBuilder<T> {
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Seeds the cell's value before the rule first runs.
    pub fn initially(mut self, value: T) -> Self {
        self.initial = Some(value);
        self
    }

    /// Seeds the cell's value from a closure run at build time. The
    /// closure must not read other cells; reads during it panic.
    pub fn make(mut self, make: impl FnOnce() -> T + 'static) -> Self {
        self.make = Some(Box::new(make));
        self
    }

    /// Makes the maintain discrete: after any pass in which it was
    /// written, the value snaps back to `sentinel` at commit.
    pub fn resetting_to(mut self, sentinel: T) -> Self {
        self.resetting_to = Some(sentinel);
        self
    }

    pub fn build(self) -> Maintain<T> {
        let MaintainBuilder {
            label,
            initial,
            make,
            resetting_to,
        } = self;
        let initial = match (initial, make) {
            (Some(value), _) => value,
            (None, Some(make)) => atomically(|| run_sealed(make)),
            (None, None) => panic!("a maintain needs `initially` or `make` to seed its value"),
        };
        let subject = SubjectHandle::register(Layer::ZERO, label.clone());
        let core = Rc::new_cyclic(|weak| MaintainCore {
            subject,
            listener: ListenerHandle::register(
                weak.clone() as std::rc::Weak<dyn Listener>,
                label,
            ),
            value: Rc::new(RefCell::new(initial)),
            rule: RefCell::new(None),
            resetting_to,
            reset_queued: Rc::new(RefCell::new(false)),
        });
        core.listener.own_subject(&core.subject);
        Maintain { core }
    }
}
