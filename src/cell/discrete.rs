use std::cell::RefCell;
use std::rc::Rc;

use crate::cell::{schedule_reset, write_through};
use crate::controller::{atomically, is_active, used};
use crate::graph::SubjectHandle;
use crate::layer::Layer;

/// A writable cell that rests at a sentinel value.
///
/// A write is visible to every listener scheduled within the writing
/// pass and to observers in the read-only phase; at commit the value
/// snaps back to the sentinel, so external code never sees the transient.
/// Event-like state (batches of additions, published messages) is built
/// from these.
pub struct Discrete<T: Clone + PartialEq + 'static> {
    core: Rc<DiscreteCore<T>>,
}

struct DiscreteCore<T> {
    subject: SubjectHandle,
    slot: Rc<RefCell<T>>,
    sentinel: T,
    reset_queued: Rc<RefCell<bool>>,
}

impl<T: Clone + PartialEq + 'static> Discrete<T> {
    pub fn new(sentinel: T) -> Self {
        Self::named("", sentinel)
    }

    pub fn named(label: impl Into<String>, sentinel: T) -> Self {
        Discrete {
            core: Rc::new(DiscreteCore {
                subject: SubjectHandle::register(Layer::ZERO, label),
                slot: Rc::new(RefCell::new(sentinel.clone())),
                sentinel,
                reset_queued: Rc::new(RefCell::new(false)),
            }),
        }
    }

    pub fn get(&self) -> T {
        if is_active() {
            used(&self.core.subject);
        }
        self.core.slot.borrow().clone()
    }

    /// Reads the current value without recording a dependency. For code
    /// that appends to an in-flight batch and must not become a reader
    /// of the cell it is about to write.
    pub fn peek(&self) -> T {
        self.core.slot.borrow().clone()
    }

    pub fn set(&self, value: T) {
        atomically(|| {
            if write_through(&self.core.subject, &self.core.slot, value) {
                schedule_reset(
                    &self.core.reset_queued,
                    &self.core.slot,
                    self.core.sentinel.clone(),
                );
            }
        });
    }
}

impl<T: Clone + PartialEq + 'static> Clone for Discrete<T> {
    fn clone(&self) -> Self {
        Discrete {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Clone + PartialEq + std::fmt::Debug + 'static> std::fmt::Debug for Discrete<T> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_tuple("Discrete")
            .field(&*self.core.slot.borrow())
            .finish()
    }
}
