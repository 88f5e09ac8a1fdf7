use std::cell::RefCell;
use std::rc::Rc;

use crate::cell::write_through;
use crate::controller::{atomically, is_active, used};
use crate::graph::{Manager, SubjectHandle};
use crate::layer::Layer;

/// A writable cell holding a plain value.
///
/// Reads inside an atomic scope are recorded as dependencies of the
/// current listener; reads outside a scope see the last committed value
/// directly. Writes open (or join) an atomic scope and publish the
/// change to every reader — unless the new value equals the old one, in
/// which case nothing happens at all.
pub struct Value<T: Clone + PartialEq + 'static> {
    core: Rc<ValueCore<T>>,
}

struct ValueCore<T> {
    subject: SubjectHandle,
    slot: Rc<RefCell<T>>,
}

impl<T: Clone + PartialEq + 'static> Value<T> {
    pub fn new(value: T) -> Self {
        Self::builder().build(value)
    }

    pub fn named(label: impl Into<String>, value: T) -> Self {
        Self::builder().label(label).build(value)
    }

    pub fn builder() -> ValueBuilder<T> {
        ValueBuilder::default()
    }

    pub fn get(&self) -> T {
        if is_active() {
            used(&self.core.subject);
        }
        self.core.slot.borrow().clone()
    }

    pub fn set(&self, value: T) {
        atomically(|| {
            write_through(&self.core.subject, &self.core.slot, value);
        });
    }
}

impl<T: Clone + PartialEq + 'static> Clone for Value<T> {
    fn clone(&self) -> Self {
        Value {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Clone + PartialEq + std::fmt::Debug + 'static> std::fmt::Debug for Value<T> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_tuple("Value").field(&*self.core.slot.borrow()).finish()
    }
}

/// Construction options for [`Value`].
pub struct ValueBuilder<T> {
    label: String,
    layer: Layer,
    manager: Option<Rc<dyn Manager>>,
    phantom: std::marker::PhantomData<fn() -> T>,
}

impl<T> Default for ValueBuilder<T> {
    fn default() -> Self {
        ValueBuilder {
            label: String::new(),
            layer: Layer::ZERO,
            manager: None,
            phantom: std::marker::PhantomData,
        }
    }
}

impl<T: Clone + PartialEq + 'static> ValueBuilder<T> {
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Places the subject at a fixed non-zero layer.
    pub fn layer(mut self, layer: Layer) -> Self {
        self.layer = layer;
        self
    }

    /// Attaches a scoped manager, entered the first time the cell is
    /// touched within a scope.
    pub fn managed(mut self, manager: Rc<dyn Manager>) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn build(self, value: T) -> Value<T> {
        let subject = SubjectHandle::register_managed(self.layer, self.label, self.manager);
        Value {
            core: Rc::new(ValueCore {
                subject,
                slot: Rc::new(RefCell::new(value)),
            }),
        }
    }
}
