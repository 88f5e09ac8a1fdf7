use std::rc::Rc;

use crate::controller::{is_active, used};
use crate::graph::SubjectHandle;
use crate::layer::Layer;

/// A cell whose value never changes. It participates in the graph as a
/// subject (reads are recorded like any other), but it is never a
/// listener and never publishes a change, so links to it never fire.
pub struct Constant<T: Clone + 'static> {
    core: Rc<ConstantCore<T>>,
}

struct ConstantCore<T> {
    subject: SubjectHandle,
    value: T,
}

impl<T: Clone + 'static> Constant<T> {
    pub fn new(value: T) -> Self {
        Self::named("", value)
    }

    pub fn named(label: impl Into<String>, value: T) -> Self {
        Constant {
            core: Rc::new(ConstantCore {
                subject: SubjectHandle::register(Layer::ZERO, label),
                value,
            }),
        }
    }

    pub fn get(&self) -> T {
        if is_active() {
            used(&self.core.subject);
        }
        self.core.value.clone()
    }
}

impl<T: Clone + 'static> Clone for Constant<T> {
    fn clone(&self) -> Self {
        Constant {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Clone + std::fmt::Debug + 'static> std::fmt::Debug for Constant<T> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_tuple("Constant").field(&self.core.value).finish()
    }
}
