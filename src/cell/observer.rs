use std::cell::RefCell;
use std::rc::Rc;

use crate::controller::{atomically, schedule_listener};
use crate::graph::{Listener, ListenerHandle};

/// A side-effecting sink: runs in the read-only phase of every pass in
/// which a subject it read has changed, and once at creation.
///
/// Observers live at the observer layer, after every finite layer has
/// settled, so they only ever see fully-recalculated state. They must
/// not write cells; a write from an observer aborts and rolls back the
/// whole scope. Dropping the handle retires the observer.
pub struct Observer {
    core: Rc<ObserverCore>,
}

struct ObserverCore {
    listener: ListenerHandle,
    action: RefCell<Option<Box<dyn FnMut()>>>,
}

impl Observer {
    pub fn new(action: impl FnMut() + 'static) -> Self {
        Self::named("", action)
    }

    pub fn named(label: impl Into<String>, action: impl FnMut() + 'static) -> Self {
        let core = Rc::new_cyclic(|weak| ObserverCore {
            listener: ListenerHandle::register_observer(
                weak.clone() as std::rc::Weak<dyn Listener>,
                label,
            ),
            action: RefCell::new(Some(Box::new(action))),
        });
        atomically(|| schedule_listener(&core.listener, None));
        Observer { core }
    }
}

impl Listener for ObserverCore {
    fn run(&self) {
        let mut action = self.action.borrow_mut();
        if let Some(action) = action.as_mut() {
            action();
        }
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "Observer({:?})", self.core.listener)
    }
}
