//! Cell kinds: user-facing reactive values built on the subject/listener
//! contracts.
//!
//! Every cell is a subject; rule cells (compute, maintain, observer) are
//! also listeners. Cell handles are cheap clones sharing an `Rc` core;
//! values are equality-gated, so re-assigning an equal value publishes
//! nothing.

use std::cell::RefCell;
use std::rc::Rc;

use crate::controller::{change, changed, on_commit};
use crate::graph::SubjectHandle;

pub mod compute;
pub mod constant;
pub mod discrete;
pub mod maintain;
pub mod observer;
pub mod value;

pub use compute::Compute;
pub use constant::Constant;
pub use discrete::Discrete;
pub use maintain::{Maintain, MaintainBuilder};
pub use observer::Observer;
pub use value::{Value, ValueBuilder};

/// Publishes a new value through a cell's subject: no-op on equality,
/// otherwise `changed` (which may trigger inversion recovery before the
/// write lands) followed by the logged write. Returns whether the value
/// changed.
pub(crate) fn write_through<T: PartialEq + 'static>(
    subject: &SubjectHandle,
    slot: &Rc<RefCell<T>>,
    value: T,
) -> bool {
    if *slot.borrow() == value {
        return false;
    }
    changed(subject);
    change(slot, value);
    true
}

/// Arranges for a discrete cell's slot to snap back to its sentinel when
/// the scope commits, at most once per pass. The reset is itself a logged
/// write, so a commit callback failing later still unwinds it.
pub(crate) fn schedule_reset<T: 'static>(
    queued: &Rc<RefCell<bool>>,
    slot: &Rc<RefCell<T>>,
    sentinel: T,
) {
    if *queued.borrow() {
        return;
    }
    change(queued, true);
    let queued = Rc::clone(queued);
    let slot = Rc::clone(slot);
    on_commit(move || {
        *queued.borrow_mut() = false;
        change(&slot, sentinel);
    });
}
