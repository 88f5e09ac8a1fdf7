//! The thread-local controller slot.
//!
//! Each thread owns exactly one [`Controller`]; every public engine
//! function reaches it through this module. Internally the slot is a
//! ref-cell: borrows are taken for short bookkeeping steps and are never
//! held while user code (rules, observers, callbacks, manager hooks)
//! runs, so those may re-enter the engine freely.

use std::cell::RefCell;

use crate::controller::Controller;
use crate::graph::{ListenerId, SubjectId};

thread_local! {
    /// The per-thread controller state.
    static CONTROLLER: RefCell<Controller> = RefCell::new(Controller::new());
}

/// Runs `op` with the thread's controller borrowed. The borrow must not
/// escape into user code; callers split their work into borrow phases
/// around every user callback.
pub(crate) fn with<R>(op: impl FnOnce(&mut Controller) -> R) -> R {
    CONTROLLER.with(|slot| op(&mut slot.borrow_mut()))
}

/// Best-effort variant for drop paths. Handle destructors may run while
/// the controller is already borrowed (a rollback dropping the last
/// reference to a cell, or thread teardown); the release is skipped then,
/// and the liveness checks on the weak runner references make the stale
/// table rows harmless.
fn with_if_available(op: impl FnOnce(&mut Controller)) {
    let _ = CONTROLLER.try_with(|slot| {
        if let Ok(mut controller) = slot.try_borrow_mut() {
            op(&mut controller);
        }
    });
}

pub(crate) fn release_subject(id: SubjectId) {
    with_if_available(|ctl| ctl.release_subject(id));
}

pub(crate) fn release_listener(id: ListenerId) {
    with_if_available(|ctl| ctl.release_listener(id));
}

/// Replaces the thread's controller with a fresh one.
///
/// Only sound while no atomic scope is open and before any client has
/// cached handles into the old controller; registrations made against the
/// old controller are orphaned, not migrated. Panics if a scope is
/// active.
pub fn replace_controller() {
    CONTROLLER.with(|slot| {
        let mut controller = slot.borrow_mut();
        assert!(
            !controller.is_active(),
            "cannot replace the controller inside an atomic scope"
        );
        *controller = Controller::new();
    });
}
