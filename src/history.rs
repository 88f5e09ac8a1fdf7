//! Atomic-scope bookkeeping: the undo log, the commit queue, the manager
//! set, and savepoints over all three.
//!
//! The undo log mixes user callbacks with engine entries (write un-marks
//! and link restores); replay happens in the controller, which owns the
//! graph tables the engine entries refer to. Undo callbacks are required
//! to restore state and nothing else: they must not panic and must not
//! re-enter the engine. A panicking undo callback drops the rest of the
//! chain on the floor and propagates, which is a defect in the callback,
//! not a recoverable condition.

use std::any::Any;
use std::rc::Rc;

use crate::graph::{ListenerId, Manager, SubjectId};

/// One entry in the undo log, replayed in LIFO order on rollback.
pub(crate) enum UndoOp {
    /// A user callback registered through `on_undo`, or a value restore
    /// pushed by `change`.
    Call(Box<dyn FnOnce()>),

    /// Pop the most recent writer recorded for the subject this pass.
    Unwrite(SubjectId),

    /// Re-add a link that was removed during the scope.
    Relink(SubjectId, ListenerId),

    /// Remove a link that was created during the scope.
    Unlink(SubjectId, ListenerId),
}

/// A captured position in the undo log, commit queue, and manager set.
/// Rolling back to a savepoint truncates all three; manager exits are
/// only ever triggered by scope termination.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Savepoint {
    pub(crate) undo: usize,
    pub(crate) commits: usize,
    pub(crate) managers: usize,
}

pub(crate) struct History {
    pub(crate) active: bool,
    pub(crate) in_cleanup: bool,
    undo: Vec<UndoOp>,
    commits: Vec<Box<dyn FnOnce()>>,
    /// Index of the next commit callback to run; only advances during
    /// the commit drain, so callbacks registered by other callbacks are
    /// still picked up in FIFO order.
    next_commit: usize,
    managers: Vec<Rc<dyn Manager>>,
}

impl History {
    pub(crate) fn new() -> Self {
        History {
            active: false,
            in_cleanup: false,
            undo: Vec::new(),
            commits: Vec::new(),
            next_commit: 0,
            managers: Vec::new(),
        }
    }

    pub(crate) fn push_undo(&mut self, op: UndoOp) {
        self.undo.push(op);
    }

    pub(crate) fn pop_undo_above(&mut self, mark: usize) -> Option<UndoOp> {
        if self.undo.len() > mark {
            self.undo.pop()
        } else {
            None
        }
    }

    pub(crate) fn push_commit(&mut self, callback: Box<dyn FnOnce()>) {
        self.commits.push(callback);
    }

    pub(crate) fn take_next_commit(&mut self) -> Option<Box<dyn FnOnce()>> {
        if self.next_commit < self.commits.len() {
            // Leave a no-op in place so savepoint arithmetic stays simple.
            let callback = std::mem::replace(&mut self.commits[self.next_commit], Box::new(|| ()));
            self.next_commit += 1;
            Some(callback)
        } else {
            None
        }
    }

    /// Registers a manager, deduplicated by identity. Returns the manager
    /// if it was new, so the caller can run its enter hook outside the
    /// controller borrow.
    pub(crate) fn add_manager(&mut self, manager: Rc<dyn Manager>) -> Option<Rc<dyn Manager>> {
        let exists = self
            .managers
            .iter()
            .any(|known| Rc::ptr_eq(known, &manager));
        if exists {
            None
        } else {
            self.managers.push(Rc::clone(&manager));
            Some(manager)
        }
    }

    pub(crate) fn savepoint(&self) -> Savepoint {
        Savepoint {
            undo: self.undo.len(),
            commits: self.commits.len(),
            managers: self.managers.len(),
        }
    }

    /// Truncates the commit queue and manager set to a savepoint. The undo
    /// log is unwound separately by the controller, which interprets the
    /// engine entries.
    pub(crate) fn truncate_to(&mut self, savepoint: Savepoint) {
        self.commits.truncate(savepoint.commits.max(self.next_commit));
        self.managers.truncate(savepoint.managers);
    }

    /// Takes the manager set for scope-termination exits (reverse entry
    /// order is the caller's responsibility).
    pub(crate) fn take_managers(&mut self) -> Vec<Rc<dyn Manager>> {
        std::mem::take(&mut self.managers)
    }

    /// Resets every per-scope structure. Called once the scope has fully
    /// terminated, after manager exits.
    pub(crate) fn reset(&mut self) {
        self.active = false;
        self.in_cleanup = false;
        self.undo.clear();
        self.commits.clear();
        self.next_commit = 0;
        self.managers.clear();
    }
}

/// Runs every manager exit in reverse entry order, threading the panic
/// payload through: a manager that panics replaces the payload seen by
/// the managers remaining after it, and the final payload is returned to
/// be resumed by the caller.
pub(crate) fn exit_managers(
    managers: Vec<Rc<dyn Manager>>,
    mut payload: Option<Box<dyn Any + Send>>,
) -> Option<Box<dyn Any + Send>> {
    for manager in managers.into_iter().rev() {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            manager.exit(payload.as_deref());
        }));
        if let Err(new_payload) = result {
            tracing::debug!("manager exit panicked; replacing the outgoing payload");
            payload = Some(new_payload);
        }
    }
    payload
}
