//! The bipartite dependency graph: subjects (observable state), listeners
//! (scheduled computations), and the links between them.
//!
//! Subjects and listeners register with the thread's controller and are
//! identified by small ids; the edge sets live in controller-side tables.
//! Each (subject, listener) pair is linked at most once, unlinking is
//! constant-time, and iteration works on an id snapshot so links may be
//! removed mid-walk. Registrations are released by the RAII handles below:
//! dropping a listener's handle scrubs every link in which it participates,
//! so a subject's listener chain never yields a dead listener.

use std::any::Any;
use std::num::NonZeroU32;
use std::rc::{Rc, Weak};

use crate::attach;
use crate::layer::Layer;

/// Identifies a registered subject. Ids are never reused within a thread.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubjectId(NonZeroU32);

/// Identifies a registered listener. Ids are never reused within a thread.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(NonZeroU32);

impl SubjectId {
    pub(crate) fn from_counter(counter: &mut u32) -> Self {
        *counter += 1;
        SubjectId(NonZeroU32::new(*counter).expect("subject id counter overflowed"))
    }
}

impl ListenerId {
    pub(crate) fn from_counter(counter: &mut u32) -> Self {
        *counter += 1;
        ListenerId(NonZeroU32::new(*counter).expect("listener id counter overflowed"))
    }
}

impl std::fmt::Debug for SubjectId {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "s{}", self.0)
    }
}

impl std::fmt::Debug for ListenerId {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "l{}", self.0)
    }
}

/// A computation the controller can schedule.
///
/// Implemented by cell cores. The controller holds only a [`Weak`]
/// back-reference, so the graph never keeps a listener alive.
pub trait Listener {
    /// Re-runs the computation. Subject links were cleared immediately
    /// before the call; reads during the run re-establish them.
    fn run(&self);

    /// Notes that a read subject changed and reports whether the listener
    /// wants to be scheduled. The default is eager: always reschedule.
    fn dirty(&self) -> bool {
        true
    }
}

/// A scoped resource tied to a subject or registered directly.
///
/// `enter` runs exactly once per atomic scope, at first registration;
/// `exit` runs at scope termination (never at savepoint rollback), in
/// reverse registration order. On abort, `exit` receives the escaping
/// panic payload; its return cannot suppress the unwind.
pub trait Manager {
    fn enter(&self) {}

    fn exit(&self, error: Option<&(dyn Any + Send)>);
}

/// Owns a subject registration; the registration is released on drop.
pub struct SubjectHandle {
    id: SubjectId,
}

impl SubjectHandle {
    /// Registers a subject at `layer` with the thread's controller.
    pub fn register(layer: Layer, label: impl Into<String>) -> Self {
        Self::register_managed(layer, label, None)
    }

    /// Registers a subject carrying a scoped manager; the manager is
    /// entered the first time the subject is touched within a scope.
    pub fn register_managed(
        layer: Layer,
        label: impl Into<String>,
        manager: Option<Rc<dyn Manager>>,
    ) -> Self {
        let id = attach::with(|ctl| ctl.register_subject(layer, label.into(), manager));
        SubjectHandle { id }
    }

    pub fn id(&self) -> SubjectId {
        self.id
    }

    /// True if any live listener is currently linked to this subject.
    pub fn has_listeners(&self) -> bool {
        attach::with(|ctl| ctl.subject_has_listeners(self.id))
    }
}

impl Drop for SubjectHandle {
    fn drop(&mut self) {
        attach::release_subject(self.id);
    }
}

impl std::fmt::Debug for SubjectHandle {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "{:?}", self.id)
    }
}

/// Owns a listener registration; the registration is released on drop,
/// which also removes the listener from every subject chain and from the
/// schedule. This is the deterministic finalize hook that keeps dropped
/// listeners from being observed through the graph.
pub struct ListenerHandle {
    id: ListenerId,
}

impl ListenerHandle {
    /// Registers a listener with the thread's controller. `runner` is the
    /// weak back-reference the controller schedules through; `label` names
    /// the listener in diagnostics such as circularity reports.
    pub fn register(runner: Weak<dyn Listener>, label: impl Into<String>) -> Self {
        let id = attach::with(|ctl| ctl.register_listener(runner, label.into()));
        ListenerHandle { id }
    }

    /// Registers an observer: a listener pinned to [`Layer::OBSERVER`]
    /// that runs only in the read-only phase.
    pub fn register_observer(runner: Weak<dyn Listener>, label: impl Into<String>) -> Self {
        let id = attach::with(|ctl| {
            let id = ctl.register_listener(runner, label.into());
            ctl.pin_observer(id);
            id
        });
        ListenerHandle { id }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// The listener's current layer.
    pub fn layer(&self) -> Layer {
        attach::with(|ctl| ctl.listener_layer(self.id))
    }

    /// True if the listener's last run recorded no reads at all.
    pub fn reads_nothing(&self) -> bool {
        attach::with(|ctl| ctl.listener_reads_nothing(self.id))
    }

    /// Ties a rule cell's two halves together: reads and writes performed
    /// by `self` on `subject` are not treated as dependencies of `self`,
    /// so a rule may consult its own previous value.
    pub fn own_subject(&self, subject: &SubjectHandle) {
        attach::with(|ctl| ctl.set_owner(subject.id(), self.id));
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        attach::release_listener(self.id);
    }
}

/// Splices a link between `subject` and `listener`; a pair is linked at
/// most once, so re-linking is a no-op. Within an atomic scope the
/// splice is undo-logged. The scheduler relinks automatically as reads
/// happen; this is for collection implementers wiring graphs by hand.
pub fn link(subject: &SubjectHandle, listener: &ListenerHandle) {
    attach::with(|ctl| ctl.add_link(subject.id(), listener.id()));
}

/// Removes the link between `subject` and `listener`, if present, in
/// constant time; both chains stay well-formed. Within an atomic scope
/// the removal is undo-logged.
pub fn unlink(subject: &SubjectHandle, listener: &ListenerHandle) {
    attach::with(|ctl| ctl.remove_link(subject.id(), listener.id()));
}

/// The live listeners currently linked to `subject`, as an id snapshot:
/// the walk tolerates links (including the current one) being removed
/// while the caller iterates, and never includes a dropped listener.
pub fn listeners_of(subject: &SubjectHandle) -> Vec<ListenerId> {
    attach::with(|ctl| ctl.listeners_snapshot(subject.id()))
}

/// The subjects currently linked to `listener`, as an id snapshot.
pub fn subjects_of(listener: &ListenerHandle) -> Vec<SubjectId> {
    attach::with(|ctl| ctl.subjects_snapshot(listener.id()))
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "{:?}", self.id)
    }
}
