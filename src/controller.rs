//! The controller: transactional scope management plus the dependency
//! tracker and layered scheduler.
//!
//! External code enters through [`atomically`]. While the user closure
//! runs, cells record reads with [`used`] and writes with [`changed`];
//! reads link the current listener to the subject and lift the listener's
//! layer strictly above its producers, writes mark the subject and enqueue
//! its dirty readers. When the closure returns, the recalc loop drains the
//! layered queue lowest-layer-first until quiescence, then observers run
//! in the read-only phase, then commit callbacks run and managers exit.
//! Any unwind from user code rolls the whole scope back first.
//!
//! # Order inversions
//!
//! The schedule is only a heuristic: layers are discovered as reads
//! happen, so a listener W may write a subject that some listener R
//! already read earlier in the same pass. R's run (and everything after
//! it) is then based on a stale read. The controller records a savepoint
//! immediately before every listener run precisely for this case: it
//! promotes R strictly above W, rolls the scope back to R's savepoint,
//! reschedules everything it rewound, and aborts W's in-progress run with
//! an internal signal so the loop can resume in the corrected order. If
//! recoveries start chasing each other in circles, that is a true cyclic
//! conflict and surfaces as [`Error::Circularity`] (see [`crate::cycle`]).

use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::attach;
use crate::cycle::{Promotions, MAX_LAYER};
use crate::error::Error;
use crate::graph::{Listener, ListenerId, Manager, SubjectHandle, SubjectId};
use crate::hash::{FxHashMap, FxHashSet, FxIndexMap, FxIndexSet};
use crate::history::{exit_managers, History, Savepoint, UndoOp};
use crate::layer::Layer;
use crate::schedule::Schedule;

/// Internal unwind payload: the current listener run was rewound by
/// inversion recovery and must stop without further effect. Never escapes
/// the recalc loop.
struct Rewind;

struct SubjectState {
    layer: Layer,
    label: String,
    manager: Option<Rc<dyn Manager>>,
    /// The listener half of a rule cell; its reads and writes of this
    /// subject are not self-dependencies.
    owner: Option<ListenerId>,
    listeners: SmallVec<[ListenerId; 4]>,
}

struct ListenerState {
    layer: Layer,
    label: String,
    runner: Weak<dyn Listener>,
    subjects: FxIndexSet<SubjectId>,
}

struct PassEntry {
    listener: ListenerId,
    /// Captured immediately before the listener ran; rewinding to it
    /// undoes the run and everything after it.
    savepoint: Savepoint,
}

/// What a `changed` call decided while the controller was borrowed; the
/// dirty notifications run afterwards, outside the borrow.
enum ChangedPlan {
    /// Inversion recovery rewound the current run; unwind with [`Rewind`].
    RewindCurrent,
    Notify {
        writer_layer: Option<Layer>,
        readers: Vec<(ListenerId, Weak<dyn Listener>)>,
    },
}

pub(crate) struct Controller {
    history: History,
    subjects: FxHashMap<SubjectId, SubjectState>,
    listeners: FxHashMap<ListenerId, ListenerState>,
    subject_counter: u32,
    listener_counter: u32,
    queue: Schedule,
    current: Option<ListenerId>,
    readonly: bool,
    in_make: bool,
    this_pass: Vec<PassEntry>,
    in_this_pass: FxHashSet<ListenerId>,
    /// Subjects written this pass, each with its stack of writers (`None`
    /// for an external write). Consulted for layer floors and unwound
    /// entry by entry on rollback.
    written: FxIndexMap<SubjectId, SmallVec<[Option<ListenerId>; 2]>>,
    promotions: Promotions,
}

impl Controller {
    pub(crate) fn new() -> Self {
        Controller {
            history: History::new(),
            subjects: FxHashMap::default(),
            listeners: FxHashMap::default(),
            subject_counter: 0,
            listener_counter: 0,
            queue: Schedule::new(),
            current: None,
            readonly: false,
            in_make: false,
            this_pass: Vec::new(),
            in_this_pass: FxHashSet::default(),
            written: FxIndexMap::default(),
            promotions: Promotions::default(),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.history.active
    }

    fn assert_active(&self, op: &str) {
        if !self.history.active {
            panic!("{op}: no atomic scope is active (wrap the call in `atomically`)");
        }
    }

    // ---------------------------------------------------------------
    // Registration tables

    pub(crate) fn register_subject(
        &mut self,
        layer: Layer,
        label: String,
        manager: Option<Rc<dyn Manager>>,
    ) -> SubjectId {
        let id = SubjectId::from_counter(&mut self.subject_counter);
        let label = if label.is_empty() { format!("{id:?}") } else { label };
        self.subjects.insert(
            id,
            SubjectState {
                layer,
                label,
                manager,
                owner: None,
                listeners: SmallVec::new(),
            },
        );
        id
    }

    pub(crate) fn register_listener(
        &mut self,
        runner: Weak<dyn Listener>,
        label: String,
    ) -> ListenerId {
        let id = ListenerId::from_counter(&mut self.listener_counter);
        let label = if label.is_empty() { format!("{id:?}") } else { label };
        self.listeners.insert(
            id,
            ListenerState {
                layer: Layer::ZERO,
                label,
                runner,
                subjects: FxIndexSet::default(),
            },
        );
        id
    }

    pub(crate) fn pin_observer(&mut self, listener: ListenerId) {
        if let Some(state) = self.listeners.get_mut(&listener) {
            state.layer = Layer::OBSERVER;
        }
    }

    pub(crate) fn set_owner(&mut self, subject: SubjectId, listener: ListenerId) {
        if let Some(state) = self.subjects.get_mut(&subject) {
            state.owner = Some(listener);
        }
    }

    pub(crate) fn listener_layer(&self, listener: ListenerId) -> Layer {
        self.listeners
            .get(&listener)
            .map(|state| state.layer)
            .unwrap_or(Layer::ZERO)
    }

    pub(crate) fn listener_reads_nothing(&self, listener: ListenerId) -> bool {
        self.listeners
            .get(&listener)
            .map(|state| state.subjects.is_empty())
            .unwrap_or(true)
    }

    pub(crate) fn subject_has_listeners(&self, subject: SubjectId) -> bool {
        let Some(state) = self.subjects.get(&subject) else {
            return false;
        };
        state.listeners.iter().any(|listener| {
            self.listeners
                .get(listener)
                .is_some_and(|state| state.runner.strong_count() > 0)
        })
    }

    pub(crate) fn release_subject(&mut self, subject: SubjectId) {
        if let Some(state) = self.subjects.remove(&subject) {
            for listener in state.listeners {
                if let Some(reader) = self.listeners.get_mut(&listener) {
                    reader.subjects.swap_remove(&subject);
                }
            }
        }
    }

    pub(crate) fn release_listener(&mut self, listener: ListenerId) {
        if let Some(state) = self.listeners.remove(&listener) {
            for subject in state.subjects {
                if let Some(read) = self.subjects.get_mut(&subject) {
                    read.listeners.retain(|linked| *linked != listener);
                }
            }
        }
        self.queue.cancel(listener);
        self.in_this_pass.remove(&listener);
    }

    // ---------------------------------------------------------------
    // Links

    /// Splices a link, if absent, and (within a scope) logs its removal
    /// for rollback.
    pub(crate) fn add_link(&mut self, subject: SubjectId, listener: ListenerId) {
        let Some(reader) = self.listeners.get_mut(&listener) else {
            return;
        };
        if reader.subjects.insert(subject) {
            if let Some(read) = self.subjects.get_mut(&subject) {
                read.listeners.push(listener);
            }
            if self.history.active {
                self.history.push_undo(UndoOp::Unlink(subject, listener));
            }
        }
    }

    /// Removes a link, if present, and (within a scope) logs its restore
    /// for rollback.
    pub(crate) fn remove_link(&mut self, subject: SubjectId, listener: ListenerId) {
        let Some(reader) = self.listeners.get_mut(&listener) else {
            return;
        };
        if reader.subjects.swap_remove(&subject) {
            if let Some(read) = self.subjects.get_mut(&subject) {
                read.listeners.retain(|linked| *linked != listener);
            }
            if self.history.active {
                self.history.push_undo(UndoOp::Relink(subject, listener));
            }
        }
    }

    pub(crate) fn listeners_snapshot(&self, subject: SubjectId) -> Vec<ListenerId> {
        self.subjects
            .get(&subject)
            .map(|state| {
                state
                    .listeners
                    .iter()
                    .copied()
                    .filter(|listener| {
                        self.listeners
                            .get(listener)
                            .is_some_and(|state| state.runner.strong_count() > 0)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn subjects_snapshot(&self, listener: ListenerId) -> Vec<SubjectId> {
        self.listeners
            .get(&listener)
            .map(|state| state.subjects.iter().copied().collect())
            .unwrap_or_default()
    }

    fn link_raw(&mut self, subject: SubjectId, listener: ListenerId) {
        if let Some(reader) = self.listeners.get_mut(&listener) {
            if reader.subjects.insert(subject) {
                if let Some(read) = self.subjects.get_mut(&subject) {
                    read.listeners.push(listener);
                }
            }
        }
    }

    fn unlink_raw(&mut self, subject: SubjectId, listener: ListenerId) {
        if let Some(reader) = self.listeners.get_mut(&listener) {
            reader.subjects.swap_remove(&subject);
        }
        if let Some(read) = self.subjects.get_mut(&subject) {
            read.listeners.retain(|linked| *linked != listener);
        }
    }

    /// Clears every subject link of `listener` ahead of a run, logging
    /// the restores so a rewound run gets its old dependency set back.
    fn clear_links_of(&mut self, listener: ListenerId) {
        let Some(state) = self.listeners.get_mut(&listener) else {
            return;
        };
        let subjects: Vec<SubjectId> = std::mem::take(&mut state.subjects).into_iter().collect();
        for subject in subjects {
            if let Some(read) = self.subjects.get_mut(&subject) {
                read.listeners.retain(|linked| *linked != listener);
            }
            if self.history.active {
                self.history.push_undo(UndoOp::Relink(subject, listener));
            }
        }
    }

    // ---------------------------------------------------------------
    // History surface

    fn lock_step(&mut self, subject: SubjectId) -> Option<Rc<dyn Manager>> {
        let manager = self.subjects.get(&subject)?.manager.clone()?;
        self.history.add_manager(manager)
    }

    /// Replays the undo log down to `mark`, interpreting engine entries
    /// in place and invoking user restores directly. User undo callbacks
    /// must not re-enter the engine and must not panic.
    fn unwind_undo_to(&mut self, mark: usize) {
        while let Some(op) = self.history.pop_undo_above(mark) {
            match op {
                UndoOp::Call(restore) => restore(),
                UndoOp::Unwrite(subject) => {
                    if let Some(writers) = self.written.get_mut(&subject) {
                        writers.pop();
                        if writers.is_empty() {
                            self.written.swap_remove(&subject);
                        }
                    }
                }
                UndoOp::Relink(subject, listener) => self.link_raw(subject, listener),
                UndoOp::Unlink(subject, listener) => self.unlink_raw(subject, listener),
            }
        }
    }

    fn rollback_to_savepoint(&mut self, savepoint: Savepoint) {
        self.unwind_undo_to(savepoint.undo);
        self.history.truncate_to(savepoint);
    }

    // ---------------------------------------------------------------
    // Layers and promotion

    /// Raises `listener` strictly above `floor` and propagates: readers
    /// of every subject this listener wrote this pass must stay strictly
    /// above it in turn.
    fn promote(&mut self, listener: ListenerId, floor: Layer) {
        let mut trail: SmallVec<[ListenerId; 8]> = SmallVec::new();
        self.promote_along(listener, floor, &mut trail);
    }

    /// A propagation that reaches a listener already on the trail is a
    /// promotion loop: every participant reads something another one
    /// wrote, so no finite layering exists.
    fn promote_along(
        &mut self,
        listener: ListenerId,
        floor: Layer,
        trail: &mut SmallVec<[ListenerId; 8]>,
    ) {
        if let Some(position) = trail.iter().position(|on_trail| *on_trail == listener) {
            let participants: Vec<ListenerId> = trail[position..].to_vec();
            self.throw_circularity(&participants);
        }
        let Some(state) = self.listeners.get_mut(&listener) else {
            return;
        };
        if state.layer.is_observer() || state.layer > floor {
            return;
        }
        let raised = floor.next();
        if raised.as_u32() > MAX_LAYER {
            let label = state.label.clone();
            Error::Circularity {
                participants: vec![label],
            }
            .throw();
        }
        trace!("promote {:?} {:?} -> {:?}", listener, state.layer, raised);
        state.layer = raised;
        if self.queue.contains(listener) {
            self.queue.insert(listener, raised);
        }

        trail.push(listener);
        let downstream: SmallVec<[SubjectId; 4]> = self
            .written
            .iter()
            .filter(|(_, writers)| writers.iter().any(|writer| *writer == Some(listener)))
            .map(|(subject, _)| *subject)
            .collect();
        for subject in downstream {
            let Some(read) = self.subjects.get(&subject) else {
                continue;
            };
            let owner = read.owner;
            let readers: SmallVec<[ListenerId; 4]> = read.listeners.clone();
            for reader in readers {
                if Some(reader) == owner || reader == listener {
                    continue;
                }
                if self.listener_layer(reader) <= raised {
                    self.promote_along(reader, raised, trail);
                }
            }
        }
        trail.pop();
    }

    // ---------------------------------------------------------------
    // Dependency recording

    fn used_step(&mut self, subject: SubjectId) {
        let Some(current) = self.current else {
            return;
        };
        let Some(read) = self.subjects.get(&subject) else {
            return;
        };
        if read.owner == Some(current) {
            return;
        }
        let subject_layer = read.layer;
        self.add_link(subject, current);
        if self.readonly {
            // Observers link (so future writes wake them) but reads in
            // the read-only phase never move layers.
            return;
        }
        if self.listener_layer(current) <= subject_layer {
            self.promote(current, subject_layer);
        }
        let writers: SmallVec<[Option<ListenerId>; 2]> = self
            .written
            .get(&subject)
            .map(|writers| writers.clone())
            .unwrap_or_default();
        for writer in writers.into_iter().flatten() {
            let writer_layer = self.listener_layer(writer);
            if self.listener_layer(current) <= writer_layer {
                self.promote(current, writer_layer);
            }
        }
    }

    fn changed_step(&mut self, subject: SubjectId) -> ChangedPlan {
        if self.readonly || self.history.in_cleanup {
            let label = self
                .subjects
                .get(&subject)
                .map(|state| state.label.clone())
                .unwrap_or_else(|| format!("{subject:?}"));
            Error::ReadOnly { label }.throw();
        }
        let Some(state) = self.subjects.get(&subject) else {
            return ChangedPlan::Notify {
                writer_layer: None,
                readers: Vec::new(),
            };
        };
        let owner = state.owner;
        let readers: SmallVec<[ListenerId; 4]> = state.listeners.clone();
        let current = self.current;

        // Readers that already ran this pass saw the old value: order
        // inversion.
        let inverted: Vec<ListenerId> = readers
            .iter()
            .copied()
            .filter(|reader| Some(*reader) != owner && self.in_this_pass.contains(reader))
            .collect();
        if !inverted.is_empty() {
            self.recover_inversion(subject, current, &inverted);
            if current.is_some() {
                return ChangedPlan::RewindCurrent;
            }
        }

        // Mark the write (after any recovery, so the mark survives it).
        self.written.entry(subject).or_default().push(current);
        self.history.push_undo(UndoOp::Unwrite(subject));

        let writer_layer = current.map(|writer| self.listener_layer(writer));
        let notify = readers
            .iter()
            .filter(|reader| Some(**reader) != owner && Some(**reader) != current)
            .filter(|reader| !self.in_this_pass.contains(*reader))
            .filter_map(|reader| {
                self.listeners
                    .get(reader)
                    .map(|state| (*reader, state.runner.clone()))
            })
            .collect();
        ChangedPlan::Notify {
            writer_layer,
            readers: notify,
        }
    }

    /// Inversion recovery: promote every already-ran reader strictly above
    /// the writer, rewind the scope to just before the earliest of them
    /// ran, and put the rewound listeners back on the schedule.
    fn recover_inversion(
        &mut self,
        subject: SubjectId,
        writer: Option<ListenerId>,
        inverted: &[ListenerId],
    ) {
        if let Some(writer) = writer {
            if inverted.contains(&writer) {
                // The writer read this subject earlier in its own run:
                // no order can reconcile that.
                self.throw_circularity(&[writer]);
            }
            let writer_layer = self.listener_layer(writer);
            for &reader in inverted {
                if let Some(cycle) = self.promotions.record(writer, reader) {
                    self.throw_circularity(&cycle);
                }
                self.promote(reader, writer_layer);
            }
        }

        let earliest = self
            .this_pass
            .iter()
            .position(|entry| inverted.contains(&entry.listener))
            .expect("inverted listeners ran this pass");
        debug!(
            "order inversion on {:?}: rewinding {} listener(s)",
            subject,
            self.this_pass.len() - earliest
        );
        let savepoint = self.this_pass[earliest].savepoint;
        self.rollback_to_savepoint(savepoint);
        let rewound: Vec<PassEntry> = self.this_pass.split_off(earliest);
        for entry in &rewound {
            self.in_this_pass.remove(&entry.listener);
        }
        for entry in rewound {
            let layer = self.listener_layer(entry.listener);
            self.queue.insert(entry.listener, layer);
        }
    }

    fn throw_circularity(&self, participants: &[ListenerId]) -> ! {
        let labels = participants
            .iter()
            .map(|listener| {
                self.listeners
                    .get(listener)
                    .map(|state| state.label.clone())
                    .unwrap_or_else(|| format!("{listener:?}"))
            })
            .collect();
        Error::Circularity {
            participants: labels,
        }
        .throw()
    }

    // ---------------------------------------------------------------
    // Scheduling

    fn schedule_step(&mut self, listener: ListenerId, source: Option<Layer>) {
        if !self.listeners.contains_key(&listener) {
            return;
        }
        if let Some(source) = source {
            if self.listener_layer(listener) <= source {
                self.promote(listener, source);
            }
        }
        let layer = self.listener_layer(listener);
        trace!("schedule {:?} at {:?}", listener, layer);
        self.queue.insert(listener, layer);
    }

    fn remove_dead_listener(&mut self, listener: ListenerId) {
        debug!("listener {:?} dropped; scrubbing its links", listener);
        self.release_listener(listener);
    }

    /// Prepares a listener run: records the micro-savepoint, joins the
    /// pass, clears old links, makes the listener current. Returns the
    /// strong runner and the previous current listener, or `None` when
    /// the runner is gone.
    fn begin_run(
        &mut self,
        listener: ListenerId,
        observer_phase: bool,
    ) -> Option<(Rc<dyn Listener>, Option<ListenerId>)> {
        let runner = match self.listeners.get(&listener) {
            Some(state) => state.runner.upgrade(),
            None => None,
        };
        let Some(runner) = runner else {
            self.remove_dead_listener(listener);
            return None;
        };
        if !observer_phase {
            let savepoint = self.history.savepoint();
            self.this_pass.push(PassEntry {
                listener,
                savepoint,
            });
            self.in_this_pass.insert(listener);
        }
        self.clear_links_of(listener);
        let previous = self.current.replace(listener);
        Some((runner, previous))
    }

    fn finish_run(&mut self, previous: Option<ListenerId>) {
        self.current = previous;
    }

    fn begin_readonly(&mut self) {
        self.this_pass.clear();
        self.in_this_pass.clear();
        self.promotions.clear();
        self.readonly = true;
    }

    fn end_readonly(&mut self) {
        self.readonly = false;
    }

    fn begin_scope(&mut self) {
        debug!("atomic scope opened");
        self.history.active = true;
    }

    fn end_scope(&mut self) {
        debug!("atomic scope closed");
        self.history.reset();
        self.queue.clear();
        self.written.clear();
        self.this_pass.clear();
        self.in_this_pass.clear();
        self.promotions.clear();
        self.current = None;
        self.readonly = false;
        self.in_make = false;
    }
}

// -------------------------------------------------------------------
// The public engine surface. Every function reaches the thread's
// controller through `attach`; borrows never span user code.

/// Runs `f` in an atomic scope: dependency tracking, undo logging, the
/// recalc loop, the read-only observer phase, commit callbacks, and
/// manager exits all happen before this returns. Nested calls flatten
/// into the enclosing scope. Unwinds (including engine [`Error`]s) roll
/// the scope back and then resume; use [`try_atomically`] to receive
/// engine errors as values.
pub fn atomically<R>(f: impl FnOnce() -> R) -> R {
    if attach::with(|ctl| ctl.is_active()) {
        return f();
    }
    attach::with(|ctl| ctl.begin_scope());
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => match settle_and_commit() {
            None => value,
            Some(payload) => panic::resume_unwind(payload),
        },
        Err(payload) => panic::resume_unwind(abort(payload)),
    }
}

/// [`atomically`], with engine errors caught: `Err` carries the
/// [`Error`] after the scope has been rolled back. Foreign panics still
/// resume unwinding.
pub fn try_atomically<R>(f: impl FnOnce() -> R) -> Result<R, Error> {
    Error::catch_unchecked(|| atomically(f))
}

/// True while an atomic scope is open on this thread.
pub fn is_active() -> bool {
    attach::with(|ctl| ctl.is_active())
}

/// True during the commit/abort phase, so callbacks can tell cleanup
/// apart from the body of the scope.
pub fn in_cleanup() -> bool {
    attach::with(|ctl| ctl.history.in_cleanup)
}

/// True during the read-only observer phase.
pub fn is_readonly() -> bool {
    attach::with(|ctl| ctl.readonly)
}

/// The listener currently being run by the scheduler, if any.
pub fn current_listener() -> Option<ListenerId> {
    attach::with(|ctl| ctl.current)
}

/// Registers a scoped manager: `enter` runs now (once per scope,
/// identity-deduplicated), `exit` at scope termination.
pub fn manage(manager: Rc<dyn Manager>) {
    let to_enter = attach::with(|ctl| {
        ctl.assert_active("manage");
        ctl.history.add_manager(manager)
    });
    if let Some(manager) = to_enter {
        debug!("manager registered; running enter hook");
        manager.enter();
    }
}

/// Appends a callback to the undo log. It runs only if the scope (or a
/// savepoint region containing it) is rolled back, in LIFO order. Undo
/// callbacks must restore state and nothing else: no engine re-entry, no
/// panics.
pub fn on_undo(f: impl FnOnce() + 'static) {
    attach::with(|ctl| {
        ctl.assert_active("on_undo");
        ctl.history.push_undo(UndoOp::Call(Box::new(f)));
    });
}

/// Appends a callback to the commit queue. It runs after the read-only
/// phase and before manager exits, in registration order, and is
/// discarded by a savepoint rollback that rewinds past its registration.
pub fn on_commit(f: impl FnOnce() + 'static) {
    attach::with(|ctl| {
        ctl.assert_active("on_commit");
        ctl.history.push_commit(Box::new(f));
    });
}

/// Captures the current undo/commit/manager position.
pub fn savepoint() -> Savepoint {
    attach::with(|ctl| {
        ctl.assert_active("savepoint");
        ctl.history.savepoint()
    })
}

/// Rolls back to a savepoint captured earlier in the same scope: undo
/// entries replay LIFO, the commit queue and manager set truncate.
/// Manager exits are not run — only scope termination exits managers.
pub fn rollback_to(savepoint: Savepoint) {
    attach::with(|ctl| {
        ctl.assert_active("rollback_to");
        ctl.rollback_to_savepoint(savepoint);
    });
}

/// The logged write: stores `value` into `slot` and pushes an undo entry
/// restoring the previous value.
pub fn change<T: 'static>(slot: &Rc<RefCell<T>>, value: T) {
    attach::with(|ctl| ctl.assert_active("change"));
    let previous = slot.replace(value);
    let restore = Rc::clone(slot);
    attach::with(|ctl| {
        ctl.history
            .push_undo(UndoOp::Call(Box::new(move || {
                restore.replace(previous);
            })));
    });
}

/// Registers the subject's manager for this scope, if it has one.
pub fn lock(subject: &SubjectHandle) {
    let to_enter = attach::with(|ctl| {
        ctl.assert_active("lock");
        ctl.lock_step(subject.id())
    });
    if let Some(manager) = to_enter {
        manager.enter();
    }
}

/// Records that the current listener read `subject`: locks it, links it,
/// and lifts the listener's layer strictly above the subject and above
/// every listener that wrote the subject this pass.
pub fn used(subject: &SubjectHandle) {
    let id = subject.id();
    let to_enter = attach::with(|ctl| {
        ctl.assert_active("used");
        if ctl.in_make {
            panic!("`make` initializers must not read cells");
        }
        ctl.lock_step(id)
    });
    if let Some(manager) = to_enter {
        manager.enter();
    }
    attach::with(|ctl| ctl.used_step(id));
}

/// Records that `subject` was written: locks it, marks it changed (with
/// an undo entry), and schedules its dirty readers. A reader that already
/// ran this pass triggers order-inversion recovery; a write during the
/// read-only phase aborts the scope with [`Error::ReadOnly`].
pub fn changed(subject: &SubjectHandle) {
    let id = subject.id();
    let to_enter = attach::with(|ctl| {
        ctl.assert_active("changed");
        ctl.lock_step(id)
    });
    if let Some(manager) = to_enter {
        manager.enter();
    }
    let plan = attach::with(|ctl| ctl.changed_step(id));
    match plan {
        ChangedPlan::RewindCurrent => panic::panic_any(Rewind),
        ChangedPlan::Notify {
            writer_layer,
            readers,
        } => {
            let mut to_schedule: Vec<ListenerId> = Vec::new();
            for (listener, runner) in readers {
                match runner.upgrade() {
                    Some(runner) => {
                        if runner.dirty() {
                            to_schedule.push(listener);
                        }
                    }
                    None => attach::with(|ctl| ctl.remove_dead_listener(listener)),
                }
            }
            attach::with(|ctl| {
                for listener in to_schedule {
                    ctl.schedule_step(listener, writer_layer);
                }
            });
        }
    }
}

/// Enqueues a listener; with `source`, its layer is first lifted strictly
/// above it (propagating to dependents as needed).
pub fn schedule_listener(listener: &crate::graph::ListenerHandle, source: Option<Layer>) {
    attach::with(|ctl| {
        ctl.assert_active("schedule");
        ctl.schedule_step(listener.id(), source);
    });
}

/// Removes a listener from the schedule, if queued.
pub fn cancel_listener(listener: &crate::graph::ListenerHandle) {
    attach::with(|ctl| {
        ctl.assert_active("cancel");
        ctl.queue.cancel(listener.id());
    });
}

/// Runs a listener immediately, as if it had run earlier in the current
/// pass: it joins `this_pass`, so later writes to subjects it read are
/// detected as inversions. Used by lazy cells on first read; nests inside
/// another listener's run.
pub fn initialize(listener: &crate::graph::ListenerHandle) {
    attach::with(|ctl| ctl.assert_active("initialize"));
    let id = listener.id();
    loop {
        match run_listener(id, false) {
            RunOutcome::Completed => break,
            RunOutcome::Rewound => {
                // If the enclosing run was rewound too, this one cannot
                // make progress here; propagate so the loop reschedules
                // both in the corrected order.
                let enclosing_rewound = attach::with(|ctl| match ctl.current {
                    Some(outer) => !ctl.in_this_pass.contains(&outer),
                    None => false,
                });
                if enclosing_rewound {
                    panic::panic_any(Rewind);
                }
            }
        }
    }
}

/// Internal hook for `make`-style seed closures: runs `f` with reads
/// forbidden.
pub(crate) fn run_sealed<R>(f: impl FnOnce() -> R) -> R {
    attach::with(|ctl| ctl.in_make = true);
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    attach::with(|ctl| ctl.in_make = false);
    match result {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}

// -------------------------------------------------------------------
// The recalc loop

enum RunOutcome {
    Completed,
    Rewound,
}

fn run_listener(listener: ListenerId, observer_phase: bool) -> RunOutcome {
    let Some((runner, previous)) = attach::with(|ctl| ctl.begin_run(listener, observer_phase))
    else {
        return RunOutcome::Completed;
    };
    trace!("run {:?}", listener);
    let result = panic::catch_unwind(AssertUnwindSafe(|| runner.run()));
    attach::with(|ctl| ctl.finish_run(previous));
    match result {
        Ok(()) => RunOutcome::Completed,
        Err(payload) if payload.is::<Rewind>() => RunOutcome::Rewound,
        Err(payload) => panic::resume_unwind(payload),
    }
}

fn run_to_quiescence() {
    while let Some(listener) = attach::with(|ctl| ctl.queue.pop_lowest()) {
        let _ = run_listener(listener, false);
    }
    attach::with(|ctl| ctl.begin_readonly());
    while let Some(listener) = attach::with(|ctl| ctl.queue.pop_observer()) {
        let _ = run_listener(listener, true);
    }
    attach::with(|ctl| ctl.end_readonly());
}

fn drain_commits() {
    while let Some(callback) = attach::with(|ctl| ctl.history.take_next_commit()) {
        callback();
    }
}

/// Settles and commits an open scope. Returns the escaping payload, if
/// any, after rollback and manager exits.
fn settle_and_commit() -> Option<Box<dyn Any + Send>> {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(run_to_quiescence)) {
        return Some(abort(payload));
    }
    attach::with(|ctl| ctl.history.in_cleanup = true);
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(drain_commits)) {
        return Some(abort(payload));
    }
    let managers = attach::with(|ctl| ctl.history.take_managers());
    let payload = exit_managers(managers, None);
    attach::with(|ctl| ctl.end_scope());
    payload
}

/// Rolls the whole scope back and exits managers with the payload; the
/// (possibly replaced) payload is returned for the caller to resume.
fn abort(payload: Box<dyn Any + Send>) -> Box<dyn Any + Send> {
    debug!("transaction aborted; rolling back");
    let managers = attach::with(|ctl| {
        ctl.history.in_cleanup = true;
        ctl.readonly = false;
        ctl.current = None;
        ctl.unwind_undo_to(0);
        ctl.history.take_managers()
    });
    let payload =
        exit_managers(managers, Some(payload)).expect("abort payload survives manager exits");
    attach::with(|ctl| ctl.end_scope());
    payload
}
