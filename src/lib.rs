//! Espalier is a reactive cell runtime: programs declare cells (values
//! and rules) whose interdependencies are discovered at run time, and
//! every externally-visible state is the result of a fully-settled
//! recalculation — never a half-finished one.
//!
//! The engine is a single-threaded software transactional memory (undo
//! log, savepoints, commit callbacks, scoped resource managers) combined
//! with a dependency-tracking scheduler that orders recalculation by
//! dynamically-computed layers, recovers from order inversions by partial
//! rollback, and diagnoses genuinely cyclic conflicts. Cells and the
//! reactive collections are thin clients of those two contracts.
//!
//! ```
//! use espalier::{atomically, cell::{Maintain, Value}};
//!
//! let base = Value::new(2_i64);
//! let doubled = Maintain::new(0, {
//!     let base = base.clone();
//!     move || base.get() * 2
//! });
//!
//! atomically(|| base.set(21));
//! assert_eq!(doubled.get(), 42);
//! ```

mod attach;
mod controller;
mod cycle;
mod error;
mod graph;
mod hash;
mod history;
mod layer;
mod schedule;

pub mod cell;
pub mod collections;

pub use crate::attach::replace_controller;
pub use crate::cell::{Compute, Constant, Discrete, Maintain, Observer, Value};
pub use crate::collections::{Hub, ObservingMap, SetCell, SortedIndex, Subset};
pub use crate::controller::{
    atomically, cancel_listener, change, changed, current_listener, in_cleanup, initialize,
    is_active, is_readonly, lock, manage, on_commit, on_undo, rollback_to, savepoint,
    schedule_listener, try_atomically, used,
};
pub use crate::cycle::MAX_LAYER;
pub use crate::error::Error;
pub use crate::graph::{
    link, listeners_of, subjects_of, unlink, Listener, ListenerHandle, ListenerId, Manager,
    SubjectHandle, SubjectId,
};
pub use crate::history::Savepoint;
pub use crate::layer::Layer;
