//! History semantics: commit/undo ordering, savepoints, managers, and
//! whole-scope rollback.

mod common;

use std::any::Any;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use common::Logger;
use espalier::cell::Value;
use espalier::{
    atomically, change, in_cleanup, is_active, manage, on_commit, on_undo, rollback_to, savepoint,
    Manager,
};
use expect_test::expect;
use test_log::test;

struct TraceManager {
    log: Logger,
    name: &'static str,
}

impl TraceManager {
    fn new(log: &Logger, name: &'static str) -> Rc<Self> {
        Rc::new(TraceManager {
            log: log.clone(),
            name,
        })
    }
}

impl Manager for TraceManager {
    fn enter(&self) {
        self.log.push(format!("enter {}", self.name));
    }

    fn exit(&self, error: Option<&(dyn Any + Send)>) {
        let outcome = if error.is_some() { "err" } else { "ok" };
        self.log.push(format!("exit {} ({outcome})", self.name));
    }
}

#[test]
fn commit_queue_respects_savepoint_rewind() {
    let log = Logger::new();
    let manager = TraceManager::new(&log, "M");

    atomically(|| {
        manage(manager);
        on_commit({
            let log = log.clone();
            move || log.push("commit 1")
        });
        let mark = savepoint();
        on_commit({
            let log = log.clone();
            move || log.push("commit 2")
        });
        rollback_to(mark);
        on_commit({
            let log = log.clone();
            move || log.push("commit 3")
        });
    });

    log.assert_logs(expect![[r#"
        [
            "enter M",
            "commit 1",
            "commit 3",
            "exit M (ok)",
        ]"#]]);
}

#[test]
fn savepoint_rollback_replays_undo_lifo() {
    let log = Logger::new();
    atomically(|| {
        on_undo({
            let log = log.clone();
            move || log.push("undo 1")
        });
        let mark = savepoint();
        on_undo({
            let log = log.clone();
            move || log.push("undo 2")
        });
        on_undo({
            let log = log.clone();
            move || log.push("undo 3")
        });
        rollback_to(mark);
    });

    log.assert_logs(expect![[r#"
        [
            "undo 3",
            "undo 2",
        ]"#]]);
}

#[test]
fn change_is_undone_by_rollback() {
    let slot = Rc::new(RefCell::new(10));
    atomically(|| {
        let mark = savepoint();
        change(&slot, 20);
        assert_eq!(*slot.borrow(), 20);
        rollback_to(mark);
        assert_eq!(*slot.borrow(), 10);
    });
    assert_eq!(*slot.borrow(), 10);
}

#[test]
fn abort_restores_cells_and_still_exits_managers() {
    let log = Logger::new();
    let manager = TraceManager::new(&log, "M");
    let value = Value::new(1);

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        atomically(|| {
            manage(manager);
            value.set(5);
            assert_eq!(value.get(), 5);
            panic!("boom");
        })
    }));

    assert!(outcome.is_err());
    assert_eq!(value.get(), 1);
    log.assert_logs(expect![[r#"
        [
            "enter M",
            "exit M (err)",
        ]"#]]);
}

#[test]
fn managers_dedup_by_identity_and_exit_in_reverse() {
    let log = Logger::new();
    let first = TraceManager::new(&log, "first");
    let second = TraceManager::new(&log, "second");

    atomically(|| {
        manage(first.clone());
        manage(second);
        manage(first);
    });

    log.assert_logs(expect![[r#"
        [
            "enter first",
            "enter second",
            "exit second (ok)",
            "exit first (ok)",
        ]"#]]);
}

struct PanickyExit {
    log: Logger,
}

impl Manager for PanickyExit {
    fn exit(&self, _error: Option<&(dyn Any + Send)>) {
        self.log.push("exit panicky");
        panic!("exit failed");
    }
}

#[test]
fn failing_exit_replaces_payload_for_remaining_managers() {
    let log = Logger::new();
    let inner = TraceManager::new(&log, "inner");

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        atomically(|| {
            manage(inner);
            manage(Rc::new(PanickyExit { log: log.clone() }));
        })
    }));

    let payload = outcome.expect_err("exit panic must propagate");
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"exit failed"));
    // The panicky manager registered second, so it exits first; the
    // inner manager then sees the new payload.
    log.assert_logs(expect![[r#"
        [
            "enter inner",
            "exit panicky",
            "exit inner (err)",
        ]"#]]);
}

#[test]
fn subject_managers_enter_on_first_touch() {
    let log = Logger::new();
    let manager = TraceManager::new(&log, "resource");
    let guarded = Value::builder()
        .label("guarded")
        .managed(manager)
        .build(1);

    atomically(|| {
        assert_eq!(guarded.get(), 1);
        assert_eq!(guarded.get(), 1);
    });

    log.assert_logs(expect![[r#"
        [
            "enter resource",
            "exit resource (ok)",
        ]"#]]);
}

#[test]
fn nested_scopes_flatten() {
    assert!(!is_active());
    atomically(|| {
        assert!(is_active());
        assert!(!in_cleanup());
        let inner = atomically(|| 7);
        assert_eq!(inner, 7);
        assert!(is_active());
    });
    assert!(!is_active());
}

#[test]
fn cleanup_is_visible_to_commit_callbacks() {
    let saw = Rc::new(RefCell::new(false));
    atomically(|| {
        let saw = Rc::clone(&saw);
        on_commit(move || *saw.borrow_mut() = in_cleanup());
    });
    assert!(*saw.borrow());
}

#[test]
#[should_panic(expected = "no atomic scope is active")]
fn on_commit_outside_scope_fails_fast() {
    on_commit(|| ());
}

#[test]
#[should_panic(expected = "no atomic scope is active")]
fn savepoint_outside_scope_fails_fast() {
    let _ = savepoint();
}
