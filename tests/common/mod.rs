//! Utility for tests that lets us log when notable events happen.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

/// Shared log handle; clones record into the same buffer. The engine is
/// single-threaded per controller, so a plain ref-cell suffices.
#[derive(Clone, Default)]
pub struct Logger {
    logs: Rc<RefCell<Vec<String>>>,
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.logs.borrow_mut().push(entry.into());
    }

    /// Asserts what the (formatted) logs should look like, clearing the
    /// logged events.
    pub fn assert_logs(&self, expected: expect_test::Expect) {
        let logs = std::mem::take(&mut *self.logs.borrow_mut());
        expected.assert_eq(&format!("{logs:#?}"));
    }

    /// Asserts the number of logged events, clearing them.
    pub fn assert_logs_len(&self, expected: usize) {
        let logs = std::mem::take(&mut *self.logs.borrow_mut());
        assert_eq!(logs.len(), expected, "logs were: {logs:#?}");
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.logs.borrow_mut())
    }
}
