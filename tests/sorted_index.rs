//! The ordered index: slice-edit change log over a reactive set.

mod common;

use common::Logger;
use espalier::atomically;
use espalier::cell::Observer;
use espalier::collections::{SetCell, SortedIndex};
use expect_test::expect;
use test_log::test;

#[test]
fn edits_describe_each_membership_change() {
    let numbers: SetCell<i64> = SetCell::named("numbers");
    numbers.insert(1);
    numbers.insert(2);
    numbers.insert(3);

    let index = SortedIndex::named("by-value", &numbers, |n: &i64| *n, false);
    assert_eq!(index.view(), vec![1, 2, 3]);

    let log = Logger::new();
    let _watch = Observer::named("edits", {
        let changes = index.changes();
        let log = log.clone();
        move || log.push(format!("{:?}", changes.get()))
    });
    log.take();

    atomically(|| {
        numbers.insert(0);
        numbers.insert(4);
    });
    assert_eq!(index.view(), vec![0, 1, 2, 3, 4]);

    // Between passes the change log rests empty.
    assert_eq!(index.changes().get(), Vec::<(usize, usize, usize)>::new());

    index.set_reverse(true);
    assert_eq!(index.view(), vec![4, 3, 2, 1, 0]);

    log.assert_logs(expect![[r#"
        [
            "[(3, 3, 1), (0, 0, 1)]",
            "[(0, 5, 5)]",
        ]"#]]);
}

#[test]
fn removals_are_reported_back_to_front() {
    let numbers: SetCell<i64> = SetCell::named("numbers");
    for n in [10, 20, 30, 40] {
        numbers.insert(n);
    }
    let index = SortedIndex::new(&numbers, |n: &i64| *n, false);

    let log = Logger::new();
    let _watch = Observer::new({
        let changes = index.changes();
        let log = log.clone();
        move || log.push(format!("{:?}", changes.get()))
    });
    log.take();

    atomically(|| {
        numbers.remove(&40);
        numbers.remove(&10);
    });

    assert_eq!(index.view(), vec![20, 30]);
    log.assert_logs(expect![[r#"
        [
            "[(3, 4, 0), (0, 1, 0)]",
        ]"#]]);
}

#[test]
fn applying_edits_reproduces_the_view() {
    let words: SetCell<&'static str> = SetCell::named("words");
    for word in ["pear", "fig", "apple"] {
        words.insert(word);
    }
    let index = SortedIndex::new(&words, |w: &&str| w.len(), false);
    let previous = index.view();
    assert_eq!(previous, vec!["fig", "pear", "apple"]);

    let captured = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let _watch = Observer::new({
        let changes = index.changes();
        let captured = std::rc::Rc::clone(&captured);
        move || {
            let edits = changes.get();
            if !edits.is_empty() {
                *captured.borrow_mut() = edits;
            }
        }
    });

    atomically(|| {
        words.insert("kiwi");
        words.remove(&"pear");
    });

    let settled = index.view();
    assert_eq!(settled, vec!["fig", "kiwi", "apple"]);
    let replayed = replay(&previous, &settled, &captured.borrow());
    assert_eq!(replayed, settled);
}

/// Applies a slice-edit list to `previous`. Each edit replaces
/// `replica[start..end]` with `new_len` elements; the elements land in
/// the new view at `start` displaced by the length deltas of the edits
/// emitted after this one (those all target positions at or below
/// `start`).
fn replay<T: Clone>(previous: &[T], new_view: &[T], edits: &[(usize, usize, usize)]) -> Vec<T> {
    let mut replica = previous.to_vec();
    for (at, &(start, end, new_len)) in edits.iter().enumerate() {
        let shift: isize = edits[at + 1..]
            .iter()
            .map(|&(s, e, n)| n as isize - (e - s) as isize)
            .sum();
        let from = (start as isize + shift) as usize;
        let replacement = new_view[from..from + new_len].to_vec();
        replica.splice(start..end, replacement);
    }
    replica
}
