//! Per-kind cell behavior: lazy computes, discrete resets, constants,
//! observers, and the read-only phase contract.

mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::Logger;
use espalier::cell::{Compute, Constant, Discrete, Maintain, Observer, Value};
use espalier::{atomically, try_atomically, Error};
use expect_test::expect;
use test_log::test;

#[test]
fn compute_is_lazy_without_readers() {
    let base = Value::new(1);
    let runs = Rc::new(Cell::new(0u32));
    let doubled = Compute::new({
        let base = base.clone();
        let runs = Rc::clone(&runs);
        move || {
            runs.set(runs.get() + 1);
            base.get() * 2
        }
    });

    assert_eq!(doubled.get(), 2);
    assert_eq!(runs.get(), 1);

    // A clean re-read does not recompute.
    assert_eq!(doubled.get(), 2);
    assert_eq!(runs.get(), 1);

    // With no readers, a dependency change only marks it stale.
    base.set(3);
    assert_eq!(runs.get(), 1);

    assert_eq!(doubled.get(), 6);
    assert_eq!(runs.get(), 2);
}

#[test]
fn compute_with_readers_recomputes_eagerly() {
    let base = Value::new(1);
    let doubled = Compute::new({
        let base = base.clone();
        move || base.get() * 2
    });
    let plus_one = Maintain::new(0, {
        let doubled = doubled.clone();
        move || doubled.get() + 1
    });
    assert_eq!(plus_one.get(), 3);

    base.set(5);
    assert_eq!(plus_one.get(), 11);
    assert_eq!(doubled.get(), 10);
}

#[test]
fn compute_reading_nothing_becomes_constant() {
    let runs = Rc::new(Cell::new(0u32));
    let answer = Compute::new({
        let runs = Rc::clone(&runs);
        move || {
            runs.set(runs.get() + 1);
            42
        }
    });
    assert_eq!(answer.get(), 42);
    assert_eq!(answer.get(), 42);
    assert_eq!(runs.get(), 1);
}

#[test]
fn discrete_resets_to_its_sentinel_after_the_pass() {
    let log = Logger::new();
    let pulse = Discrete::named("pulse", 0);
    let _watch = Observer::named("watch", {
        let pulse = pulse.clone();
        let log = log.clone();
        move || log.push(format!("saw {}", pulse.get()))
    });

    pulse.set(5);

    // The transient value was visible inside the pass only.
    assert_eq!(pulse.get(), 0);
    log.assert_logs(expect![[r#"
        [
            "saw 0",
            "saw 5",
        ]"#]]);
}

#[test]
fn resetting_maintain_is_discrete() {
    let ticks = Maintain::builder()
        .label("ticks")
        .initially(0)
        .resetting_to(0)
        .build();
    let seen = Rc::new(Cell::new(-1));
    let _watch = Observer::new({
        let ticks = ticks.clone();
        let seen = Rc::clone(&seen);
        move || seen.set(ticks.get())
    });

    ticks.set(7);
    assert_eq!(seen.get(), 7, "observers see the transient value");
    assert_eq!(ticks.get(), 0, "external reads see the sentinel");
}

#[test]
fn constant_reads_are_plain() {
    let golden = Constant::named("golden", 1.618_f64);
    assert_eq!(golden.get(), 1.618);
    atomically(|| assert_eq!(golden.get(), 1.618));
}

#[test]
fn dropped_observer_stops_reporting() {
    let log = Logger::new();
    let value = Value::new(0);
    let watch = Observer::named("watch", {
        let value = value.clone();
        let log = log.clone();
        move || log.push(format!("v={}", value.get()))
    });

    value.set(1);
    drop(watch);
    value.set(2);

    log.assert_logs(expect![[r#"
        [
            "v=0",
            "v=1",
        ]"#]]);
}

#[test]
fn observers_cannot_write() {
    let input = Value::named("input", 0);
    let output = Value::named("output", 0);
    let _rogue = Observer::named("rogue", {
        let input = input.clone();
        let output = output.clone();
        move || {
            if input.get() > 0 {
                output.set(99);
            }
        }
    });

    let error = try_atomically(|| input.set(5)).unwrap_err();
    assert!(matches!(error, Error::ReadOnly { .. }), "{error:?}");

    // The whole scope rolled back, including the triggering write.
    assert_eq!(input.get(), 0);
    assert_eq!(output.get(), 0);
}

#[test]
fn value_writes_are_equality_gated() {
    let counted = Value::new(3);
    let runs = Rc::new(Cell::new(0u32));
    let _echo = Maintain::new(0, {
        let counted = counted.clone();
        let runs = Rc::clone(&runs);
        move || {
            runs.set(runs.get() + 1);
            counted.get()
        }
    });
    runs.set(0);

    counted.set(3);
    assert_eq!(runs.get(), 0, "equal re-assignment publishes nothing");
    counted.set(4);
    assert_eq!(runs.get(), 1);
}

#[test]
fn make_seeds_the_initial_value() {
    let seeded = Maintain::builder()
        .label("seeded")
        .make(|| 6 * 7)
        .build();
    assert_eq!(seeded.get(), 42);
}

#[test]
#[should_panic(expected = "must not read cells")]
fn make_reading_a_cell_is_rejected() {
    let other = Value::new(1);
    let _bad = Maintain::builder()
        .make(move || other.get())
        .build();
}
