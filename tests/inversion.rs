//! Order-inversion recovery: a listener that writes a subject some
//! earlier-run listener already read forces a partial rollback and a
//! corrected re-run, with the reader promoted strictly above the writer.

mod common;

use std::cell::Cell;
use std::rc::Rc;

use espalier::cell::{Compute, Maintain, Value};
use espalier::atomically;
use test_log::test;

#[test]
fn reader_is_rewound_promoted_and_rerun() {
    let x = Value::named("x", 0);
    let trigger = Value::named("trigger", 0);
    let a_runs = Rc::new(Cell::new(0u32));
    let b_runs = Rc::new(Cell::new(0u32));

    // A reads both the trigger and x.
    let a = Maintain::builder().label("A").initially(0).build();
    a.define({
        let trigger = trigger.clone();
        let x = x.clone();
        let a_runs = Rc::clone(&a_runs);
        move || {
            a_runs.set(a_runs.get() + 1);
            trigger.get() + x.get()
        }
    });

    // B reads the trigger and writes x.
    let b = Maintain::builder().label("B").initially(0).build();
    b.define({
        let trigger = trigger.clone();
        let x = x.clone();
        let b_runs = Rc::clone(&b_runs);
        move || {
            b_runs.set(b_runs.get() + 1);
            let pulse = trigger.get();
            x.set(pulse * 10);
            pulse
        }
    });

    a_runs.set(0);
    b_runs.set(0);

    // Both wake at the same layer; A was linked first, so it runs first
    // and reads x before B writes it.
    trigger.set(1);

    assert_eq!(x.get(), 10);
    assert_eq!(a.get(), 11);
    assert_eq!(a_runs.get(), 2, "A's first run was stale and re-ran once");
    assert!(a.layer() > b.layer());
}

#[test]
fn external_write_rewinds_an_initialized_lazy_read() {
    let v = Value::named("v", 1);
    let runs = Rc::new(Cell::new(0u32));
    let tenfold = Compute::new({
        let v = v.clone();
        let runs = Rc::clone(&runs);
        move || {
            runs.set(runs.get() + 1);
            v.get() * 10
        }
    });

    atomically(|| {
        assert_eq!(tenfold.get(), 10);
        // Invalidates the read the compute just made; its work is
        // rewound and it recomputes against the new value.
        v.set(2);
    });

    assert_eq!(tenfold.get(), 20);
    assert!(runs.get() >= 2);
}
