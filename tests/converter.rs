//! The classic two-way unit converter: two maintain cells defined in
//! terms of each other, plus an observer reporting each settled state.

mod common;
use common::Logger;
use espalier::cell::{Maintain, Observer};
use expect_test::expect;
use test_log::test;

fn converter() -> (Maintain<f64>, Maintain<f64>) {
    let celsius = Maintain::builder().label("C").initially(0.0_f64).build();
    let fahrenheit = Maintain::builder().label("F").initially(32.0_f64).build();
    fahrenheit.define({
        let celsius = celsius.clone();
        move || celsius.get() * 1.8 + 32.0
    });
    celsius.define({
        let fahrenheit = fahrenheit.clone();
        move || (fahrenheit.get() - 32.0) / 1.8
    });
    (celsius, fahrenheit)
}

#[test]
fn every_assignment_settles_both_cells() {
    let (celsius, fahrenheit) = converter();

    celsius.set(100.0);
    assert_eq!((celsius.get(), fahrenheit.get()), (100.0, 212.0));

    fahrenheit.set(32.0);
    assert_eq!((celsius.get(), fahrenheit.get()), (0.0, 32.0));

    celsius.set(-40.0);
    assert_eq!((celsius.get(), fahrenheit.get()), (-40.0, -40.0));
}

#[test]
fn observer_reports_each_settled_state_once() {
    let log = Logger::new();
    let (celsius, fahrenheit) = converter();

    let _watch = Observer::named("report", {
        let celsius = celsius.clone();
        let fahrenheit = fahrenheit.clone();
        let log = log.clone();
        move || log.push(format!("({}, {})", celsius.get(), fahrenheit.get()))
    });

    celsius.set(100.0);
    fahrenheit.set(32.0);
    celsius.set(-40.0);
    // Re-assigning an equal value publishes nothing at all.
    celsius.set(-40.0);

    log.assert_logs(expect![[r#"
        [
            "(0, 32)",
            "(100, 212)",
            "(0, 32)",
            "(-40, -40)",
        ]"#]]);
}

#[test]
fn batched_assignment_settles_once() {
    let log = Logger::new();
    let (celsius, fahrenheit) = converter();
    let _watch = Observer::named("report", {
        let celsius = celsius.clone();
        let fahrenheit = fahrenheit.clone();
        let log = log.clone();
        move || log.push(format!("({}, {})", celsius.get(), fahrenheit.get()))
    });
    log.take();

    espalier::atomically(|| {
        celsius.set(10.0);
        celsius.set(100.0);
    });

    log.assert_logs(expect![[r#"
        [
            "(100, 212)",
        ]"#]]);
}
