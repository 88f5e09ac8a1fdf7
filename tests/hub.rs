//! Publish/subscribe over the hub: wildcard patterns, delivery order,
//! and the per-pass lifetime of messages.

mod common;

use common::Logger;
use espalier::atomically;
use espalier::cell::Observer;
use espalier::collections::Hub;
use expect_test::expect;
use test_log::test;

#[test]
fn patterns_receive_matching_messages_in_publication_order() {
    let hub: Hub<i32> = Hub::named("bus");
    let log = Logger::new();

    let _ends_in_three = Observer::named("p1", {
        let hub = hub.clone();
        let log = log.clone();
        move || {
            for message in hub.get(vec![None, None, Some(3)]) {
                log.push(format!("p1 {message:?}"));
            }
        }
    });
    let _two_four = Observer::named("p2", {
        let hub = hub.clone();
        let log = log.clone();
        move || {
            for message in hub.get(vec![Some(2), Some(4), None]) {
                log.push(format!("p2 {message:?}"));
            }
        }
    });

    atomically(|| {
        hub.put(vec![1, 2, 3]);
        hub.put(vec![2, 4, 4]);
        hub.put(vec![2, 4, 3]);
    });

    log.assert_logs(expect![[r#"
        [
            "p1 [1, 2, 3]",
            "p1 [2, 4, 3]",
            "p2 [2, 4, 4]",
            "p2 [2, 4, 3]",
        ]"#]]);

    // Messages are discrete: nothing survives the pass.
    assert_eq!(hub.get(vec![None, None, Some(3)]), Vec::<Vec<i32>>::new());
}

#[test]
fn non_matching_puts_do_not_wake_a_pattern() {
    let hub: Hub<i32> = Hub::named("bus");
    let log = Logger::new();
    let _watch = Observer::named("watch", {
        let hub = hub.clone();
        let log = log.clone();
        move || {
            log.push(format!("woke: {:?}", hub.get(vec![Some(7), None])));
        }
    });
    log.take();

    // Different rightmost-position value: the pattern's index subject is
    // never touched.
    hub.put(vec![8, 1]);
    log.assert_logs_len(0);

    hub.put(vec![7, 5]);
    log.assert_logs(expect![[r#"
        [
            "woke: [[7, 5]]",
        ]"#]]);
}

#[test]
fn length_must_match_exactly() {
    let hub: Hub<&'static str> = Hub::new();
    let log = Logger::new();
    let _watch = Observer::new({
        let hub = hub.clone();
        let log = log.clone();
        move || {
            for message in hub.get(vec![Some("topic"), None]) {
                log.push(format!("{message:?}"));
            }
        }
    });
    log.take();

    atomically(|| {
        hub.put(vec!["topic"]);
        hub.put(vec!["topic", "body", "extra"]);
        hub.put(vec!["topic", "body"]);
    });

    log.assert_logs(expect![[r#"
        [
            "[\"topic\", \"body\"]",
        ]"#]]);
}

#[test]
fn all_wildcard_patterns_see_everything() {
    let hub: Hub<i32> = Hub::new();
    let log = Logger::new();
    let _watch = Observer::new({
        let hub = hub.clone();
        let log = log.clone();
        move || {
            for message in hub.get(vec![None, None]) {
                log.push(format!("{message:?}"));
            }
        }
    });
    log.take();

    atomically(|| {
        hub.put(vec![1, 2]);
        hub.put(vec![3, 4]);
    });

    log.assert_logs(expect![[r#"
        [
            "[1, 2]",
            "[3, 4]",
        ]"#]]);
}
