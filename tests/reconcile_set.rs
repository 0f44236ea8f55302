// tests/reconcile_set.rs
use std::collections::BTreeSet;

use chrono::Utc;
use slot_watcher::{reconcile, DecisionReason, ItemId, PersistedState, Signal};

fn items(names: &[&str]) -> Signal {
    Signal::Set {
        items: names
            .iter()
            .map(|n| ItemId::new("https://cal.test", n))
            .collect::<BTreeSet<_>>(),
    }
}

fn step(prev: Option<&PersistedState>, names: &[&str]) -> (bool, Vec<ItemId>, PersistedState) {
    let (d, next) = reconcile(prev, items(names), Utc::now());
    (d.should_notify, d.new_items, next)
}

#[test]
fn first_run_notifies_when_items_exist() {
    let (fired, new, _) = step(None, &["A", "B"]);
    assert!(fired);
    assert_eq!(new.len(), 2);
}

#[test]
fn replaced_item_reports_only_the_new_one() {
    let (_, _, s1) = step(None, &["A", "B"]);
    let (d, s2) = reconcile(Some(&s1), items(&["B", "C"]), Utc::now());
    assert!(d.should_notify);
    assert_eq!(d.reason, DecisionReason::NewItems(1));
    assert_eq!(d.new_items, vec![ItemId::new("https://cal.test", "C")]);
    // Replacement, not union: A is forgotten.
    assert_eq!(s2.signal, items(&["B", "C"]));
}

#[test]
fn unchanged_set_is_silent() {
    let (_, _, s1) = step(None, &["A", "B"]);
    let (fired, new, _) = step(Some(&s1), &["A", "B"]);
    assert!(!fired);
    assert!(new.is_empty());
}

#[test]
fn shrinking_set_is_silent() {
    let (_, _, s1) = step(None, &["A", "B"]);
    let (fired, _, _) = step(Some(&s1), &["A"]);
    assert!(!fired);
}

/// Items that disappear for one run and come back are reported again: the
/// empty run replaced the stored set. Intended behaviour, pinned here so a
/// change to union semantics is a visible decision.
#[test]
fn items_that_vanish_and_return_notify_again() {
    let (first, _, s1) = step(None, &["A", "B"]);
    let (second, _, s2) = step(Some(&s1), &[]);
    let (third, new, _) = step(Some(&s2), &["A", "B"]);
    assert!(first);
    assert!(!second);
    assert!(third);
    assert_eq!(new.len(), 2);
}
