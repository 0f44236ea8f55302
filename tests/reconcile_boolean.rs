// tests/reconcile_boolean.rs
use chrono::{Duration, TimeZone, Utc};
use slot_watcher::{reconcile, DecisionReason, PersistedState, Signal};

fn run_sequence(seq: &[bool]) -> Vec<bool> {
    let t0 = Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap();
    let mut state: Option<PersistedState> = None;
    let mut fired = Vec::new();
    for (i, available) in seq.iter().enumerate() {
        let now = t0 + Duration::minutes(15 * i as i64);
        let (d, next) = reconcile(state.as_ref(), Signal::Boolean { available: *available }, now);
        fired.push(d.should_notify);
        state = Some(next);
    }
    fired
}

#[test]
fn unavailable_then_available_twice_fires_once() {
    assert_eq!(run_sequence(&[false, true, true]), vec![false, true, false]);
}

#[test]
fn each_reopening_fires_again() {
    assert_eq!(
        run_sequence(&[true, true, false, true, false, false, true]),
        vec![true, false, false, true, false, false, true]
    );
}

#[test]
fn state_always_reflects_latest_observation() {
    let (_, s1) = reconcile(None, Signal::Boolean { available: true }, Utc::now());
    let (d, s2) = reconcile(Some(&s1), Signal::Boolean { available: false }, Utc::now());
    assert!(!d.should_notify);
    assert_eq!(d.reason, DecisionReason::NoChange);
    assert_eq!(s2.signal, Signal::Boolean { available: false });
}
