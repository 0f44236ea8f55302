// tests/reconcile_digest.rs
use chrono::Utc;
use slot_watcher::extract::Extractor;
use slot_watcher::{reconcile, PersistedState, Signal, SourceResult};

fn digest_of(pages: &[&str]) -> Signal {
    let obs: Vec<SourceResult> = pages
        .iter()
        .enumerate()
        .map(|(i, p)| SourceResult::ok(format!("https://s{i}.test"), *p))
        .collect();
    Extractor::digest().extract(&obs)
}

fn baseline(pages: &[&str]) -> PersistedState {
    reconcile(None, digest_of(pages), Utc::now()).1
}

#[test]
fn identical_content_is_silent() {
    let pages = ["<p>Calendar</p>", "<p>Other office</p>"];
    assert_eq!(digest_of(&pages), digest_of(&pages));

    let prev = baseline(&pages);
    let (d, _) = reconcile(Some(&prev), digest_of(&pages), Utc::now());
    assert!(!d.should_notify);
}

#[test]
fn single_byte_difference_notifies() {
    let prev = baseline(&["<p>Calendar</p>"]);
    let (d, next) = reconcile(Some(&prev), digest_of(&["<p>Calendar!</p>"]), Utc::now());
    assert!(d.should_notify);
    assert_ne!(next.signal, prev.signal);
}

#[test]
fn whitespace_is_significant() {
    let prev = baseline(&["<p>Calendar</p>"]);
    let (d, _) = reconcile(Some(&prev), digest_of(&["<p>Calendar</p>\n"]), Utc::now());
    assert!(d.should_notify);
}

#[test]
fn source_order_is_part_of_the_digest() {
    assert_ne!(digest_of(&["a", "b"]), digest_of(&["b", "a"]));
}
