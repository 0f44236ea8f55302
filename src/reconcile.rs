// src/reconcile.rs
//! Reconciler: previous persisted state + this run's signal → notify/suppress
//! decision and the full replacement state to persist.
//!
//! Rules per signal kind:
//! - Boolean: edge-triggered, fires on unavailable → available only.
//! - Digest: fires on any change of the combined content hash.
//! - Set: fires when items appear that the previous run did not see. The
//!   stored set is replaced, not merged, so an item that vanishes and comes
//!   back fires again.
//!
//! An empty observation (e.g. every fetch failed) never fires but IS stored,
//! which resets the baseline. A later recovery therefore fires again.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::signal::{Decision, DecisionReason, ItemId, PersistedState, Signal};

pub fn reconcile(
    previous: Option<&PersistedState>,
    observed: Signal,
    now: DateTime<Utc>,
) -> (Decision, PersistedState) {
    // A state recorded under another mode says nothing about this one.
    let previous = previous.filter(|p| p.signal.mode() == observed.mode());
    let prev_signal = previous.map(|p| &p.signal);

    let decision = match (&observed, prev_signal) {
        (Signal::Boolean { available }, prev) => {
            let was_available = matches!(prev, Some(Signal::Boolean { available: true }));
            if *available && !was_available {
                Decision::notify(DecisionReason::NewAvailability)
            } else {
                Decision::suppress()
            }
        }
        (Signal::Digest { hash: Some(hash) }, prev) => match prev {
            None => Decision::notify(DecisionReason::FirstRun),
            Some(Signal::Digest { hash: prev_hash }) if prev_hash.as_ref() == Some(hash) => {
                Decision::suppress()
            }
            Some(_) => Decision::notify(DecisionReason::NewAvailability),
        },
        (Signal::Digest { hash: None }, _) => Decision::suppress(),
        (Signal::Set { items }, prev) => {
            let new_items = match prev {
                Some(Signal::Set { items: seen }) => new_items(items, seen),
                _ => items.iter().cloned().collect(),
            };
            if new_items.is_empty() {
                Decision::suppress()
            } else {
                Decision {
                    should_notify: true,
                    reason: DecisionReason::NewItems(new_items.len()),
                    new_items,
                }
            }
        }
    };

    let last_notified_at = if decision.should_notify {
        Some(now)
    } else {
        previous.and_then(|p| p.last_notified_at)
    };

    let next = PersistedState {
        signal: observed,
        last_notified_at,
    };
    (decision, next)
}

fn new_items(observed: &BTreeSet<ItemId>, seen: &BTreeSet<ItemId>) -> Vec<ItemId> {
    observed.difference(seen).cloned().collect()
}
