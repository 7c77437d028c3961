//! Signal reconciliation across repeated scrapes
//!
//! Run with: `cargo test --test reconcile`

mod common;

use chrono::Duration;
use common::Harness;
use reftrack::format::signals_markdown;
use reftrack::{Clock, Signal, SignalFilter, SignalItem, SignalStore, Urgency};

fn scrape(h: &Harness, titles: &[&str]) -> reftrack::ReconcileReport {
    h.clock.advance(Duration::minutes(5));
    let items: Vec<SignalItem> = titles.iter().map(|t| SignalItem::new(*t)).collect();
    h.store.reconcile_signals("slack", &items, h.clock.now()).unwrap()
}

fn find(h: &Harness, title: &str) -> Signal {
    h.store
        .list_signals(&SignalFilter::new().include_completed())
        .unwrap()
        .into_iter()
        .find(|s| s.title == title)
        .unwrap()
}

#[test]
fn vanished_signal_completes_then_revives() {
    let h = Harness::new();
    scrape(&h, &["A", "B"]);

    let report = scrape(&h, &["B"]);
    assert_eq!(report.auto_completed, 1);
    let a = find(&h, "A");
    assert!(a.auto_completed);
    assert_eq!(a.completed_at, Some(h.clock.now()));

    let report = scrape(&h, &["A", "B"]);
    assert_eq!(report.reactivated, 1);
    assert_eq!(report.inserted, 0);
    assert!(find(&h, "A").is_active());
}

#[test]
fn manual_completion_is_sticky() {
    let h = Harness::new();
    scrape(&h, &["A"]);
    let a = find(&h, "A");
    h.store.complete_signal(a.id).unwrap();

    scrape(&h, &["A"]);
    let a = find(&h, "A");
    assert!(!a.is_active());
    assert!(!a.auto_completed);
}

#[test]
fn reopened_signal_survives_next_scrape() {
    let h = Harness::new();
    scrape(&h, &["A", "B"]);
    let a = find(&h, "A");
    h.store.complete_signal(a.id).unwrap();
    h.store.reopen_signal(a.id).unwrap();
    assert!(find(&h, "A").pinned);

    scrape(&h, &["B"]);
    assert!(find(&h, "A").is_active());

    h.store.set_pinned(a.id, false).unwrap();
    scrape(&h, &["B"]);
    assert!(!find(&h, "A").is_active());
}

#[test]
fn heuristics_and_manual_classification() {
    let h = Harness::new();
    h.store
        .reconcile_signals(
            "slack",
            &[
                SignalItem::new("Alice").with_kind("dm"),
                SignalItem::new("#general").with_kind("channel"),
            ],
            h.clock.now(),
        )
        .unwrap();
    h.store
        .reconcile_signals("gmail", &[SignalItem::new("Invoice")], h.clock.now())
        .unwrap();

    assert_eq!(find(&h, "Alice").urgency, Some(Urgency::Urgent));
    assert_eq!(find(&h, "#general").urgency, Some(Urgency::Fyi));

    let unclassified = h.store.list_unclassified().unwrap();
    assert_eq!(unclassified.len(), 1);
    h.store
        .set_urgency(unclassified[0].id, Urgency::Review, "manual")
        .unwrap();
    assert!(h.store.list_unclassified().unwrap().is_empty());

    let counts = h.store.active_signal_counts().unwrap();
    assert_eq!(counts.get("slack"), Some(&2));
    assert_eq!(counts.get("gmail"), Some(&1));
}

#[test]
fn rendering_reflects_reconciled_state() {
    let h = Harness::new();
    assert_eq!(
        signals_markdown(&h.store.list_signals(&SignalFilter::new()).unwrap(), h.clock.now()),
        "No signals found.\n"
    );

    scrape(&h, &["A", "B"]);
    scrape(&h, &["B"]);
    let text = signals_markdown(
        &h.store.list_signals(&SignalFilter::new().include_completed()).unwrap(),
        h.clock.now(),
    );
    assert!(text.starts_with("## Slack (1 active)"));
    assert!(text.contains("\u{2713} A"));
}
