//! Batched refresh against mock remotes
//!
//! Run with: `cargo test --test refresh`

mod common;

use chrono::Duration;
use common::{bug, graphql_scope, Harness, BUGZILLA_HOST};
use reftrack::{
    EntityFilter, EntityRef, EntityStore, EventType, MockRemote, RefreshError,
};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn mixed_families_in_one_call() {
    let h = Harness::new();
    h.track(EntityRef::github("o/r", 7, "issue"));
    h.track(EntityRef::bugzilla(BUGZILLA_HOST, 100));

    let remote = Arc::new(
        MockRemote::new()
            .with_graphql_response(graphql_scope(json!({
                "i0": { "state": "OPEN", "title": "Flaky", "author": { "login": "bob" } }
            })))
            .with_bug(BUGZILLA_HOST, bug(100, "NEW", "", "Crash in parser")),
    );
    let refresher = h.refresher(remote.clone(), Some("token"));

    let all = h.store.list_entities(&EntityFilter::new()).unwrap();
    let report = refresher.refresh(&all, false).await.unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.updated, 2);
    assert_eq!(remote.graphql_calls().len(), 1);
    assert_eq!(remote.bug_calls(), vec![(BUGZILLA_HOST.to_string(), 100)]);

    let issue = h
        .store
        .get_entity(reftrack::Family::GitHub, "o/r", 7)
        .unwrap()
        .unwrap();
    assert_eq!(issue.state, "open");
    assert_eq!(issue.author, "bob");
    let crash = h
        .store
        .get_entity(reftrack::Family::Bugzilla, BUGZILLA_HOST, 100)
        .unwrap()
        .unwrap();
    assert_eq!(crash.title, "Crash in parser");
    assert!(crash.is_open());
}

#[tokio::test]
async fn bug_resolution_is_a_transition() {
    let h = Harness::new();
    let id = h.track(EntityRef::bugzilla(BUGZILLA_HOST, 5));

    let first = h.refresher(
        Arc::new(MockRemote::new().with_bug(BUGZILLA_HOST, bug(5, "NEW", "", "Leak"))),
        None,
    );
    let all = h.store.list_entities(&EntityFilter::new()).unwrap();
    first.refresh(&all, false).await.unwrap();

    h.clock.advance(Duration::minutes(15));
    let second = h.refresher(
        Arc::new(MockRemote::new().with_bug(BUGZILLA_HOST, bug(5, "RESOLVED", "FIXED", "Leak"))),
        None,
    );
    let all = h.store.list_entities(&EntityFilter::new()).unwrap();
    let report = second.refresh(&all, false).await.unwrap();
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.transitions[0].detail, "NEW -> RESOLVED");

    let entity = h.store.get_entity_by_id(id).unwrap().unwrap();
    assert!(!entity.is_open());
    assert_eq!(entity.resolution.as_deref(), Some("FIXED"));
    let transitions = h
        .store
        .list_events(id)
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == EventType::StatusChanged)
        .count();
    assert_eq!(transitions, 1);
}

#[tokio::test]
async fn remote_failure_leaves_cooldown_unstamped() {
    let h = Harness::new();
    let id = h.track(EntityRef::github("o/r", 1, "pull"));
    let refresher = h.refresher(Arc::new(MockRemote::new().with_graphql_status(401)), Some("bad"));

    let all = h.store.list_entities(&EntityFilter::new()).unwrap();
    let err = refresher.refresh(&all, false).await.unwrap_err();
    assert!(matches!(err, RefreshError::Status { status: 401, .. }));

    let entity = h.store.get_entity_by_id(id).unwrap().unwrap();
    assert_eq!(entity.last_refreshed_at, None);

    // nothing was stamped, so the next attempt is not held back by the cooldown
    let retry = h.refresher(
        Arc::new(MockRemote::new().with_graphql_response(graphql_scope(json!({
            "p0": { "state": "OPEN" }
        })))),
        Some("good"),
    );
    let report = retry.refresh(&all, false).await.unwrap();
    assert_eq!(report.skipped_cooldown, 0);
    assert_eq!(report.updated, 1);
}
