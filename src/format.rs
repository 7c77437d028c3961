//! Text and JSON renderings of entities and signals

use crate::entity::{Entity, Family, Grouping, SeenSource, FAMILIES};
use crate::signals::{Signal, Urgency};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

pub const NO_ENTITIES: &str = "No entities found.\n";
pub const NO_SIGNALS: &str = "No signals found.\n";

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Relative age: `Nm ago` under an hour, `Nh ago` under a day, else `Nd ago`.
pub fn format_age(t: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = (now - t).max(chrono::Duration::zero());
    if elapsed < chrono::Duration::hours(1) {
        format!("{}m ago", elapsed.num_minutes())
    } else if elapsed < chrono::Duration::days(1) {
        format!("{}h ago", elapsed.num_hours())
    } else {
        format!("{}d ago", elapsed.num_days())
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ============================================================================
// Entities
// ============================================================================

#[derive(Serialize)]
struct EntityJson<'a> {
    id: i64,
    family: Family,
    scope: &'a str,
    local_id: i64,
    kind: &'a str,
    url: String,
    title: &'a str,
    state: &'a str,
    author: &'a str,
    assignees: &'a [String],
    review_status: Option<&'a str>,
    checks_status: Option<&'a str>,
    resolution: Option<&'a str>,
    first_seen_at: String,
    first_seen_source: SeenSource,
    last_refreshed_at: Option<String>,
    external_updated_at: Option<String>,
}

impl<'a> From<&'a Entity> for EntityJson<'a> {
    fn from(e: &'a Entity) -> Self {
        Self {
            id: e.id,
            family: e.family,
            scope: &e.scope,
            local_id: e.local_id,
            kind: &e.kind,
            url: e.url(),
            title: &e.title,
            state: &e.state,
            author: &e.author,
            assignees: &e.assignees,
            review_status: e.review_status.as_deref(),
            checks_status: e.checks_status.as_deref(),
            resolution: e.resolution.as_deref(),
            first_seen_at: rfc3339(e.first_seen_at),
            first_seen_source: e.first_seen_source,
            last_refreshed_at: e.last_refreshed_at.map(rfc3339),
            external_updated_at: e.external_updated_at.map(rfc3339),
        }
    }
}

/// Flat JSON array, one object per entity with its URL
pub fn entities_json(entities: &[Entity]) -> serde_json::Result<String> {
    let items: Vec<EntityJson<'_>> = entities.iter().map(EntityJson::from).collect();
    serde_json::to_string_pretty(&items)
}

/// Markdown listing. With `family` set, only that family's section is
/// rendered and its own empty message is used.
pub fn entities_markdown(entities: &[Entity], family: Option<Family>, now: DateTime<Utc>) -> String {
    if let Some(family) = family {
        let own: Vec<&Entity> = entities.iter().filter(|e| e.family == family).collect();
        if own.is_empty() {
            return family.descriptor().empty_message.to_string();
        }
        return family_markdown(family, &own, now);
    }

    if entities.is_empty() {
        return NO_ENTITIES.to_string();
    }

    let mut out = String::new();
    for family in FAMILIES {
        let own: Vec<&Entity> = entities.iter().filter(|e| e.family == family).collect();
        if own.is_empty() {
            continue;
        }
        let _ = writeln!(out, "# {}\n", family.descriptor().label);
        out.push_str(&family_markdown(family, &own, now));
    }
    out
}

fn family_markdown(family: Family, entities: &[&Entity], now: DateTime<Utc>) -> String {
    let descriptor = family.descriptor();
    let mut groups: BTreeMap<String, Vec<&Entity>> = BTreeMap::new();
    for entity in entities {
        let key = match descriptor.grouping {
            Grouping::ByState if entity.state.is_empty() => {
                descriptor.state_order.first().copied().unwrap_or("open").to_string()
            }
            Grouping::ByState => entity.state.to_lowercase(),
            Grouping::ByScope => entity.scope.clone(),
        };
        groups.entry(key).or_default().push(entity);
    }

    // known states in their fixed order, anything else alphabetically after
    let mut keys: Vec<&String> = groups.keys().collect();
    keys.sort_by_key(|key| {
        let rank = descriptor
            .state_order
            .iter()
            .position(|s| *s == key.as_str())
            .unwrap_or(usize::MAX);
        (rank, key.to_string())
    });

    let mut out = String::new();
    for key in keys {
        let items = &groups[key];
        let heading = match descriptor.grouping {
            Grouping::ByState => capitalize(key),
            Grouping::ByScope => key.clone(),
        };
        let _ = writeln!(out, "## {} ({})\n", heading, items.len());
        for entity in items {
            match family {
                Family::GitHub => github_entry(&mut out, entity, now),
                Family::Bugzilla => bugzilla_entry(&mut out, entity),
            }
        }
    }
    out
}

fn github_entry(out: &mut String, e: &Entity, now: DateTime<Utc>) {
    let title = match e.title.trim() {
        "" => "(untitled)",
        t => t,
    };
    let _ = writeln!(out, "- {} [{}] {}", e.entity_ref().key(), e.kind, title);

    let mut details = Vec::new();
    if !e.author.is_empty() {
        details.push(format!("Author: {}", e.author));
    }
    if let Some(review) = e.review_status.as_deref().filter(|r| !r.is_empty()) {
        details.push(format!("Review: {}", review));
    }
    if let Some(checks) = e.checks_status.as_deref().filter(|c| !c.is_empty()) {
        details.push(format!("Checks: {}", checks));
    }
    if !details.is_empty() {
        let _ = writeln!(out, "  {}", details.join(" | "));
    }

    let last_updated = e
        .external_updated_at
        .or(e.last_refreshed_at)
        .unwrap_or(e.first_seen_at);
    let _ = writeln!(
        out,
        "  First seen: {} ({}) | Last updated: {}\n",
        e.first_seen_at.format("%Y-%m-%d"),
        e.first_seen_source,
        format_age(last_updated, now)
    );
}

fn bugzilla_entry(out: &mut String, e: &Entity) {
    let status = match (e.state.as_str(), e.resolution.as_deref()) {
        ("", _) => String::new(),
        (state, Some(res)) if !res.is_empty() => format!(" [{}/{}]", state, res),
        (state, _) => format!(" [{}]", state),
    };
    let title = match e.title.trim() {
        "" => String::new(),
        t => format!(" {}", t),
    };
    let _ = writeln!(out, "- {}{}{}", e.entity_ref().key(), status, title);
    let _ = writeln!(
        out,
        "  First seen: {} ({})\n  URL: {}\n",
        e.first_seen_at.format("%Y-%m-%d"),
        e.first_seen_source,
        e.url()
    );
}

// ============================================================================
// Signals
// ============================================================================

#[derive(Serialize)]
struct SignalJson<'a> {
    id: i64,
    title: &'a str,
    preview: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    snippet: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    source_ts: &'a str,
    captured_at: String,
    active: bool,
    pinned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    urgency: Option<Urgency>,
}

fn is_blank(s: &&str) -> bool {
    s.is_empty()
}

/// JSON object keyed by source
pub fn signals_json(signals: &[Signal]) -> serde_json::Result<String> {
    let mut grouped: BTreeMap<&str, Vec<SignalJson<'_>>> = BTreeMap::new();
    for s in signals {
        grouped.entry(s.source.as_str()).or_default().push(SignalJson {
            id: s.id,
            title: &s.title,
            preview: &s.preview,
            snippet: &s.snippet,
            source_ts: &s.source_ts,
            captured_at: rfc3339(s.captured_at),
            active: s.is_active(),
            pinned: s.pinned,
            urgency: s.urgency,
        });
    }
    serde_json::to_string_pretty(&grouped)
}

/// Markdown grouped by source in first-seen order
pub fn signals_markdown(signals: &[Signal], now: DateTime<Utc>) -> String {
    if signals.is_empty() {
        return NO_SIGNALS.to_string();
    }

    let mut order: Vec<&str> = Vec::new();
    let mut grouped: BTreeMap<&str, Vec<&Signal>> = BTreeMap::new();
    for s in signals {
        if !grouped.contains_key(s.source.as_str()) {
            order.push(s.source.as_str());
        }
        grouped.entry(s.source.as_str()).or_default().push(s);
    }

    let mut out = String::new();
    for source in order {
        let items = &grouped[source];
        let active = items.iter().filter(|s| s.is_active()).count();
        let _ = writeln!(out, "## {} ({} active)\n", capitalize(source), active);
        for s in items {
            let mut prefix = format!("- [{}]", s.id);
            if !s.is_active() {
                prefix.push_str(" \u{2713}");
            }
            if s.pinned {
                prefix.push_str(" (pinned)");
            }
            let age = format_age(s.captured_at, now);
            if s.preview.is_empty() {
                let _ = writeln!(out, "{} {} ({})", prefix, s.title, age);
            } else {
                let _ = writeln!(out, "{} {} \u{2014} {} ({})", prefix, s.title, s.preview, age);
            }
            if !s.snippet.is_empty() {
                let _ = writeln!(out, "  > {}", s.snippet);
            }
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
    }

    fn entity(family: Family, scope: &str, local_id: i64, kind: &str, state: &str) -> Entity {
        Entity {
            id: local_id,
            family,
            scope: scope.to_string(),
            local_id,
            kind: kind.to_string(),
            title: String::new(),
            state: state.to_string(),
            author: String::new(),
            assignees: Vec::new(),
            review_status: None,
            checks_status: None,
            resolution: None,
            first_seen_at: now() - Duration::days(3),
            first_seen_source: SeenSource::Tab,
            last_refreshed_at: None,
            external_updated_at: None,
        }
    }

    fn signal(id: i64, source: &str, title: &str) -> Signal {
        Signal {
            id,
            source: source.to_string(),
            title: title.to_string(),
            preview: String::new(),
            snippet: String::new(),
            source_ts: String::new(),
            kind: None,
            captured_at: now() - Duration::minutes(5),
            completed_at: None,
            auto_completed: false,
            pinned: false,
            urgency: None,
            urgency_source: None,
        }
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(now() - Duration::minutes(7), now()), "7m ago");
        assert_eq!(format_age(now() - Duration::hours(5), now()), "5h ago");
        assert_eq!(format_age(now() - Duration::days(2), now()), "2d ago");
        assert_eq!(format_age(now() + Duration::minutes(1), now()), "0m ago");
    }

    #[test]
    fn test_empty_outputs_are_literal() {
        assert_eq!(entities_markdown(&[], None, now()), "No entities found.\n");
        assert_eq!(entities_markdown(&[], Some(Family::GitHub), now()), "No GitHub entities found.\n");
        assert_eq!(
            entities_markdown(&[], Some(Family::Bugzilla), now()),
            "No Bugzilla issues found.\n"
        );
        assert_eq!(signals_markdown(&[], now()), "No signals found.\n");
        assert_eq!(entities_json(&[]).unwrap(), "[]");
    }

    #[test]
    fn test_github_markdown() {
        let mut open = entity(Family::GitHub, "o/r", 1, "pull", "open");
        open.title = "Fix crash".to_string();
        open.author = "alice".to_string();
        open.review_status = Some("approved".to_string());
        open.external_updated_at = Some(now() - Duration::days(1));
        let merged = entity(Family::GitHub, "o/r", 2, "pull", "merged");
        let unknown = entity(Family::GitHub, "o/r", 3, "", "");

        let text = entities_markdown(&[merged, open, unknown], Some(Family::GitHub), now());
        let expected = "\
## Open (2)

- o/r#1 [pull] Fix crash
  Author: alice | Review: approved
  First seen: 2024-06-07 (tab) | Last updated: 1d ago

- o/r#3 [] (untitled)
  First seen: 2024-06-07 (tab) | Last updated: 3d ago

## Merged (1)

- o/r#2 [pull] (untitled)
  First seen: 2024-06-07 (tab) | Last updated: 3d ago

";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_bugzilla_markdown_groups_by_host() {
        let mut fixed = entity(Family::Bugzilla, "bugzilla.mozilla.org", 5, "bug", "RESOLVED");
        fixed.resolution = Some("FIXED".to_string());
        fixed.title = "Leak".to_string();
        let fresh = entity(Family::Bugzilla, "bugs.example.org", 9, "bug", "");

        let text = entities_markdown(&[fixed, fresh], Some(Family::Bugzilla), now());
        let expected = "\
## bugs.example.org (1)

- bugs.example.org#9
  First seen: 2024-06-07 (tab)
  URL: https://bugs.example.org/show_bug.cgi?id=9

## bugzilla.mozilla.org (1)

- bugzilla.mozilla.org#5 [RESOLVED/FIXED] Leak
  First seen: 2024-06-07 (tab)
  URL: https://bugzilla.mozilla.org/show_bug.cgi?id=5

";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_mixed_markdown_has_family_headers() {
        let text = entities_markdown(
            &[
                entity(Family::Bugzilla, "bugzilla.mozilla.org", 5, "bug", "NEW"),
                entity(Family::GitHub, "o/r", 1, "issue", "closed"),
            ],
            None,
            now(),
        );
        let github = text.find("# GitHub").unwrap();
        let bugzilla = text.find("# Bugzilla").unwrap();
        assert!(github < bugzilla);
        assert!(text.contains("## Closed (1)"));
    }

    #[test]
    fn test_entities_json_fields() {
        let mut e = entity(Family::GitHub, "o/r", 4, "issue", "open");
        e.assignees = vec!["bob".to_string()];
        let json: serde_json::Value = serde_json::from_str(&entities_json(&[e]).unwrap()).unwrap();
        let item = &json[0];
        assert_eq!(item["url"], "https://github.com/o/r/issues/4");
        assert_eq!(item["family"], "github");
        assert_eq!(item["first_seen_source"], "tab");
        assert_eq!(item["first_seen_at"], "2024-06-07T12:00:00Z");
        assert_eq!(item["assignees"][0], "bob");
        assert!(item["last_refreshed_at"].is_null());
    }

    #[test]
    fn test_signals_markdown() {
        let mut mention = signal(1, "slack", "Alice");
        mention.preview = "can you look?".to_string();
        mention.snippet = "PR is up".to_string();
        let mut done = signal(2, "slack", "Bob");
        done.completed_at = Some(now());
        let mail = signal(3, "gmail", "Digest");

        let text = signals_markdown(&[mention, done, mail], now());
        let expected = "\
## Slack (1 active)

- [1] Alice \u{2014} can you look? (5m ago)
  > PR is up
- [2] \u{2713} Bob (5m ago)

## Gmail (1 active)

- [3] Digest (5m ago)

";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_signals_json_grouped() {
        let json: serde_json::Value = serde_json::from_str(
            &signals_json(&[signal(1, "slack", "a"), signal(2, "gmail", "b")]).unwrap(),
        )
        .unwrap();
        assert_eq!(json["slack"][0]["id"], 1);
        assert_eq!(json["slack"][0]["active"], true);
        assert!(json["slack"][0].get("snippet").is_none());
        assert_eq!(json["gmail"][0]["title"], "b");
    }
}
