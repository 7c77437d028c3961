//! Remote vocabulary -> internal vocabulary

use super::batch::ItemPayload;
use super::client::BugRecord;
use crate::entity::{Family, StatusUpdate};
use chrono::{DateTime, Utc};

/// Status fields for a GitHub issue or pull request
pub fn github_update(payload: &ItemPayload) -> StatusUpdate {
    let descriptor = Family::GitHub.descriptor();

    let kind = match payload.typename.as_deref() {
        Some("PullRequest") => Some("pull".to_string()),
        Some("Issue") => Some("issue".to_string()),
        _ => None,
    };

    StatusUpdate {
        kind,
        title: payload.title.clone().unwrap_or_default(),
        state: payload.state.as_deref().unwrap_or_default().to_lowercase(),
        author: payload
            .author
            .as_ref()
            .map(|a| a.login.clone())
            .unwrap_or_default(),
        assignees: payload
            .assignees
            .as_ref()
            .map(|a| {
                a.nodes
                    .iter()
                    .flatten()
                    .map(|n| n.login.clone())
                    .filter(|login| !login.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
        review_status: payload
            .review_decision
            .as_deref()
            .filter(|raw| !raw.is_empty())
            .map(|raw| descriptor.normalize_review(raw)),
        checks_status: payload
            .status_check_rollup
            .as_ref()
            .and_then(|rollup| rollup.state.as_deref())
            .filter(|raw| !raw.is_empty())
            .map(|raw| descriptor.normalize_checks(raw)),
        resolution: None,
        external_updated_at: payload.updated_at.as_deref().and_then(parse_remote_ts),
    }
}

/// Status fields for a Bugzilla bug. Status words stay as Bugzilla spells them.
pub fn bugzilla_update(bug: &BugRecord) -> StatusUpdate {
    StatusUpdate {
        kind: None,
        title: bug.summary.clone(),
        state: bug.status.clone(),
        author: String::new(),
        assignees: Some(bug.assigned_to.trim())
            .filter(|a| !a.is_empty())
            .map(|a| vec![a.to_string()])
            .unwrap_or_default(),
        review_status: None,
        checks_status: None,
        resolution: Some(bug.resolution.trim())
            .filter(|r| !r.is_empty())
            .map(String::from),
        external_updated_at: None,
    }
}

/// A malformed remote timestamp is dropped rather than failing the item.
fn parse_remote_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde::Deserialize;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> ItemPayload {
        ItemPayload::deserialize(&value).unwrap()
    }

    #[test]
    fn test_pull_request_normalized() {
        let update = github_update(&payload(json!({
            "state": "MERGED",
            "title": "Bump lodash",
            "author": { "login": "dependabot" },
            "updatedAt": "2024-05-01T10:00:00Z",
            "assignees": { "nodes": [ { "login": "alice" }, { "login": "bob" } ] },
            "reviewDecision": "CHANGES_REQUESTED",
            "statusCheckRollup": { "state": "FAILURE" }
        })));

        assert_eq!(update.state, "merged");
        assert_eq!(update.title, "Bump lodash");
        assert_eq!(update.author, "dependabot");
        assert_eq!(update.assignees, vec!["alice", "bob"]);
        assert_eq!(update.review_status.as_deref(), Some("changes_requested"));
        assert_eq!(update.checks_status.as_deref(), Some("failing"));
        assert_eq!(
            update.external_updated_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(update.kind, None);
    }

    #[test]
    fn test_unrecognized_values_pass_through_lowercased() {
        let update = github_update(&payload(json!({
            "state": "OPEN",
            "reviewDecision": "DISMISSED",
            "statusCheckRollup": { "state": "NEUTRAL" },
            "updatedAt": "yesterday"
        })));
        assert_eq!(update.review_status.as_deref(), Some("dismissed"));
        assert_eq!(update.checks_status.as_deref(), Some("neutral"));
        assert_eq!(update.external_updated_at, None);
    }

    #[test]
    fn test_issue_has_no_pr_fields_and_null_author() {
        let update = github_update(&payload(json!({
            "__typename": "Issue",
            "state": "CLOSED",
            "author": null,
            "reviewDecision": null,
            "statusCheckRollup": null
        })));
        assert_eq!(update.kind.as_deref(), Some("issue"));
        assert_eq!(update.author, "");
        assert_eq!(update.review_status, None);
        assert_eq!(update.checks_status, None);
    }

    #[test]
    fn test_bugzilla_fields() {
        let update = bugzilla_update(&BugRecord {
            id: 5,
            summary: "Crash".to_string(),
            status: "RESOLVED".to_string(),
            resolution: "FIXED".to_string(),
            assigned_to: "dev@example.org".to_string(),
        });
        assert_eq!(update.state, "RESOLVED");
        assert_eq!(update.resolution.as_deref(), Some("FIXED"));
        assert_eq!(update.assignees, vec!["dev@example.org"]);

        let open = bugzilla_update(&BugRecord {
            status: "NEW".to_string(),
            ..BugRecord::default()
        });
        assert_eq!(open.resolution, None);
        assert!(open.assignees.is_empty());
    }
}
