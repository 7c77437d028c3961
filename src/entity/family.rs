//! Per-family descriptors
//!
//! Everything that differs between GitHub and Bugzilla lives in a
//! [`FamilyDescriptor`]; the store, refresher and formatter stay generic
//! and consult the table instead of branching on the family.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A family of external systems sharing one natural-key shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    GitHub,
    Bugzilla,
}

/// All known families, in display order
pub const FAMILIES: [Family; 2] = [Family::GitHub, Family::Bugzilla];

impl Family {
    pub fn as_str(&self) -> &'static str {
        self.descriptor().name
    }

    pub fn descriptor(&self) -> &'static FamilyDescriptor {
        match self {
            Family::GitHub => &GITHUB,
            Family::Bugzilla => &BUGZILLA,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Family {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FAMILIES
            .iter()
            .copied()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown family: {}", s))
    }
}

/// How markdown output groups a family's entities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    /// One section per state, in `state_order`, then any others
    ByState,
    /// One section per scope, sorted
    ByScope,
}

/// How the refresher talks to a family's remote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshShape {
    /// One combined aliased query for every due entity
    Batched,
    /// One request per entity
    PerItem,
}

/// Static per-family strategy data
#[derive(Debug)]
pub struct FamilyDescriptor {
    pub family: Family,
    pub name: &'static str,
    pub label: &'static str,
    pub empty_message: &'static str,
    /// Sub-kind assumed when extraction could not tell
    pub default_kind: &'static str,
    /// States that sort after actionable ones. Compared case-insensitively.
    pub closed_states: &'static [&'static str],
    pub state_order: &'static [&'static str],
    pub grouping: Grouping,
    pub refresh: RefreshShape,
    /// Remote review outcome -> internal vocabulary
    pub review_vocabulary: &'static [(&'static str, &'static str)],
    /// Remote aggregate check outcome -> internal vocabulary
    pub checks_vocabulary: &'static [(&'static str, &'static str)],
    url_for: fn(&str, i64, &str) -> String,
}

impl FamilyDescriptor {
    pub fn url(&self, scope: &str, local_id: i64, kind: &str) -> String {
        (self.url_for)(scope, local_id, kind)
    }

    /// Empty state means "not yet known" and counts as open.
    pub fn is_open(&self, state: &str) -> bool {
        state.is_empty()
            || !self
                .closed_states
                .iter()
                .any(|closed| closed.eq_ignore_ascii_case(state))
    }

    /// Map a remote review decision; unknown values pass through lower-cased.
    pub fn normalize_review(&self, raw: &str) -> String {
        lookup(self.review_vocabulary, raw)
    }

    /// Map a remote check rollup; unknown values pass through lower-cased.
    pub fn normalize_checks(&self, raw: &str) -> String {
        lookup(self.checks_vocabulary, raw)
    }
}

fn lookup(table: &[(&str, &str)], raw: &str) -> String {
    table
        .iter()
        .find(|(remote, _)| *remote == raw)
        .map(|(_, internal)| internal.to_string())
        .unwrap_or_else(|| raw.to_lowercase())
}

fn github_url(scope: &str, number: i64, kind: &str) -> String {
    // GitHub redirects /issues/N to the pull request when it is one
    let path = if kind == "pull" { "pull" } else { "issues" };
    format!("https://github.com/{}/{}/{}", scope, path, number)
}

fn bugzilla_url(host: &str, bug_id: i64, _kind: &str) -> String {
    format!("https://{}/show_bug.cgi?id={}", host, bug_id)
}

static GITHUB: FamilyDescriptor = FamilyDescriptor {
    family: Family::GitHub,
    name: "github",
    label: "GitHub",
    empty_message: "No GitHub entities found.\n",
    default_kind: "",
    closed_states: &["closed", "merged"],
    state_order: &["open", "merged", "closed"],
    grouping: Grouping::ByState,
    refresh: RefreshShape::Batched,
    review_vocabulary: &[
        ("APPROVED", "approved"),
        ("CHANGES_REQUESTED", "changes_requested"),
        ("REVIEW_REQUIRED", "pending"),
    ],
    checks_vocabulary: &[
        ("SUCCESS", "passing"),
        ("FAILURE", "failing"),
        ("ERROR", "failing"),
        ("PENDING", "pending"),
        ("EXPECTED", "pending"),
    ],
    url_for: github_url,
};

static BUGZILLA: FamilyDescriptor = FamilyDescriptor {
    family: Family::Bugzilla,
    name: "bugzilla",
    label: "Bugzilla",
    empty_message: "No Bugzilla issues found.\n",
    default_kind: "bug",
    closed_states: &["RESOLVED", "VERIFIED", "CLOSED"],
    state_order: &[],
    grouping: Grouping::ByScope,
    refresh: RefreshShape::PerItem,
    review_vocabulary: &[],
    checks_vocabulary: &[],
    url_for: bugzilla_url,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_parse() {
        assert_eq!("github".parse::<Family>().unwrap(), Family::GitHub);
        assert_eq!("Bugzilla".parse::<Family>().unwrap(), Family::Bugzilla);
        assert!("jira".parse::<Family>().is_err());
    }

    #[test]
    fn test_urls() {
        let gh = Family::GitHub.descriptor();
        assert_eq!(gh.url("o/r", 5, "pull"), "https://github.com/o/r/pull/5");
        assert_eq!(gh.url("o/r", 5, "issue"), "https://github.com/o/r/issues/5");
        assert_eq!(gh.url("o/r", 5, ""), "https://github.com/o/r/issues/5");
        assert_eq!(
            Family::Bugzilla.descriptor().url("bugzilla.mozilla.org", 42, "bug"),
            "https://bugzilla.mozilla.org/show_bug.cgi?id=42"
        );
    }

    #[test]
    fn test_open_states() {
        let gh = Family::GitHub.descriptor();
        assert!(gh.is_open(""));
        assert!(gh.is_open("open"));
        assert!(!gh.is_open("merged"));
        assert!(!gh.is_open("closed"));

        let bz = Family::Bugzilla.descriptor();
        assert!(bz.is_open("NEW"));
        assert!(bz.is_open("ASSIGNED"));
        assert!(!bz.is_open("RESOLVED"));
        assert!(!bz.is_open("verified"));
    }

    #[test]
    fn test_vocabulary_mapping() {
        let gh = Family::GitHub.descriptor();
        assert_eq!(gh.normalize_review("CHANGES_REQUESTED"), "changes_requested");
        assert_eq!(gh.normalize_review("REVIEW_REQUIRED"), "pending");
        assert_eq!(gh.normalize_review("COMMENTED"), "commented");
        assert_eq!(gh.normalize_checks("SUCCESS"), "passing");
        assert_eq!(gh.normalize_checks("FAILURE"), "failing");
        assert_eq!(gh.normalize_checks("PENDING"), "pending");
        assert_eq!(gh.normalize_checks("NEUTRAL"), "neutral");
    }
}
