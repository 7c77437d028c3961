//! Captured notifications and their urgency rules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Urgency source recorded when a heuristic picked the value
pub const HEURISTIC_URGENCY_SOURCE: &str = "heuristic";

/// One row of a freshly scraped notification list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalItem {
    pub title: String,
    #[serde(default)]
    pub preview: String,
    #[serde(default)]
    pub snippet: String,
    /// The source's own display timestamp, kept opaque
    #[serde(default)]
    pub source_ts: String,
    /// Source-specific item kind such as "dm" or "mention"
    #[serde(default)]
    pub kind: Option<String>,
}

impl SignalItem {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
        self.preview = preview.into();
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn with_source_ts(mut self, source_ts: impl Into<String>) -> Self {
        self.source_ts = source_ts.into();
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Natural key within one source
    pub fn key(&self) -> SignalKey {
        (self.title.clone(), self.preview.clone(), self.source_ts.clone())
    }
}

/// (title, preview, source_ts)
pub type SignalKey = (String, String, String);

/// A stored notification
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub id: i64,
    pub source: String,
    pub title: String,
    pub preview: String,
    pub snippet: String,
    pub source_ts: String,
    pub kind: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub auto_completed: bool,
    pub pinned: bool,
    pub urgency: Option<Urgency>,
    pub urgency_source: Option<String>,
}

impl Signal {
    pub fn is_active(&self) -> bool {
        self.completed_at.is_none()
    }

    pub fn key(&self) -> SignalKey {
        (self.title.clone(), self.preview.clone(), self.source_ts.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Urgent,
    Review,
    Fyi,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Urgent => "urgent",
            Urgency::Review => "review",
            Urgency::Fyi => "fyi",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Urgency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "urgent" => Ok(Urgency::Urgent),
            "review" => Ok(Urgency::Review),
            "fyi" => Ok(Urgency::Fyi),
            other => Err(format!("unknown urgency: {}", other)),
        }
    }
}

/// (source, kind) pairs whose urgency is known without classification
const URGENCY_HEURISTICS: &[(&str, &str, Urgency)] = &[
    ("slack", "dm", Urgency::Urgent),
    ("slack", "mention", Urgency::Review),
    ("slack", "channel", Urgency::Fyi),
];

/// Initial urgency for a new signal. `None` means it needs classification.
pub fn heuristic_urgency(source: &str, kind: Option<&str>) -> Option<Urgency> {
    let kind = kind?;
    URGENCY_HEURISTICS
        .iter()
        .find(|(s, k, _)| s.eq_ignore_ascii_case(source) && k.eq_ignore_ascii_case(kind))
        .map(|(_, _, urgency)| *urgency)
}

/// Drop repeated (title, preview, source_ts) rows, keeping the first.
pub fn dedup_items(items: &[SignalItem]) -> Vec<SignalItem> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.key()))
        .cloned()
        .collect()
}

/// What one reconciliation pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub inserted: usize,
    /// Row ids of the signals this pass inserted
    pub inserted_ids: Vec<i64>,
    pub auto_completed: usize,
    pub reactivated: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristics() {
        assert_eq!(heuristic_urgency("slack", Some("dm")), Some(Urgency::Urgent));
        assert_eq!(heuristic_urgency("slack", Some("mention")), Some(Urgency::Review));
        assert_eq!(heuristic_urgency("slack", Some("channel")), Some(Urgency::Fyi));
        assert_eq!(heuristic_urgency("gmail", Some("dm")), None);
        assert_eq!(heuristic_urgency("gmail", None), None);
        assert_eq!(heuristic_urgency("slack", Some("thread")), None);
    }

    #[test]
    fn test_dedup_keeps_first() {
        let items = vec![
            SignalItem::new("A").with_snippet("first"),
            SignalItem::new("B"),
            SignalItem::new("A").with_snippet("second"),
            SignalItem::new("A").with_source_ts("10:00"),
        ];
        let deduped = dedup_items(&items);
        assert_eq!(deduped.len(), 3);
        assert_eq!(deduped[0].snippet, "first");
        assert_eq!(deduped[2].source_ts, "10:00");
    }

    #[test]
    fn test_urgency_parse() {
        assert_eq!("FYI".parse::<Urgency>().unwrap(), Urgency::Fyi);
        assert!("later".parse::<Urgency>().is_err());
    }
}
