//! Tracked external items and their timelines

use super::family::Family;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Surrogate key of a stored entity
pub type EntityId = i64;

/// A reference pulled out of a URL or free text.
///
/// `scope` is `owner/repo` for GitHub and the lower-cased host for Bugzilla.
/// `sub_kind` is empty when the text did not say which kind it is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub family: Family,
    pub scope: String,
    pub local_id: i64,
    pub sub_kind: String,
}

impl EntityRef {
    pub fn new(family: Family, scope: impl Into<String>, local_id: i64, sub_kind: impl Into<String>) -> Self {
        Self {
            family,
            scope: scope.into(),
            local_id,
            sub_kind: sub_kind.into(),
        }
    }

    pub fn github(scope: impl Into<String>, number: i64, sub_kind: impl Into<String>) -> Self {
        Self::new(Family::GitHub, scope, number, sub_kind)
    }

    pub fn bugzilla(host: impl Into<String>, bug_id: i64) -> Self {
        Self::new(Family::Bugzilla, host, bug_id, "bug")
    }

    /// Natural key as a display string, e.g. `mozilla/gecko-dev#1234`
    pub fn key(&self) -> String {
        format!("{}#{}", self.scope, self.local_id)
    }
}

/// How an entity was first observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeenSource {
    Tab,
    Signal,
}

impl SeenSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeenSource::Tab => "tab",
            SeenSource::Signal => "signal",
        }
    }
}

impl fmt::Display for SeenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeenSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tab" => Ok(SeenSource::Tab),
            "signal" => Ok(SeenSource::Signal),
            other => Err(format!("unknown seen source: {}", other)),
        }
    }
}

/// A tracked external item
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub family: Family,
    pub scope: String,
    pub local_id: i64,
    /// "pull", "issue", "bug", or empty when not yet resolved
    pub kind: String,
    pub title: String,
    /// Empty means unknown, which lists alongside open items
    pub state: String,
    pub author: String,
    pub assignees: Vec<String>,
    pub review_status: Option<String>,
    pub checks_status: Option<String>,
    pub resolution: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub first_seen_source: SeenSource,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub external_updated_at: Option<DateTime<Utc>>,
}

impl Entity {
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.family, self.scope.clone(), self.local_id, self.kind.clone())
    }

    /// Canonical web URL rebuilt from family, scope, id and kind
    pub fn url(&self) -> String {
        self.family.descriptor().url(&self.scope, self.local_id, &self.kind)
    }

    pub fn is_open(&self) -> bool {
        self.family.descriptor().is_open(&self.state)
    }
}

/// Timeline entry types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TabSeen,
    SignalSeen,
    StatusChanged,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TabSeen => "tab_seen",
            EventType::SignalSeen => "signal_seen",
            EventType::StatusChanged => "status_changed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tab_seen" => Ok(EventType::TabSeen),
            "signal_seen" => Ok(EventType::SignalSeen),
            "status_changed" => Ok(EventType::StatusChanged),
            other => Err(format!("unknown event type: {}", other)),
        }
    }
}

/// Immutable timeline row
#[derive(Debug, Clone, PartialEq)]
pub struct EntityEvent {
    pub id: i64,
    pub entity_id: EntityId,
    pub event_type: EventType,
    pub signal_id: Option<i64>,
    pub snapshot_id: Option<i64>,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

/// An event waiting to be appended
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub entity_id: EntityId,
    pub event_type: EventType,
    pub signal_id: Option<i64>,
    pub snapshot_id: Option<i64>,
    pub detail: String,
    /// Overrides the store clock; backfill uses the occurrence time
    pub at: Option<DateTime<Utc>>,
}

impl NewEvent {
    pub fn new(entity_id: EntityId, event_type: EventType) -> Self {
        Self {
            entity_id,
            event_type,
            signal_id: None,
            snapshot_id: None,
            detail: String::new(),
            at: None,
        }
    }

    pub fn with_signal(mut self, signal_id: i64) -> Self {
        self.signal_id = Some(signal_id);
        self
    }

    pub fn with_snapshot(mut self, snapshot_id: i64) -> Self {
        self.snapshot_id = Some(snapshot_id);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = Some(at);
        self
    }
}

/// Fields written by a successful refresh. Replaces the stored values wholesale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    /// Resolved sub-kind; `None` keeps the stored one
    pub kind: Option<String>,
    pub title: String,
    pub state: String,
    pub author: String,
    pub assignees: Vec<String>,
    pub review_status: Option<String>,
    pub checks_status: Option<String>,
    pub resolution: Option<String>,
    pub external_updated_at: Option<DateTime<Utc>>,
}
