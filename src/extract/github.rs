//! GitHub pull request and issue references

use super::parse_positive;
use crate::entity::EntityRef;
use regex::Regex;

/// Match `/owner/repo/(pull|issues)/N` on a github.com path.
pub(super) fn from_path(pattern: &Regex, host: &str, path: &str) -> Option<EntityRef> {
    if host != "github.com" && host != "www.github.com" {
        return None;
    }
    let caps = pattern.captures(path)?;
    let number = parse_positive(caps.get(4)?.as_str())?;
    let kind = if caps.get(3)?.as_str() == "pull" { "pull" } else { "issue" };
    let scope = format!("{}/{}", caps.get(1)?.as_str(), caps.get(2)?.as_str());
    Some(EntityRef::github(scope, number, kind))
}

/// Bot-generated subjects: `[owner/repo] Some title (#N)`.
/// The kind cannot be told from a subject, so it stays empty.
pub(super) fn from_subject(pattern: &Regex, text: &str) -> Option<EntityRef> {
    let caps = pattern.captures(text)?;
    let number = parse_positive(caps.get(2)?.as_str())?;
    Some(EntityRef::github(caps.get(1)?.as_str(), number, ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_www_host_accepted() {
        let re = Regex::new(r"^/([^/]+)/([^/]+)/(issues|pull)/(\d+)").unwrap();
        let found = from_path(&re, "www.github.com", "/o/r/pull/8/files").unwrap();
        assert_eq!(found.scope, "o/r");
        assert_eq!(found.local_id, 8);
        assert!(from_path(&re, "gitlab.com", "/o/r/pull/8").is_none());
    }

    #[test]
    fn test_subject_takes_last_number() {
        let re = Regex::new(r"\[([A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+)\].*#(\d+)").unwrap();
        let found = from_subject(&re, "Re: [rust-lang/rust] Tracking issue #1 (#987)").unwrap();
        assert_eq!(found.scope, "rust-lang/rust");
        assert_eq!(found.local_id, 987);
        assert!(from_subject(&re, "[not a repo] (#1)").is_none());
    }
}
