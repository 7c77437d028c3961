//! Bugzilla bug references and tab title cleanup

use super::parse_positive;
use crate::entity::EntityRef;
use regex::Regex;
use url::Url;

/// `id` query parameter of a `show_bug.cgi` URL, if that is what this is.
pub(super) fn show_bug_id(url: &Url) -> Option<i64> {
    if !url.path().trim_end_matches('/').ends_with("show_bug.cgi") {
        return None;
    }
    url.query_pairs()
        .find(|(key, _)| key == "id")
        .and_then(|(_, value)| parse_positive(&value))
}

/// Recognise the three URL shapes Bugzilla installs use:
/// `show_bug.cgi?id=N`, `/rest/bug/N` and `/bug/N`.
pub(super) fn from_parts(host: &str, path: &str, show_bug_id: Option<i64>) -> Option<EntityRef> {
    if host.is_empty() {
        return None;
    }
    if let Some(id) = show_bug_id {
        return Some(EntityRef::bugzilla(host, id));
    }

    let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
    let id = match parts.as_slice() {
        ["rest", "bug", id, ..] => parse_positive(id),
        ["bug", id, ..] => parse_positive(id),
        _ => None,
    }?;
    Some(EntityRef::bugzilla(host, id))
}

/// `Bug N` or `[Bug N]` with no link, as notification mail subjects have.
pub(super) fn from_loose_mention(pattern: &Regex, host: &str, text: &str) -> Option<EntityRef> {
    let caps = pattern.captures(text)?;
    let id = parse_positive(caps.get(1)?.as_str())?;
    Some(EntityRef::bugzilla(host, id))
}

/// Pull the summary out of a browser tab title such as
/// `Bug 12345 – Summary – Bugzilla`. Titles that do not follow that
/// shape come back trimmed but otherwise unchanged.
pub fn clean_bugzilla_tab_title(title: &str) -> String {
    let title = title.trim();
    for sep in [" \u{2013} ", " - "] {
        let parts: Vec<&str> = title.splitn(3, sep).collect();
        if parts.len() == 3 && parts[0].to_lowercase().starts_with("bug ") {
            let summary = parts[1].trim();
            if !summary.is_empty() {
                return summary.to_string();
            }
        }
    }
    title.to_string()
}
